//! Raw inbound event model shared with the platform bridge.
//!
//! The bridge pre-decodes the platform's nested envelope into this closed
//! tagged union, one variant per recognized content kind plus explicit
//! control kinds and an `Unrecognized` catch-all. New platform message kinds
//! land in `Unrecognized` instead of being silently misclassified.

use serde::{Deserialize, Serialize};

use crate::domain::{EventKey, SenderId};

/// One raw inbound event, before normalization.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RawEvent {
    pub key: EventKey,
    #[serde(default)]
    pub push_name: Option<String>,
    /// Platform delivery timestamp, seconds since epoch.
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub content: Option<RawContent>,
}

/// Content kinds. Quoting is modeled one level deep only: the bridge
/// flattens the quoted message's own content into a `QuotedRef`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawContent {
    Conversation {
        text: String,
    },
    ExtendedText {
        text: String,
        #[serde(default)]
        quoted: Option<QuotedRef>,
    },
    Image {
        #[serde(default)]
        caption: Option<String>,
        #[serde(default)]
        quoted: Option<QuotedRef>,
        media: MediaRef,
    },
    Video {
        #[serde(default)]
        caption: Option<String>,
        #[serde(default)]
        quoted: Option<QuotedRef>,
        media: MediaRef,
    },
    /// Ephemeral wrapper that still needs unwrapping; carries no user content
    /// at this level.
    Ephemeral,
    /// Protocol bookkeeping frame (history sync, revokes, ...).
    Protocol,
    /// Group key distribution control frame.
    SenderKeyDistribution,
    #[serde(other)]
    Unrecognized,
}

/// The quoted message surfaced by a reply. One level only.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuotedRef {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub sender: Option<SenderId>,
}

/// Opaque handle the transport can download.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MediaRef {
    pub id: String,
    pub kind: MediaKind,
    #[serde(default)]
    pub mime: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

/// A batch of events as delivered by the platform. Only `Notify` batches
/// carry fresh user messages; everything else is history backfill.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventBatch {
    pub events: Vec<RawEvent>,
    pub kind: BatchKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchKind {
    Notify,
    Append,
    Other,
}

// Unknown batch kinds land in `Other` instead of failing the whole frame.
impl<'de> serde::Deserialize<'de> for BatchKind {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "notify" => BatchKind::Notify,
            "append" => BatchKind::Append,
            _ => BatchKind::Other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_tagged_content_kinds() {
        let json = r#"{
          "key": {"chat": "628111@s.whatsapp.net", "id": "A1"},
          "push_name": "Rizky",
          "timestamp": 1733200000,
          "content": {"kind": "extended_text", "text": "hi", "quoted": {"text": "earlier"}}
        }"#;
        let ev: RawEvent = serde_json::from_str(json).unwrap();
        match ev.content.unwrap() {
            RawContent::ExtendedText { text, quoted } => {
                assert_eq!(text, "hi");
                assert_eq!(quoted.unwrap().text.as_deref(), Some("earlier"));
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_kind_falls_into_unrecognized() {
        let json = r#"{
          "key": {"chat": "628111@s.whatsapp.net", "id": "A2"},
          "content": {"kind": "poll_creation"}
        }"#;
        let ev: RawEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(ev.content, Some(RawContent::Unrecognized)));
    }

    #[test]
    fn batch_kind_other_is_catch_all() {
        let b: EventBatch =
            serde_json::from_str(r#"{"events": [], "kind": "prepend"}"#).unwrap();
        assert_eq!(b.kind, BatchKind::Other);
    }
}
