//! Decode a raw inbound event into the canonical envelope.
//!
//! Pure: no I/O, no side effects. Events with no user-addressed content
//! (control frames, status broadcast) are dropped by returning `None`.

use crate::{
    domain::{EventKey, OriginKind, SenderId},
    wire::{MediaRef, RawContent, RawEvent},
};

/// Canonical decoded form of one inbound chat event. Owned by the dispatcher
/// for the duration of one dispatch.
#[derive(Clone, Debug)]
pub struct InboundEnvelope {
    pub key: EventKey,
    pub sender: SenderId,
    pub sender_name: String,
    pub origin: OriginKind,
    /// User-visible text: the body for text kinds, the caption for media
    /// kinds (possibly empty).
    pub body: String,
    pub quoted: Option<QuotedText>,
    pub media: Option<MediaRef>,
    pub timestamp: Option<i64>,
}

#[derive(Clone, Debug)]
pub struct QuotedText {
    pub text: String,
    pub sender: Option<SenderId>,
}

/// Extraction priority when a payload could be read several ways:
/// extended-text > image > video > plain conversation. The tagged union
/// makes each event a single kind, so the order shows up as match-arm order
/// below; residual fields from unrelated kinds never reach this layer.
pub fn normalize(event: &RawEvent) -> Option<InboundEnvelope> {
    if event.key.chat.is_status_broadcast() {
        return None;
    }

    let content = event.content.as_ref()?;

    let (body, quoted, media) = match content {
        RawContent::ExtendedText { text, quoted } => (text.clone(), quoted.clone(), None),
        RawContent::Image {
            caption,
            quoted,
            media,
        } => (
            caption.clone().unwrap_or_default(),
            quoted.clone(),
            Some(media.clone()),
        ),
        RawContent::Video {
            caption,
            quoted,
            media,
        } => (
            caption.clone().unwrap_or_default(),
            quoted.clone(),
            Some(media.clone()),
        ),
        RawContent::Conversation { text } => (text.clone(), None, None),
        // Control kinds carry no user content; drop silently.
        RawContent::Ephemeral
        | RawContent::Protocol
        | RawContent::SenderKeyDistribution
        | RawContent::Unrecognized => return None,
    };

    let quoted = quoted.and_then(|q| {
        q.text.map(|text| QuotedText {
            text,
            sender: q.sender,
        })
    });

    Some(InboundEnvelope {
        sender: event.key.sender_id(),
        sender_name: event
            .push_name
            .clone()
            .unwrap_or_else(|| "anonymous".to_string()),
        origin: event.key.chat.origin(),
        body,
        quoted,
        media,
        timestamp: event.timestamp,
        key: event.key.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChatJid, MessageId};
    use crate::wire::{MediaKind, QuotedRef};

    fn event(chat: &str, content: Option<RawContent>) -> RawEvent {
        RawEvent {
            key: EventKey {
                chat: ChatJid(chat.to_string()),
                id: MessageId("MSG1".to_string()),
                participant: None,
                from_me: false,
            },
            push_name: Some("Rizky".to_string()),
            timestamp: Some(1_733_200_000),
            content,
        }
    }

    fn image_ref() -> MediaRef {
        MediaRef {
            id: "media-1".to_string(),
            kind: MediaKind::Image,
            mime: Some("image/jpeg".to_string()),
        }
    }

    #[test]
    fn plain_conversation_extracts_body() {
        let ev = event(
            "628111@s.whatsapp.net",
            Some(RawContent::Conversation {
                text: "hello".to_string(),
            }),
        );
        let env = normalize(&ev).unwrap();
        assert_eq!(env.body, "hello");
        assert!(env.quoted.is_none());
        assert!(env.media.is_none());
        assert_eq!(env.origin, OriginKind::Private);
    }

    #[test]
    fn extended_text_carries_one_level_of_quote() {
        let ev = event(
            "628111@s.whatsapp.net",
            Some(RawContent::ExtendedText {
                text: "replying".to_string(),
                quoted: Some(QuotedRef {
                    text: Some("original".to_string()),
                    sender: Some(SenderId("628999".to_string())),
                }),
            }),
        );
        let env = normalize(&ev).unwrap();
        let quoted = env.quoted.unwrap();
        assert_eq!(quoted.text, "original");
        assert_eq!(quoted.sender, Some(SenderId("628999".to_string())));
    }

    #[test]
    fn media_kinds_take_text_from_caption() {
        let ev = event(
            "628111@s.whatsapp.net",
            Some(RawContent::Image {
                caption: Some("look at this".to_string()),
                quoted: None,
                media: image_ref(),
            }),
        );
        let env = normalize(&ev).unwrap();
        assert_eq!(env.body, "look at this");
        assert_eq!(env.media.unwrap().id, "media-1");
    }

    #[test]
    fn captionless_media_yields_empty_body() {
        let ev = event(
            "628111@s.whatsapp.net",
            Some(RawContent::Image {
                caption: None,
                quoted: None,
                media: image_ref(),
            }),
        );
        let env = normalize(&ev).unwrap();
        assert_eq!(env.body, "");
        assert!(env.media.is_some());
    }

    #[test]
    fn control_kinds_are_dropped() {
        for content in [
            RawContent::Ephemeral,
            RawContent::Protocol,
            RawContent::SenderKeyDistribution,
            RawContent::Unrecognized,
        ] {
            let ev = event("628111@s.whatsapp.net", Some(content));
            assert!(normalize(&ev).is_none());
        }
    }

    #[test]
    fn missing_content_is_dropped() {
        assert!(normalize(&event("628111@s.whatsapp.net", None)).is_none());
    }

    #[test]
    fn status_broadcast_is_dropped() {
        let ev = event(
            "status@broadcast",
            Some(RawContent::Conversation {
                text: "story".to_string(),
            }),
        );
        assert!(normalize(&ev).is_none());
    }

    #[test]
    fn group_sender_comes_from_participant() {
        let mut ev = event(
            "123-456@g.us",
            Some(RawContent::Conversation {
                text: "in a group".to_string(),
            }),
        );
        ev.key.participant = Some("628333:2@s.whatsapp.net".to_string());
        let env = normalize(&ev).unwrap();
        assert_eq!(env.origin, OriginKind::Group);
        assert_eq!(env.sender, SenderId("628333".to_string()));
    }

    #[test]
    fn missing_push_name_falls_back_to_anonymous() {
        let mut ev = event(
            "628111@s.whatsapp.net",
            Some(RawContent::Conversation {
                text: "hi".to_string(),
            }),
        );
        ev.push_name = None;
        assert_eq!(normalize(&ev).unwrap().sender_name, "anonymous");
    }
}
