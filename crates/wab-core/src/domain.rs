use serde::{Deserialize, Serialize};

/// Remote conversation identifier (JID). Group chats end in `@g.us`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatJid(pub String);

/// Bare sender phone number. Primary key for per-user chat state.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SenderId(pub String);

/// Platform message id (string).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

/// A stable reference to one inbound platform event.
///
/// `participant` is set for group messages and carries the actual sender JID.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventKey {
    pub chat: ChatJid,
    pub id: MessageId,
    #[serde(default)]
    pub participant: Option<String>,
    #[serde(default)]
    pub from_me: bool,
}

/// Where a conversation lives. Derived once from the JID, never recomputed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OriginKind {
    Group,
    Private,
}

impl ChatJid {
    pub fn origin(&self) -> OriginKind {
        if self.0.ends_with("@g.us") {
            OriginKind::Group
        } else {
            OriginKind::Private
        }
    }

    /// The platform's own status feed; nothing user-addressed arrives here.
    pub fn is_status_broadcast(&self) -> bool {
        self.0 == "status@broadcast"
    }
}

impl EventKey {
    /// Bare phone number of the sender: participant for groups, the remote
    /// JID otherwise, stripped of the `@server` suffix and device part.
    pub fn sender_id(&self) -> SenderId {
        let jid = match (self.chat.origin(), &self.participant) {
            (OriginKind::Group, Some(p)) => p.as_str(),
            _ => self.chat.0.as_str(),
        };
        let bare = jid
            .split('@')
            .next()
            .unwrap_or("")
            .split(':')
            .next()
            .unwrap_or("");
        SenderId(bare.to_string())
    }
}
