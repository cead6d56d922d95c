//! Per-user conversation state with a sliding expiry window.
//!
//! The storage shape is a hash map per user with a per-key TTL (the classic
//! Redis-hash layout): identity fields are stored as plain fields, the
//! history as one JSON-encoded text field. `StateBackend` exposes exactly
//! those primitives; `ChatStore` layers the conversation semantics and the
//! TTL policy on top. The in-memory backend below is the default and the
//! test double; a Redis adapter would implement the same three calls.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{domain::SenderId, errors::Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// One piece of a turn's content. Images are carried inline as base64 so a
/// turn is self-contained when replayed to the completion provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(default)]
        mime: Option<String>,
    },
}

/// One role-tagged message within a conversation history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

impl ConversationTurn {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentPart::Text { text: text.into() }],
        }
    }

    /// All text parts joined; image parts are skipped.
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                ContentPart::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Durable conversation record, one per end user.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatState {
    pub user_id: SenderId,
    pub display_name: String,
    /// RFC3339 creation stamp. Preserved across resets.
    pub created_at: String,
    pub history: Vec<ConversationTurn>,
}

impl ChatState {
    pub fn new(user_id: SenderId, display_name: impl Into<String>) -> Self {
        Self {
            user_id,
            display_name: display_name.into(),
            created_at: Utc::now().to_rfc3339(),
            history: Vec::new(),
        }
    }
}

/// Hash-map-per-key storage primitives with per-key expiry.
#[async_trait]
pub trait StateBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<HashMap<String, String>>>;
    async fn put(&self, key: &str, fields: HashMap<String, String>) -> Result<()>;
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;
}

#[derive(Debug)]
struct MemoryEntry {
    fields: HashMap<String, String>,
    deadline: Option<Instant>,
}

/// In-process `StateBackend`. Expired keys are evicted lazily on read.
#[derive(Default)]
pub struct MemoryBackend {
    inner: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<HashMap<String, String>>> {
        let mut map = self.inner.lock().await;
        let expired = map
            .get(key)
            .and_then(|e| e.deadline)
            .is_some_and(|d| Instant::now() >= d);
        if expired {
            map.remove(key);
            return Ok(None);
        }
        Ok(map.get(key).map(|e| e.fields.clone()))
    }

    async fn put(&self, key: &str, fields: HashMap<String, String>) -> Result<()> {
        let mut map = self.inner.lock().await;
        // Overwriting fields keeps the current deadline, like a Redis HSET.
        let deadline = map.get(key).and_then(|e| e.deadline);
        map.insert(key.to_string(), MemoryEntry { fields, deadline });
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut map = self.inner.lock().await;
        if let Some(entry) = map.get_mut(key) {
            entry.deadline = Some(Instant::now() + ttl);
        }
        Ok(())
    }
}

const FIELD_USER_ID: &str = "user_id";
const FIELD_DISPLAY_NAME: &str = "display_name";
const FIELD_CREATED_AT: &str = "created_at";
const FIELD_HISTORY: &str = "history";

fn state_key(user: &SenderId) -> String {
    format!("chatstate:{}", user.0)
}

/// Conversation-state operations over a `StateBackend`.
///
/// Every mutating operation re-arms the TTL: active conversations stay
/// alive, idle ones self-expire without a cleanup sweep.
#[derive(Clone)]
pub struct ChatStore {
    backend: Arc<dyn StateBackend>,
    ttl: Duration,
}

impl ChatStore {
    pub fn new(backend: Arc<dyn StateBackend>, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get(&self, user: &SenderId) -> Result<Option<ChatState>> {
        let Some(fields) = self.backend.get(&state_key(user)).await? else {
            return Ok(None);
        };
        Ok(Some(decode_state(user, &fields)?))
    }

    /// Upsert the full record and reset the expiry window.
    pub async fn create_or_replace(&self, state: &ChatState) -> Result<()> {
        let key = state_key(&state.user_id);
        self.backend.put(&key, encode_state(state)?).await?;
        self.backend.expire(&key, self.ttl).await
    }

    /// Clear the history, keeping identity fields. No-op when absent.
    pub async fn reset(&self, user: &SenderId) -> Result<()> {
        let Some(mut state) = self.get(user).await? else {
            return Ok(());
        };
        state.history.clear();
        self.create_or_replace(&state).await
    }

    /// Append a turn. Callers must have created the state first.
    pub async fn append(&self, user: &SenderId, turn: ConversationTurn) -> Result<()> {
        let mut state = self.require(user).await?;
        state.history.push(turn);
        self.create_or_replace(&state).await
    }

    /// Replace the content of the turn at `index` with a single text part.
    pub async fn replace_turn_content(
        &self,
        user: &SenderId,
        index: usize,
        new_text: &str,
    ) -> Result<()> {
        let mut state = self.require(user).await?;
        let len = state.history.len();
        let turn = state
            .history
            .get_mut(index)
            .ok_or(Error::Index { index, len })?;
        turn.content = vec![ContentPart::Text {
            text: new_text.to_string(),
        }];
        self.create_or_replace(&state).await
    }

    /// Remove the turn at `index`, preserving the order of the rest.
    /// Out-of-range indexes are a no-op (filter semantics, not an assert).
    pub async fn remove_turn(&self, user: &SenderId, index: usize) -> Result<()> {
        let mut state = self.require(user).await?;
        if index >= state.history.len() {
            return Ok(());
        }
        state.history.remove(index);
        self.create_or_replace(&state).await
    }

    /// Read-only projection of the history filtered by role.
    pub async fn turns_by_role(
        &self,
        user: &SenderId,
        role: Role,
    ) -> Result<Vec<ConversationTurn>> {
        let state = self.require(user).await?;
        Ok(state
            .history
            .into_iter()
            .filter(|t| t.role == role)
            .collect())
    }

    async fn require(&self, user: &SenderId) -> Result<ChatState> {
        self.get(user)
            .await?
            .ok_or_else(|| Error::NotFound(format!("chat state for {}", user.0)))
    }
}

fn encode_state(state: &ChatState) -> Result<HashMap<String, String>> {
    let mut fields = HashMap::new();
    fields.insert(FIELD_USER_ID.to_string(), state.user_id.0.clone());
    fields.insert(FIELD_DISPLAY_NAME.to_string(), state.display_name.clone());
    fields.insert(FIELD_CREATED_AT.to_string(), state.created_at.clone());
    fields.insert(
        FIELD_HISTORY.to_string(),
        serde_json::to_string(&state.history)?,
    );
    Ok(fields)
}

fn decode_state(user: &SenderId, fields: &HashMap<String, String>) -> Result<ChatState> {
    let history = match fields.get(FIELD_HISTORY) {
        Some(raw) if !raw.is_empty() => serde_json::from_str(raw)?,
        _ => Vec::new(),
    };
    Ok(ChatState {
        user_id: SenderId(
            fields
                .get(FIELD_USER_ID)
                .cloned()
                .unwrap_or_else(|| user.0.clone()),
        ),
        display_name: fields.get(FIELD_DISPLAY_NAME).cloned().unwrap_or_default(),
        created_at: fields.get(FIELD_CREATED_AT).cloned().unwrap_or_default(),
        history,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_ttl(ttl: Duration) -> ChatStore {
        ChatStore::new(Arc::new(MemoryBackend::new()), ttl)
    }

    fn store() -> ChatStore {
        store_with_ttl(Duration::from_secs(60))
    }

    fn user() -> SenderId {
        SenderId("628111".to_string())
    }

    fn turn(role: Role, text: &str) -> ConversationTurn {
        ConversationTurn::text(role, text)
    }

    #[tokio::test]
    async fn get_on_missing_user_is_none() {
        assert!(store().get(&user()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn append_then_get_returns_last_turn_for_all_prior_lengths() {
        let store = store();
        let state = ChatState::new(user(), "Rizky");
        store.create_or_replace(&state).await.unwrap();

        for n in 0..5 {
            let appended = turn(Role::User, &format!("msg-{n}"));
            store.append(&user(), appended.clone()).await.unwrap();
            let got = store.get(&user()).await.unwrap().unwrap();
            assert_eq!(got.history.len(), n + 1);
            assert_eq!(got.history.last().unwrap(), &appended);
        }
    }

    #[tokio::test]
    async fn append_on_missing_user_is_not_found() {
        let err = store().append(&user(), turn(Role::User, "x")).await;
        assert!(matches!(err, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn reset_clears_history_and_preserves_identity() {
        let store = store();
        let mut state = ChatState::new(user(), "Rizky");
        state.history.push(turn(Role::User, "hello"));
        state.history.push(turn(Role::Assistant, "hi"));
        let created = state.created_at.clone();
        store.create_or_replace(&state).await.unwrap();

        store.reset(&user()).await.unwrap();
        let got = store.get(&user()).await.unwrap().unwrap();
        assert!(got.history.is_empty());
        assert_eq!(got.user_id, user());
        assert_eq!(got.created_at, created);

        // Idempotent: a second reset yields the same empty-history state.
        store.reset(&user()).await.unwrap();
        let again = store.get(&user()).await.unwrap().unwrap();
        assert_eq!(again, got);
    }

    #[tokio::test]
    async fn reset_on_missing_user_is_a_noop() {
        store().reset(&user()).await.unwrap();
    }

    #[tokio::test]
    async fn remove_turn_shifts_subsequent_elements_left() {
        let store = store();
        let mut state = ChatState::new(user(), "Rizky");
        for n in 0..4 {
            state.history.push(turn(Role::User, &format!("m{n}")));
        }
        store.create_or_replace(&state).await.unwrap();

        store.remove_turn(&user(), 1).await.unwrap();
        let got = store.get(&user()).await.unwrap().unwrap();
        let texts: Vec<String> = got.history.iter().map(|t| t.joined_text()).collect();
        assert_eq!(texts, vec!["m0", "m2", "m3"]);
    }

    #[tokio::test]
    async fn remove_turn_out_of_range_is_a_noop() {
        let store = store();
        let mut state = ChatState::new(user(), "Rizky");
        state.history.push(turn(Role::User, "only"));
        store.create_or_replace(&state).await.unwrap();

        store.remove_turn(&user(), 7).await.unwrap();
        let got = store.get(&user()).await.unwrap().unwrap();
        assert_eq!(got.history.len(), 1);
    }

    #[tokio::test]
    async fn replace_turn_content_rewrites_to_single_text_part() {
        let store = store();
        let mut state = ChatState::new(user(), "Rizky");
        state.history.push(ConversationTurn {
            role: Role::User,
            content: vec![
                ContentPart::Text {
                    text: "caption".to_string(),
                },
                ContentPart::Image {
                    data: "aGk=".to_string(),
                    mime: Some("image/png".to_string()),
                },
            ],
        });
        store.create_or_replace(&state).await.unwrap();

        store
            .replace_turn_content(&user(), 0, "edited")
            .await
            .unwrap();
        let got = store.get(&user()).await.unwrap().unwrap();
        assert_eq!(
            got.history[0].content,
            vec![ContentPart::Text {
                text: "edited".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn replace_turn_content_out_of_range_is_an_index_error() {
        let store = store();
        store
            .create_or_replace(&ChatState::new(user(), "Rizky"))
            .await
            .unwrap();
        let err = store.replace_turn_content(&user(), 3, "nope").await;
        assert!(matches!(err, Err(Error::Index { index: 3, len: 0 })));
    }

    #[tokio::test]
    async fn turns_by_role_projects_matching_turns_only() {
        let store = store();
        let mut state = ChatState::new(user(), "Rizky");
        state.history.push(turn(Role::User, "q1"));
        state.history.push(turn(Role::Assistant, "a1"));
        state.history.push(turn(Role::Tool, "t1"));
        state.history.push(turn(Role::User, "q2"));
        store.create_or_replace(&state).await.unwrap();

        let users = store.turns_by_role(&user(), Role::User).await.unwrap();
        let texts: Vec<String> = users.iter().map(|t| t.joined_text()).collect();
        assert_eq!(texts, vec!["q1", "q2"]);
    }

    #[tokio::test]
    async fn state_expires_after_ttl() {
        let store = store_with_ttl(Duration::from_millis(30));
        store
            .create_or_replace(&ChatState::new(user(), "Rizky"))
            .await
            .unwrap();
        assert!(store.get(&user()).await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(store.get(&user()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mutating_operations_rearm_the_ttl() {
        let store = store_with_ttl(Duration::from_millis(80));
        store
            .create_or_replace(&ChatState::new(user(), "Rizky"))
            .await
            .unwrap();

        // Keep touching the record past the original deadline.
        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            store.append(&user(), turn(Role::User, "ping")).await.unwrap();
        }
        assert!(store.get(&user()).await.unwrap().is_some());
    }

    #[test]
    fn history_round_trips_through_json() {
        let turns = vec![
            turn(Role::User, "hello"),
            ConversationTurn {
                role: Role::Assistant,
                content: vec![ContentPart::Text {
                    text: "hi there".to_string(),
                }],
            },
        ];
        let encoded = serde_json::to_string(&turns).unwrap();
        let decoded: Vec<ConversationTurn> = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, turns);
    }
}
