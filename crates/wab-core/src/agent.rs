//! LLM-backed conversation turn: LOAD -> AUGMENT -> INFER -> PERSIST -> REPLY.
//!
//! Nothing is written to the state store until the completion provider has
//! answered, so a failed turn leaves no dangling user turn behind.

use std::{path::PathBuf, sync::Arc};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use tracing::{info, warn};

use crate::{
    completion::{CompletionClient, CompletionRequest},
    domain::OriginKind,
    normalize::InboundEnvelope,
    state::{ChatState, ChatStore, ContentPart, ConversationTurn, Role},
    transport::TransportPort,
    wire::MediaRef,
    Result,
};

#[derive(Clone, Debug)]
pub struct AgentOptions {
    pub system_prompt: String,
    pub max_steps: u32,
    pub max_retries: u32,
    /// Raw inbound media is copied here for later inspection (best-effort).
    pub media_dir: PathBuf,
}

/// Orchestrates one conversational turn against the completion provider.
pub struct AgentWorkflow {
    store: ChatStore,
    completion: Arc<dyn CompletionClient>,
    transport: Arc<dyn TransportPort>,
    opts: AgentOptions,
}

impl AgentWorkflow {
    pub fn new(
        store: ChatStore,
        completion: Arc<dyn CompletionClient>,
        transport: Arc<dyn TransportPort>,
        opts: AgentOptions,
    ) -> Self {
        Self {
            store,
            completion,
            transport,
            opts,
        }
    }

    pub async fn run_turn(&self, envelope: &InboundEnvelope) -> Result<()> {
        // LOAD
        let mut state = match self.store.get(&envelope.sender).await? {
            Some(state) => state,
            None => ChatState::new(envelope.sender.clone(), envelope.sender_name.clone()),
        };

        // AUGMENT
        let user_turn = self.build_user_turn(envelope).await?;

        // INFER: provider errors abort here, before anything is persisted.
        let mut messages = state.history.clone();
        messages.push(user_turn.clone());
        let output = self
            .completion
            .generate(CompletionRequest {
                system: Some(self.opts.system_prompt.clone()),
                messages,
                enable_tools: true,
                max_steps: self.opts.max_steps,
                max_retries: self.opts.max_retries,
            })
            .await?;

        // PERSIST: the user turn plus every provider turn, in order.
        state.history.push(user_turn);
        state.history.extend(output.messages.iter().cloned());
        self.store.create_or_replace(&state).await?;
        info!(sender = %envelope.sender.0, turns = state.history.len(), "chat state updated");

        // REPLY, quoting the inbound event in groups to stay attributable.
        let quote = match envelope.origin {
            OriginKind::Group => Some(&envelope.key),
            OriginKind::Private => None,
        };
        self.transport
            .send_text(&envelope.key.chat, &output.text, quote)
            .await
    }

    async fn build_user_turn(&self, envelope: &InboundEnvelope) -> Result<ConversationTurn> {
        let mut content = vec![ContentPart::Text {
            text: envelope.body.clone(),
        }];

        if let Some(media) = &envelope.media {
            let bytes = self.transport.download_media(media).await?;
            content.push(ContentPart::Image {
                data: BASE64.encode(&bytes),
                mime: media.mime.clone(),
            });
            if let Err(e) = self.dump_media(media, &bytes).await {
                warn!(error = %e, media = %media.id, "media dump failed");
            }
        }

        Ok(ConversationTurn {
            role: Role::User,
            content,
        })
    }

    async fn dump_media(&self, media: &MediaRef, bytes: &[u8]) -> Result<()> {
        tokio::fs::create_dir_all(&self.opts.media_dir).await?;
        let ext = media
            .mime
            .as_deref()
            .and_then(|m| m.split('/').nth(1))
            .unwrap_or("bin");
        let path = self
            .opts
            .media_dir
            .join(format!("inbound-{}.{ext}", media.id));
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        completion::{CompletionCapabilities, CompletionOutput},
        domain::{ChatJid, EventKey, MessageId, SenderId},
        errors::Error,
        state::MemoryBackend,
        transport::TransportCapabilities,
        wire::MediaKind,
    };
    use async_trait::async_trait;
    use std::{
        sync::Mutex as StdMutex,
        time::Duration,
    };

    #[derive(Clone, Debug, PartialEq)]
    struct Outbound {
        chat: String,
        text: String,
        quoted: bool,
    }

    #[derive(Default)]
    struct FakeTransport {
        sent: StdMutex<Vec<Outbound>>,
        media: Option<Vec<u8>>,
    }

    #[async_trait]
    impl TransportPort for FakeTransport {
        fn capabilities(&self) -> TransportCapabilities {
            TransportCapabilities {
                supports_reactions: true,
                supports_quoting: true,
                supports_media_download: true,
            }
        }

        async fn send_text(
            &self,
            chat: &ChatJid,
            text: &str,
            quote: Option<&EventKey>,
        ) -> Result<()> {
            self.sent.lock().unwrap().push(Outbound {
                chat: chat.0.clone(),
                text: text.to_string(),
                quoted: quote.is_some(),
            });
            Ok(())
        }

        async fn react(&self, _key: &EventKey, _emoji: &str) -> Result<()> {
            Ok(())
        }

        async fn mark_read(&self, _keys: &[EventKey]) -> Result<()> {
            Ok(())
        }

        async fn download_media(&self, _media: &MediaRef) -> Result<Vec<u8>> {
            Ok(self.media.clone().unwrap_or_default())
        }
    }

    /// Scripted provider: returns a tool turn plus a final answer.
    struct FakeCompletion {
        fail: bool,
        requests: StdMutex<Vec<CompletionRequest>>,
    }

    impl FakeCompletion {
        fn ok() -> Self {
            Self {
                fail: false,
                requests: StdMutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                requests: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CompletionClient for FakeCompletion {
        fn capabilities(&self) -> CompletionCapabilities {
            CompletionCapabilities {
                supports_tools: true,
                supports_vision: true,
            }
        }

        async fn generate(&self, req: CompletionRequest) -> Result<CompletionOutput> {
            self.requests.lock().unwrap().push(req);
            if self.fail {
                return Err(Error::Provider("model unavailable".to_string()));
            }
            Ok(CompletionOutput {
                text: "the answer".to_string(),
                messages: vec![
                    ConversationTurn::text(Role::Tool, "{\"tool_result\":\"...\"}"),
                    ConversationTurn::text(Role::Assistant, "the answer"),
                ],
            })
        }
    }

    fn envelope(chat: &str, body: &str) -> InboundEnvelope {
        InboundEnvelope {
            key: EventKey {
                chat: ChatJid(chat.to_string()),
                id: MessageId("M1".to_string()),
                participant: None,
                from_me: false,
            },
            sender: SenderId("628111".to_string()),
            sender_name: "Rizky".to_string(),
            origin: ChatJid(chat.to_string()).origin(),
            body: body.to_string(),
            quoted: None,
            media: None,
            timestamp: None,
        }
    }

    fn workflow(
        completion: Arc<FakeCompletion>,
        transport: Arc<FakeTransport>,
    ) -> (AgentWorkflow, ChatStore) {
        let store = ChatStore::new(Arc::new(MemoryBackend::new()), Duration::from_secs(60));
        let agent = AgentWorkflow::new(
            store.clone(),
            completion,
            transport,
            AgentOptions {
                system_prompt: "be helpful".to_string(),
                max_steps: 4,
                max_retries: 2,
                media_dir: std::env::temp_dir().join(format!("wab-agent-{}", std::process::id())),
            },
        );
        (agent, store)
    }

    #[tokio::test]
    async fn first_turn_creates_state_and_appends_in_order() {
        let completion = Arc::new(FakeCompletion::ok());
        let transport = Arc::new(FakeTransport::default());
        let (agent, store) = workflow(completion.clone(), transport.clone());

        let env = envelope("628111@s.whatsapp.net", "what's the weather");
        agent.run_turn(&env).await.unwrap();

        let state = store.get(&env.sender).await.unwrap().unwrap();
        assert_eq!(state.display_name, "Rizky");
        let roles: Vec<Role> = state.history.iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Tool, Role::Assistant]);
        assert_eq!(state.history[0].joined_text(), "what's the weather");

        // Private chat: no quoting.
        let sent = transport.sent.lock().unwrap().clone();
        assert_eq!(
            sent,
            vec![Outbound {
                chat: "628111@s.whatsapp.net".to_string(),
                text: "the answer".to_string(),
                quoted: false,
            }]
        );
    }

    #[tokio::test]
    async fn later_turns_extend_existing_history() {
        let completion = Arc::new(FakeCompletion::ok());
        let transport = Arc::new(FakeTransport::default());
        let (agent, store) = workflow(completion.clone(), transport);

        let env = envelope("628111@s.whatsapp.net", "first");
        agent.run_turn(&env).await.unwrap();
        let env2 = envelope("628111@s.whatsapp.net", "second");
        agent.run_turn(&env2).await.unwrap();

        let state = store.get(&env.sender).await.unwrap().unwrap();
        assert_eq!(state.history.len(), 6);

        // The second inference saw the full prior history plus the new turn.
        let second_req = completion.requests.lock().unwrap()[1].clone();
        assert_eq!(second_req.messages.len(), 4);
        assert_eq!(second_req.messages.last().unwrap().joined_text(), "second");
    }

    #[tokio::test]
    async fn group_replies_quote_the_inbound_event() {
        let completion = Arc::new(FakeCompletion::ok());
        let transport = Arc::new(FakeTransport::default());
        let (agent, _) = workflow(completion, transport.clone());

        let mut env = envelope("123-456@g.us", "hello there");
        env.key.participant = Some("628111@s.whatsapp.net".to_string());
        env.origin = OriginKind::Group;
        agent.run_turn(&env).await.unwrap();

        let sent = transport.sent.lock().unwrap().clone();
        assert!(sent[0].quoted);
    }

    #[tokio::test]
    async fn provider_failure_persists_nothing() {
        let completion = Arc::new(FakeCompletion::failing());
        let transport = Arc::new(FakeTransport::default());
        let (agent, store) = workflow(completion, transport.clone());

        let env = envelope("628111@s.whatsapp.net", "doomed");
        let err = agent.run_turn(&env).await;
        assert!(matches!(err, Err(Error::Provider(_))));

        assert!(store.get(&env.sender).await.unwrap().is_none());
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn media_is_inlined_as_an_image_part() {
        let completion = Arc::new(FakeCompletion::ok());
        let transport = Arc::new(FakeTransport {
            media: Some(vec![0xFF, 0xD8, 0xFF]),
            ..Default::default()
        });
        let (agent, store) = workflow(completion, transport);

        let mut env = envelope("628111@s.whatsapp.net", "what is this?");
        env.media = Some(MediaRef {
            id: "media-9".to_string(),
            kind: MediaKind::Image,
            mime: Some("image/jpeg".to_string()),
        });
        agent.run_turn(&env).await.unwrap();

        let state = store.get(&env.sender).await.unwrap().unwrap();
        match &state.history[0].content[..] {
            [ContentPart::Text { text }, ContentPart::Image { data, mime }] => {
                assert_eq!(text, "what is this?");
                assert_eq!(data, &BASE64.encode([0xFF, 0xD8, 0xFF]));
                assert_eq!(mime.as_deref(), Some("image/jpeg"));
            }
            other => panic!("unexpected content: {other:?}"),
        }
    }
}
