//! Per-event routing: read receipt, command lookup, policy enforcement,
//! handler invocation with a bound chat context, agent fallback.
//!
//! Handler failures are contained at this boundary: they are logged with the
//! command name and answered with one best-effort error notice; nothing a
//! single bad message does crosses into the next event.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::{
    agent::AgentWorkflow,
    domain::{ChatJid, EventKey, OriginKind},
    normalize::{normalize, InboundEnvelope},
    registry::{CommandRegistry, CommandSpec},
    transport::TransportPort,
    wire::{BatchKind, EventBatch, MediaRef},
    Result,
};

/// Reply/react/download operations bound to the originating conversation.
///
/// Replies always quote the inbound event so answers stay attributable in
/// busy group chats, and events we sent ourselves are never answered.
#[derive(Clone)]
pub struct CommandChat {
    transport: Arc<dyn TransportPort>,
    key: EventKey,
    media: Option<MediaRef>,
}

impl CommandChat {
    pub fn new(transport: Arc<dyn TransportPort>, envelope: &InboundEnvelope) -> Self {
        Self {
            transport,
            key: envelope.key.clone(),
            media: envelope.media.clone(),
        }
    }

    pub fn chat(&self) -> &ChatJid {
        &self.key.chat
    }

    pub async fn reply(&self, text: &str) -> Result<()> {
        if self.key.from_me {
            return Ok(());
        }
        self.transport
            .send_text(&self.key.chat, text.trim(), Some(&self.key))
            .await
    }

    pub async fn react(&self, emoji: &str) -> Result<()> {
        if self.key.from_me {
            return Ok(());
        }
        self.transport.react(&self.key, emoji).await
    }

    /// Bytes of the event's media, if it carried any.
    pub async fn download_media(&self) -> Result<Option<Vec<u8>>> {
        let Some(media) = &self.media else {
            return Ok(None);
        };
        Ok(Some(self.transport.download_media(media).await?))
    }
}

/// Everything a command handler receives for one invocation.
#[derive(Clone)]
pub struct CommandInvocation {
    pub envelope: InboundEnvelope,
    /// The alias that matched, as typed (prefix stripped, original case).
    pub command: String,
    pub args: Vec<String>,
    pub full_args: String,
    pub chat: CommandChat,
}

pub struct Dispatcher {
    registry: Arc<CommandRegistry>,
    transport: Arc<dyn TransportPort>,
    agent: Option<Arc<AgentWorkflow>>,
    command_prefix: Option<char>,
    /// Last accepted run per (command name, sender), for cooldown policy.
    cooldowns: Mutex<HashMap<(String, String), Instant>>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<CommandRegistry>,
        transport: Arc<dyn TransportPort>,
        agent: Option<Arc<AgentWorkflow>>,
        command_prefix: Option<char>,
    ) -> Self {
        Self {
            registry,
            transport,
            agent,
            command_prefix,
            cooldowns: Mutex::new(HashMap::new()),
        }
    }

    /// Process one platform batch. Only `notify` batches carry fresh user
    /// messages; everything else is ignored.
    pub async fn handle_batch(&self, batch: EventBatch) {
        if batch.kind != BatchKind::Notify {
            return;
        }
        for event in &batch.events {
            let Some(envelope) = normalize(event) else {
                debug!("dropping event with no user content");
                continue;
            };
            self.dispatch(envelope).await;
        }
    }

    /// Route one normalized envelope. Never returns an error: every failure
    /// mode is handled (logged / answered) here.
    pub async fn dispatch(&self, envelope: InboundEnvelope) {
        // Read receipt first, fire-and-forget.
        if let Err(e) = self.transport.mark_read(std::slice::from_ref(&envelope.key)).await {
            warn!(error = %e, "read receipt failed");
        }

        let (token, full_args, args) = split_command(&envelope.body, self.command_prefix);

        if let Some(spec) = self.registry.resolve(&token) {
            info!(
                command = spec.name(),
                origin = ?envelope.origin,
                sender = %envelope.sender.0,
                "received command"
            );
            self.run_command(spec, &envelope, token, args, full_args)
                .await;
            return;
        }

        match &self.agent {
            Some(agent) => {
                if let Err(e) = agent.run_turn(&envelope).await {
                    error!(error = %e, sender = %envelope.sender.0, "agent turn failed");
                    let notice = "The assistant could not process this message. Please try again.";
                    if let Err(e) = self
                        .transport
                        .send_text(&envelope.key.chat, notice, Some(&envelope.key))
                        .await
                    {
                        warn!(error = %e, "agent failure notice not delivered");
                    }
                }
            }
            None => debug!("no matching command and agents disabled, dropping event"),
        }
    }

    async fn run_command(
        &self,
        spec: &CommandSpec,
        envelope: &InboundEnvelope,
        command: String,
        args: Vec<String>,
        full_args: String,
    ) {
        let chat = CommandChat::new(self.transport.clone(), envelope);

        if let Some(rejection) = self.check_policy(spec, envelope, &args).await {
            if let Err(e) = chat.reply(&rejection).await {
                warn!(error = %e, "policy rejection notice not delivered");
            }
            return;
        }

        let inv = CommandInvocation {
            envelope: envelope.clone(),
            command,
            args,
            full_args,
            chat: chat.clone(),
        };

        if let Err(e) = spec.handler.run(inv).await {
            let err = crate::Error::Dispatch {
                command: spec.name().to_string(),
                message: e.to_string(),
            };
            error!(error = %err, "command handler failed");
            let notice = format!("Error when executing command: {}", spec.name());
            if let Err(e) = chat.reply(&notice).await {
                warn!(error = %e, "command error notice not delivered");
            }
        }
    }

    /// Declared-policy gate. Returns a user-facing rejection, or `None` when
    /// the command may run (in which case a cooldown stamp is recorded).
    async fn check_policy(
        &self,
        spec: &CommandSpec,
        envelope: &InboundEnvelope,
        args: &[String],
    ) -> Option<String> {
        if spec.group_only && envelope.origin != OriginKind::Group {
            return Some(format!("{} only works in group chats.", spec.name()));
        }
        if spec.private_only && envelope.origin != OriginKind::Private {
            return Some(format!("{} only works in private chat.", spec.name()));
        }
        if args.len() < spec.min_args {
            return Some(format!(
                "{} needs at least {} argument(s).",
                spec.name(),
                spec.min_args
            ));
        }

        if let Some(cooldown) = spec.cooldown {
            let key = (spec.name().to_string(), envelope.sender.0.clone());
            let mut stamps = self.cooldowns.lock().await;
            let now = Instant::now();
            if let Some(last) = stamps.get(&key) {
                let elapsed = now.duration_since(*last);
                if elapsed < cooldown {
                    let wait = cooldown - elapsed;
                    return Some(format!(
                        "Slow down: {} is on cooldown for {}s.",
                        spec.name(),
                        wait.as_secs().max(1)
                    ));
                }
            }
            stamps.insert(key, now);
        }

        None
    }
}

/// Tokenize a body on the first whitespace run: command candidate, raw
/// argument string, split argument tokens. A configured prefix char on the
/// candidate is ignored; the bare token is accepted either way.
fn split_command(body: &str, prefix: Option<char>) -> (String, String, Vec<String>) {
    let trimmed = body.trim();
    let token = trimmed.split_whitespace().next().unwrap_or("");
    let full_args = trimmed[token.len()..].trim().to_string();
    let args = full_args
        .split_whitespace()
        .map(|s| s.to_string())
        .collect();

    let token = match prefix {
        Some(p) => token.strip_prefix(p).unwrap_or(token),
        None => token,
    };

    (token.to_string(), full_args, args)
}
