use async_trait::async_trait;

use crate::{state::ConversationTurn, Result};

/// Capabilities of a completion provider implementation.
#[derive(Clone, Copy, Debug)]
pub struct CompletionCapabilities {
    pub supports_tools: bool,
    pub supports_vision: bool,
}

/// One inference call over an ordered history.
#[derive(Clone, Debug)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub messages: Vec<ConversationTurn>,
    pub enable_tools: bool,
    /// Upper bound on model invocations within one call (tool loop included).
    pub max_steps: u32,
    /// Upper bound on transport-level retries per model invocation.
    pub max_retries: u32,
}

/// Result of one inference call.
///
/// `messages` is every turn the provider generated, in order: assistant
/// tool-call turns, tool-result turns, and the final answer. Callers append
/// them to history verbatim.
#[derive(Clone, Debug)]
pub struct CompletionOutput {
    pub text: String,
    pub messages: Vec<ConversationTurn>,
}

/// Port for the LLM completion provider.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    fn capabilities(&self) -> CompletionCapabilities;

    async fn generate(&self, req: CompletionRequest) -> Result<CompletionOutput>;
}
