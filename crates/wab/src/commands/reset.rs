use async_trait::async_trait;

use wab_core::{
    dispatch::CommandInvocation,
    registry::CommandHandler,
    state::ChatStore,
    Result,
};

/// Clear the sender's conversation history (identity fields survive).
pub struct Reset {
    pub store: ChatStore,
}

#[async_trait]
impl CommandHandler for Reset {
    async fn run(&self, inv: CommandInvocation) -> Result<()> {
        self.store.reset(&inv.envelope.sender).await?;
        inv.chat.reply("Chat state has been reset.").await
    }
}
