use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use wab_core::{
    dispatch::CommandInvocation,
    registry::CommandHandler,
    Result,
};

/// Round-trip latency: now minus the platform delivery timestamp.
pub struct Ping;

#[async_trait]
impl CommandHandler for Ping {
    async fn run(&self, inv: CommandInvocation) -> Result<()> {
        let Some(ts) = inv.envelope.timestamp else {
            return inv.chat.reply("message carried no timestamp").await;
        };

        let elapsed_ms = Utc::now().timestamp_millis() - ts * 1000;
        let elapsed = (elapsed_ms.max(0) as f64) / 1000.0;

        let value = serde_json::to_string_pretty(&json!({
            "ping": format!("*_{elapsed:.3} second(s)_*"),
            "raw": ts.to_string(),
        }))?;
        inv.chat.reply(&value).await
    }
}
