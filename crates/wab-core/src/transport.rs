use async_trait::async_trait;

use crate::{
    domain::{ChatJid, EventKey},
    wire::MediaRef,
    Result,
};

/// Feature flags of a transport implementation.
#[derive(Clone, Copy, Debug)]
pub struct TransportCapabilities {
    pub supports_reactions: bool,
    pub supports_quoting: bool,
    pub supports_media_download: bool,
}

/// Port for the messaging platform connection.
///
/// The WhatsApp bridge is the first implementation; the shape is small enough
/// that a future adapter for another chat platform fits behind it unchanged.
#[async_trait]
pub trait TransportPort: Send + Sync {
    fn capabilities(&self) -> TransportCapabilities;

    /// Send a text message, optionally quoting an earlier event.
    async fn send_text(&self, chat: &ChatJid, text: &str, quote: Option<&EventKey>) -> Result<()>;

    async fn react(&self, key: &EventKey, emoji: &str) -> Result<()>;

    /// Read-receipt acknowledgment for inbound events.
    async fn mark_read(&self, keys: &[EventKey]) -> Result<()>;

    async fn download_media(&self, media: &MediaRef) -> Result<Vec<u8>>;
}
