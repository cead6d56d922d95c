//! NDJSON frames exchanged with the bridge process.
//!
//! stdout (bridge -> bot): one `BridgeFrame` per line.
//! stdin (bot -> bridge): one `BridgeCommand` per line; the bridge answers
//! each command with a `response` frame correlated by `id`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use wab_core::{
    domain::{ChatJid, EventKey},
    wire::{EventBatch, MediaRef},
};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum BridgeFrame {
    /// A batch of inbound platform events.
    Batch {
        #[serde(flatten)]
        batch: EventBatch,
    },
    /// Ack for one command.
    Response {
        id: u64,
        ok: bool,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        data: Option<Value>,
    },
    /// Connection lifecycle. `logged_out` means the credentials are gone and
    /// reconnecting is pointless.
    Status {
        connection: ConnectionState,
        #[serde(default)]
        logged_out: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Open,
    Close,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BridgeCommand {
    Send {
        id: u64,
        chat: ChatJid,
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        quote: Option<EventKey>,
    },
    React {
        id: u64,
        key: EventKey,
        emoji: String,
    },
    Read {
        id: u64,
        keys: Vec<EventKey>,
    },
    Download {
        id: u64,
        media: MediaRef,
    },
}

impl BridgeCommand {
    pub fn id(&self) -> u64 {
        match self {
            BridgeCommand::Send { id, .. }
            | BridgeCommand::React { id, .. }
            | BridgeCommand::Read { id, .. }
            | BridgeCommand::Download { id, .. } => *id,
        }
    }
}
