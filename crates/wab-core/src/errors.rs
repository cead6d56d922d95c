/// Core error type for the bot.
///
/// Adapter crates map their specific failures into this type so the core can
/// apply one propagation policy per class: decode and registration failures
/// stay local, provider and dispatch failures are turn-scoped.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("command registration error: {0}")]
    Registration(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("history index {index} out of bounds (len {len})")]
    Index { index: usize, len: usize },

    #[error("provider error: {0}")]
    Provider(String),

    #[error("dispatch error in command `{command}`: {message}")]
    Dispatch { command: String, message: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
