//! CLI error types.

use thiserror::Error;

/// CLI errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Engine error.
    #[error("engine error: {0}")]
    Engine(#[from] pollcast_sled::Error),

    /// Pub-sub error.
    #[error("pub-sub error: {0}")]
    PubSub(#[from] pollcast::Error),

    /// A payload given for a JSON channel is not valid JSON.
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A `pipe` input line without a payload.
    #[error("expected '<channel> <payload>', got '{0}'")]
    InvalidLine(String),
}
