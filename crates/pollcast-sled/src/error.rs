//! Sled engine error types.

use pollcast::SessionError;
use thiserror::Error;

/// Sled engine errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Notification record could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Key decoding error.
    #[error("invalid notification key")]
    InvalidKey,

    /// Sessions poll from a tokio task and need a runtime to spawn it on.
    #[error("no tokio runtime available: {0}")]
    NoRuntime(String),
}

impl From<Error> for SessionError {
    fn from(err: Error) -> Self {
        SessionError::engine(err)
    }
}
