//! Pub-sub error types.

use thiserror::Error;

use crate::session::SessionError;

/// Pub-sub errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Opening a new engine session failed.
    #[error("failed to create connection: {0}")]
    ConnectionCreation(#[source] SessionError),

    /// An established session rejected a LISTEN, UNLISTEN or NOTIFY request.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// A payload could not be serialized for a JSON-enabled channel.
    #[error("failed to encode payload for channel '{channel}': {source}")]
    Encode {
        /// Channel the payload was addressed to.
        channel: String,
        /// Underlying serializer error.
        #[source]
        source: serde_json::Error,
    },

    /// A structured payload was sent on a channel without JSON enabled.
    #[error("channel '{0}' is not JSON-enabled; payload must be text")]
    PayloadNotText(String),

    /// The channel name is reserved for internal use.
    #[error("channel '{0}' is reserved")]
    ReservedChannel(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}
