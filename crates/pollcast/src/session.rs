//! Engine session interface.
//!
//! A session is one stateful handle to the underlying storage engine. The engine
//! has no native notification mechanism, so a session emulates one by polling
//! and reports what it finds through [`SessionEvent`]s delivered to the handlers
//! registered with [`Session::on_event`].

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Boxed error type carried by engine failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors reported by an engine session or session factory.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session has been closed.
    #[error("session is closed")]
    Closed,

    /// The engine reported an error.
    #[error("engine error: {0}")]
    Engine(#[source] BoxError),
}

impl SessionError {
    /// Create an engine error from anything convertible into a boxed error.
    pub fn engine(err: impl Into<BoxError>) -> Self {
        Self::Engine(err.into())
    }
}

/// An event emitted asynchronously by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A notification row was observed on a listened channel.
    Notification {
        /// Channel the notification was sent on.
        channel: String,
        /// Raw text payload as stored by the engine.
        payload: String,
    },
    /// The session was closed and will emit nothing further.
    Close,
}

/// Handler invoked for every event a session emits.
pub type EventHandler = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// A stateful handle to the storage engine.
///
/// Implementations must not deliver events synchronously from inside
/// `listen`, `unlisten`, `set_poll_interval` or `on_event`.
pub trait Session: Send + Sync {
    /// Start delivering notifications for `channel`.
    fn listen(&self, channel: &str) -> Result<(), SessionError>;

    /// Stop delivering notifications for `channel`.
    fn unlisten(&self, channel: &str) -> Result<(), SessionError>;

    /// Publish a text payload on `channel`.
    fn notify(&self, channel: &str, payload: &str) -> Result<(), SessionError>;

    /// Override how often the session polls for new notifications.
    fn set_poll_interval(&self, interval: Duration) -> Result<(), SessionError>;

    /// Register a handler for notification and close events.
    fn on_event(&self, handler: EventHandler);

    /// Drop every registered handler.
    fn detach(&self);

    /// Shut the session down. Fires [`SessionEvent::Close`] at most once.
    fn close(&self);
}

/// Opens engine sessions.
pub trait SessionFactory: Send + Sync {
    /// Open a new session.
    fn open(&self) -> Result<Arc<dyn Session>, SessionError>;
}

impl<F> SessionFactory for F
where
    F: Fn() -> Result<Arc<dyn Session>, SessionError> + Send + Sync,
{
    fn open(&self) -> Result<Arc<dyn Session>, SessionError> {
        self()
    }
}
