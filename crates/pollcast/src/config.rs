//! Pub-sub configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Error;

/// Default name of the always-listened keepalive channel.
pub const DEFAULT_SENTINEL_CHANNEL: &str = "pollcast:keepalive";

/// Default buffer size of the reconnect broadcast channel.
pub const DEFAULT_RECONNECT_CAPACITY: usize = 16;

/// What to do with a notification whose payload fails JSON decoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DecodeFailure {
    /// Skip the notification; no listener is invoked.
    #[default]
    Drop,
    /// Deliver the raw text as [`Payload::Text`](crate::Payload::Text).
    DeliverRaw,
}

/// Source of the current process id, compared on every connection access to
/// detect a fork.
#[derive(Clone)]
pub struct ProcessIdSource(Arc<dyn Fn() -> u32 + Send + Sync>);

impl ProcessIdSource {
    /// Read the id of the running process.
    pub fn current() -> Self {
        Self(Arc::new(std::process::id))
    }

    /// Read the process id from a custom function.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() -> u32 + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Get the current process id.
    pub fn get(&self) -> u32 {
        (self.0)()
    }
}

impl Default for ProcessIdSource {
    fn default() -> Self {
        Self::current()
    }
}

impl fmt::Debug for ProcessIdSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ProcessIdSource").field(&self.get()).finish()
    }
}

/// Pub-sub configuration.
#[derive(Debug, Clone)]
pub struct PubSubConfig {
    /// Poll interval forwarded to every new session. None keeps the engine default.
    pub poll_interval: Option<Duration>,

    /// Reserved channel every connection listens on.
    pub sentinel_channel: String,

    /// Handling of payloads that fail JSON decoding.
    pub decode_failure: DecodeFailure,

    /// Buffer size of the reconnect broadcast channel.
    pub reconnect_capacity: usize,

    /// Source of the current process id.
    pub process_id: ProcessIdSource,
}

impl PubSubConfig {
    /// Create a configuration with engine defaults.
    pub fn new() -> Self {
        Self {
            poll_interval: None,
            sentinel_channel: DEFAULT_SENTINEL_CHANNEL.to_string(),
            decode_failure: DecodeFailure::default(),
            reconnect_capacity: DEFAULT_RECONNECT_CAPACITY,
            process_id: ProcessIdSource::current(),
        }
    }

    /// Set the poll interval override.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Set the sentinel channel name.
    pub fn with_sentinel_channel(mut self, channel: impl Into<String>) -> Self {
        self.sentinel_channel = channel.into();
        self
    }

    /// Set the decode failure policy.
    pub fn with_decode_failure(mut self, policy: DecodeFailure) -> Self {
        self.decode_failure = policy;
        self
    }

    /// Set the reconnect broadcast capacity.
    pub fn with_reconnect_capacity(mut self, capacity: usize) -> Self {
        self.reconnect_capacity = capacity.max(1);
        self
    }

    /// Set the process id source.
    pub fn with_process_id(mut self, source: ProcessIdSource) -> Self {
        self.process_id = source;
        self
    }

    /// Check the configuration for values the engine cannot accept.
    pub fn validate(&self) -> Result<(), Error> {
        if self.poll_interval.is_some_and(|interval| interval.is_zero()) {
            return Err(Error::Config("poll interval must be positive".to_string()));
        }
        if self.sentinel_channel.is_empty() {
            return Err(Error::Config("sentinel channel must not be empty".to_string()));
        }
        Ok(())
    }
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_default_config() {
        let config = PubSubConfig::default();
        assert!(config.poll_interval.is_none());
        assert_eq!(config.sentinel_channel, DEFAULT_SENTINEL_CHANNEL);
        assert_eq!(config.decode_failure, DecodeFailure::Drop);
        assert_eq!(config.reconnect_capacity, DEFAULT_RECONNECT_CAPACITY);
        assert_eq!(config.process_id.get(), std::process::id());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = PubSubConfig::new()
            .with_poll_interval(Duration::from_millis(50))
            .with_sentinel_channel("keepalive")
            .with_decode_failure(DecodeFailure::DeliverRaw)
            .with_reconnect_capacity(0);

        assert_eq!(config.poll_interval, Some(Duration::from_millis(50)));
        assert_eq!(config.sentinel_channel, "keepalive");
        assert_eq!(config.decode_failure, DecodeFailure::DeliverRaw);
        assert_eq!(config.reconnect_capacity, 1);
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let config = PubSubConfig::new().with_poll_interval(Duration::ZERO);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_custom_process_id() {
        let pid = Arc::new(AtomicU32::new(7));
        let source = {
            let pid = pid.clone();
            ProcessIdSource::from_fn(move || pid.load(Ordering::SeqCst))
        };
        assert_eq!(source.get(), 7);
        pid.store(8, Ordering::SeqCst);
        assert_eq!(source.get(), 8);
    }
}
