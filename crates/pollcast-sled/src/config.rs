//! Sled engine configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Default interval between notification polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Default age after which notification rows are pruned (5 minutes).
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(300);

/// Default maximum rows scanned per poll.
pub const DEFAULT_BATCH_SIZE: usize = 256;

/// Sled engine configuration.
#[derive(Debug, Clone)]
pub struct SledEngineConfig {
    /// Path to the database directory. None opens a temporary database.
    pub path: Option<PathBuf>,

    /// Poll interval used until a session overrides it.
    pub poll_interval: Duration,

    /// Notification rows older than this are removed while polling.
    /// None keeps rows forever.
    pub retention: Option<Duration>,

    /// Maximum rows scanned per poll.
    pub batch_size: usize,
}

impl SledEngineConfig {
    /// Create a configuration for a database at the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::temporary()
        }
    }

    /// Create a configuration for a temporary database, removed on drop.
    pub fn temporary() -> Self {
        Self {
            path: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            retention: Some(DEFAULT_RETENTION),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Set the default poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the retention window.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = Some(retention);
        self
    }

    /// Keep notification rows forever.
    pub fn without_retention(mut self) -> Self {
        self.retention = None;
        self
    }

    /// Set the batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Convert to a sled configuration.
    pub fn to_sled_config(&self) -> sled::Config {
        match &self.path {
            Some(path) => sled::Config::new().path(path),
            None => sled::Config::new().temporary(true),
        }
    }
}

impl Default for SledEngineConfig {
    fn default() -> Self {
        Self::temporary()
    }
}
