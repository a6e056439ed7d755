//! Command-line arguments and the configuration derived from them.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use pollcast::PubSubConfig;
use pollcast_sled::SledEngineConfig;

/// Default engine poll interval in milliseconds.
pub const DEFAULT_ENGINE_POLL_MS: u64 = 250;

/// Default notification retention in seconds.
pub const DEFAULT_RETENTION_SECS: u64 = 300;

/// Pollcast command-line client.
#[derive(Parser, Debug)]
#[command(name = "pollcast")]
#[command(version, about = "Listen and notify on a sled-backed pollcast database")]
pub struct Args {
    /// Path to the database directory.
    #[arg(short, long, default_value = "./data")]
    pub data_path: PathBuf,

    /// Engine poll interval in milliseconds.
    #[arg(long, default_value_t = DEFAULT_ENGINE_POLL_MS)]
    pub engine_poll_ms: u64,

    /// Poll interval override forwarded to every session, in milliseconds.
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,

    /// Notification retention in seconds. Set to 0 to keep rows forever.
    #[arg(long, default_value_t = DEFAULT_RETENTION_SECS)]
    pub retention_secs: u64,

    /// Encode and decode payloads on this channel as JSON (repeatable).
    #[arg(long = "json", value_name = "CHANNEL")]
    pub json_channels: Vec<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print notifications on the given channels until interrupted.
    Listen {
        /// Channels to listen on.
        #[arg(required = true)]
        channels: Vec<String>,
    },
    /// Send one notification.
    Notify {
        /// Channel to notify.
        channel: String,
        /// Payload text, or a JSON document for JSON channels.
        payload: String,
    },
    /// Listen on channels and send each stdin line `<channel> <payload>`.
    Pipe {
        /// Channels to listen on.
        channels: Vec<String>,
    },
}

/// Configuration for one CLI run.
#[derive(Debug, Clone)]
pub struct CliConfig {
    /// Sled engine configuration.
    pub engine: SledEngineConfig,
    /// Pub-sub configuration.
    pub pubsub: PubSubConfig,
    /// Channels with JSON enabled.
    pub json_channels: Vec<String>,
    /// What to do.
    pub command: Command,
}

impl Args {
    /// Convert command-line arguments to a run configuration.
    pub fn into_config(self) -> CliConfig {
        let mut engine = SledEngineConfig::new(self.data_path)
            .with_poll_interval(Duration::from_millis(self.engine_poll_ms.max(1)));
        engine = if self.retention_secs == 0 {
            engine.without_retention()
        } else {
            engine.with_retention(Duration::from_secs(self.retention_secs))
        };

        let mut pubsub = PubSubConfig::new();
        if let Some(ms) = self.poll_interval_ms {
            pubsub = pubsub.with_poll_interval(Duration::from_millis(ms));
        }

        CliConfig {
            engine,
            pubsub,
            json_channels: self.json_channels,
            command: self.command,
        }
    }
}
