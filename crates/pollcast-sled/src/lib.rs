//! Pollcast Sled - a sled-backed engine for pollcast.
//!
//! Sled has no notification mechanism, so NOTIFY appends a row to a
//! notification tree and every session polls that tree for rows on the
//! channels it listens to.
//!
//! # Quick Start
//!
//! ```ignore
//! use pollcast::{Listener, PubSub};
//! use pollcast_sled::{SledEngine, SledEngineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = SledEngine::new(SledEngineConfig::new("./data"))?;
//!     let pubsub = PubSub::new(engine);
//!
//!     pubsub.listen("jobs", Listener::new(|_, payload| println!("{:?}", payload)))?;
//!     pubsub.notify("jobs", "started")?;
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(1)).await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod log;
pub mod session;

pub use config::SledEngineConfig;
pub use engine::SledEngine;
pub use error::Error;
pub use log::{NotificationLog, NotificationRecord, NOTIFICATIONS_TREE};
pub use session::SledSession;
