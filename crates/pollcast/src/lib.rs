//! Pollcast - publish/subscribe over a storage engine without native notifications.
//!
//! Many logical subscribers share one engine session. The session emulates
//! notifications by polling; this crate multiplexes channels over it, keeps it
//! alive across engine-side closes, resets it after a fork, and optionally
//! encodes payloads as JSON per channel.
//!
//! # Quick Start
//!
//! ```
//! use pollcast::memory::MemoryEngine;
//! use pollcast::{Listener, PubSub};
//!
//! let pubsub = PubSub::new(MemoryEngine::new());
//!
//! let token = pubsub
//!     .listen("jobs", Listener::new(|_, payload| {
//!         println!("received {:?}", payload);
//!     }))
//!     .unwrap();
//!
//! pubsub.notify("jobs", "started").unwrap();
//! pubsub.unlisten("jobs", Some(&token)).unwrap();
//! ```

pub mod codec;
pub mod config;
pub mod connection;
mod dispatcher;
pub mod error;
pub mod memory;
pub mod pubsub;
pub mod registry;
pub mod session;

pub use codec::{CodecPolicy, Payload};
pub use config::{DecodeFailure, ProcessIdSource, PubSubConfig, DEFAULT_SENTINEL_CHANNEL};
pub use connection::Connection;
pub use error::Error;
pub use pubsub::PubSub;
pub use registry::{Listener, SubscriptionRegistry};
pub use session::{BoxError, EventHandler, Session, SessionError, SessionEvent, SessionFactory};
