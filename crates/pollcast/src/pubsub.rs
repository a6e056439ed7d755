//! The public pub-sub handle.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::codec::{CodecPolicy, Payload};
use crate::config::PubSubConfig;
use crate::connection::{Connection, ConnectionManager, EventSink};
use crate::dispatcher;
use crate::error::Error;
use crate::registry::{Listener, SubscriptionRegistry};
use crate::session::SessionFactory;

pub(crate) struct State {
    pub(crate) manager: ConnectionManager,
    pub(crate) registry: SubscriptionRegistry,
    pub(crate) codec: CodecPolicy,
}

pub(crate) struct Shared {
    pub(crate) config: PubSubConfig,
    pub(crate) state: Mutex<State>,
    reconnect: broadcast::Sender<Connection>,
}

impl EventSink for Shared {
    fn on_notification(self: Arc<Self>, channel: &str, payload: &str) {
        dispatcher::dispatch(&PubSub { shared: self }, channel, payload);
    }

    fn on_close(self: Arc<Self>, generation: u64) {
        let mut state = self.state.lock();
        let State {
            manager, registry, ..
        } = &mut *state;

        if !manager.release(generation) {
            return;
        }
        if let Err(err) = manager.get_connection(registry) {
            tracing::warn!(
                error = %err,
                "reconnection after close failed; retrying on next use"
            );
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let State {
            manager, registry, ..
        } = self.state.get_mut();
        manager.dispose(registry);
    }
}

/// Publish/subscribe multiplexer over a single engine session.
///
/// All listeners share one connection, created on first use. When the engine
/// closes it a replacement is opened and every channel is listened again. If
/// the process id changes (the process forked), the connection and all
/// subscriptions are discarded and the next call starts from scratch.
///
/// Cloning is cheap; clones share the same connection and subscriptions.
#[derive(Clone)]
pub struct PubSub {
    pub(crate) shared: Arc<Shared>,
}

impl PubSub {
    /// Create a pub-sub instance with the default configuration.
    pub fn new(factory: impl SessionFactory + 'static) -> Self {
        Self::build(Arc::new(factory), PubSubConfig::default())
    }

    /// Create a pub-sub instance with a custom configuration.
    pub fn with_config(
        factory: impl SessionFactory + 'static,
        config: PubSubConfig,
    ) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self::build(Arc::new(factory), config))
    }

    fn build(factory: Arc<dyn SessionFactory>, config: PubSubConfig) -> Self {
        let (reconnect, _) = broadcast::channel(config.reconnect_capacity);

        let shared = Arc::new_cyclic(|weak: &Weak<Shared>| {
            let sink: Weak<dyn EventSink> = weak.clone();
            let manager = ConnectionManager::new(
                factory,
                sink,
                config.process_id.clone(),
                config.poll_interval,
                config.sentinel_channel.clone(),
                reconnect.clone(),
            );
            Shared {
                config,
                state: Mutex::new(State {
                    manager,
                    registry: SubscriptionRegistry::new(),
                    codec: CodecPolicy::new(),
                }),
                reconnect,
            }
        });

        Self { shared }
    }

    /// Register a listener on a channel.
    ///
    /// The first listener on a channel makes the connection LISTEN on it,
    /// opening the connection if needed. Registering the same listener twice
    /// makes it fire twice per notification. Returns the listener as the token
    /// for [`unlisten`](Self::unlisten).
    pub fn listen(&self, channel: &str, listener: Listener) -> Result<Listener, Error> {
        self.ensure_not_reserved(channel)?;

        let mut state = self.shared.state.lock();
        let State {
            manager, registry, ..
        } = &mut *state;
        manager.check_fork(registry);

        if !registry.contains(channel) {
            let connection = manager.get_connection(registry)?;
            connection.session().listen(channel)?;
            tracing::debug!(channel, generation = connection.generation(), "listening");
        }

        registry.register(channel, listener.clone());
        Ok(listener)
    }

    /// Remove a listener, or every listener on the channel when `None`.
    ///
    /// When the channel has no listeners left the connection stops listening
    /// on it. The removal stands even if the engine rejects the UNLISTEN; the
    /// failure is logged, and a stray engine subscription with no listeners
    /// delivers nothing.
    pub fn unlisten(&self, channel: &str, listener: Option<&Listener>) -> Result<(), Error> {
        self.ensure_not_reserved(channel)?;

        let mut state = self.shared.state.lock();
        let State {
            manager, registry, ..
        } = &mut *state;
        manager.check_fork(registry);

        if !registry.deregister(channel, listener) {
            return Ok(());
        }
        if let Some(connection) = manager.active() {
            match connection.session().unlisten(channel) {
                Ok(()) => {
                    tracing::debug!(channel, generation = connection.generation(), "unlistened")
                }
                Err(err) => tracing::warn!(
                    channel,
                    generation = connection.generation(),
                    error = %err,
                    "engine unlisten failed; listeners already removed"
                ),
            }
        }
        Ok(())
    }

    /// Send a notification on a channel.
    ///
    /// The payload is encoded before any engine I/O, so encoding failures
    /// leave the connection untouched.
    pub fn notify(&self, channel: &str, payload: impl Into<Payload>) -> Result<(), Error> {
        let payload = payload.into();

        let (connection, encoded) = {
            let mut state = self.shared.state.lock();
            let State {
                manager,
                registry,
                codec,
            } = &mut *state;
            let encoded = codec.encode(channel, &payload)?;
            (manager.get_connection(registry)?, encoded)
        };

        connection.session().notify(channel, &encoded)?;
        Ok(())
    }

    /// Serialize a value and send it on a JSON-enabled channel.
    pub fn notify_json<T: Serialize + ?Sized>(&self, channel: &str, value: &T) -> Result<(), Error> {
        let value = serde_json::to_value(value).map_err(|source| Error::Encode {
            channel: channel.to_string(),
            source,
        })?;
        self.notify(channel, Payload::Json(value))
    }

    /// Enable JSON encoding and decoding for a channel.
    pub fn json(&self, channel: &str) -> &Self {
        self.shared.state.lock().codec.enable_json(channel);
        self
    }

    /// Get the active connection, creating it if needed.
    pub fn connection(&self) -> Result<Connection, Error> {
        let mut state = self.shared.state.lock();
        let State {
            manager, registry, ..
        } = &mut *state;
        manager.get_connection(registry)
    }

    /// Check whether a connection is currently cached.
    pub fn is_connected(&self) -> bool {
        self.shared.state.lock().manager.active().is_some()
    }

    /// Receive every connection that becomes active from now on.
    pub fn subscribe_reconnect(&self) -> broadcast::Receiver<Connection> {
        self.shared.reconnect.subscribe()
    }

    /// Names of channels with at least one listener.
    pub fn channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self
            .shared
            .state
            .lock()
            .registry
            .channels()
            .map(str::to_string)
            .collect();
        channels.sort();
        channels
    }

    /// Number of listener entries on a channel.
    pub fn listener_count(&self, channel: &str) -> usize {
        self.shared.state.lock().registry.listener_count(channel)
    }

    /// Close the connection and drop every subscription.
    ///
    /// The instance stays usable; the next call opens a fresh connection.
    pub fn dispose(&self) {
        let mut state = self.shared.state.lock();
        let State {
            manager, registry, ..
        } = &mut *state;
        manager.dispose(registry);
    }

    fn ensure_not_reserved(&self, channel: &str) -> Result<(), Error> {
        if channel == self.shared.config.sentinel_channel {
            return Err(Error::ReservedChannel(channel.to_string()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for PubSub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("PubSub")
            .field("channels", &state.registry.len())
            .field("connection", &state.manager.active())
            .finish()
    }
}
