//! Lifecycle of the single engine connection shared by all subscribers.
//!
//! The manager creates the connection lazily, replaces it when the engine
//! closes it, and tears everything down when it notices the process id has
//! changed since the connection was made (the process forked).

use std::fmt;
use std::iter;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::broadcast;

use crate::config::ProcessIdSource;
use crate::error::Error;
use crate::registry::SubscriptionRegistry;
use crate::session::{EventHandler, Session, SessionError, SessionEvent, SessionFactory};

/// The active engine session together with the bookkeeping needed to manage it.
#[derive(Clone)]
pub struct Connection {
    session: Arc<dyn Session>,
    generation: u64,
    process_id: u32,
}

impl Connection {
    /// The underlying engine session.
    pub fn session(&self) -> &Arc<dyn Session> {
        &self.session
    }

    /// Sequence number of this connection within its owner, starting at 1.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Id of the process that created this connection.
    pub fn process_id(&self) -> u32 {
        self.process_id
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("generation", &self.generation)
            .field("process_id", &self.process_id)
            .finish()
    }
}

/// Receiver of session events on behalf of the owning pub-sub instance.
///
/// Sessions only ever hold a [`Weak`] reference to the sink.
pub(crate) trait EventSink: Send + Sync {
    fn on_notification(self: Arc<Self>, channel: &str, payload: &str);
    fn on_close(self: Arc<Self>, generation: u64);
}

pub(crate) struct ConnectionManager {
    factory: Arc<dyn SessionFactory>,
    sink: Weak<dyn EventSink>,
    process_id: ProcessIdSource,
    poll_interval: Option<Duration>,
    sentinel_channel: String,
    reconnect: broadcast::Sender<Connection>,
    active: Option<Connection>,
    owner_pid: Option<u32>,
    generation: u64,
}

impl ConnectionManager {
    pub(crate) fn new(
        factory: Arc<dyn SessionFactory>,
        sink: Weak<dyn EventSink>,
        process_id: ProcessIdSource,
        poll_interval: Option<Duration>,
        sentinel_channel: String,
        reconnect: broadcast::Sender<Connection>,
    ) -> Self {
        Self {
            factory,
            sink,
            process_id,
            poll_interval,
            sentinel_channel,
            reconnect,
            active: None,
            owner_pid: None,
            generation: 0,
        }
    }

    pub(crate) fn active(&self) -> Option<&Connection> {
        self.active.as_ref()
    }

    /// Tear down if the process id changed since the connection was created.
    ///
    /// Subscriptions are cleared, not carried over: a forked child starts with
    /// an empty registry.
    pub(crate) fn check_fork(&mut self, registry: &mut SubscriptionRegistry) -> bool {
        let Some(owner_pid) = self.owner_pid else {
            return false;
        };
        let current_pid = self.process_id.get();
        if owner_pid == current_pid {
            return false;
        }

        tracing::info!(
            owner_pid,
            current_pid,
            channels = registry.len(),
            "process id changed; discarding connection and subscriptions"
        );
        self.teardown(registry);
        true
    }

    /// Return the active connection, creating one if there is none.
    pub(crate) fn get_connection(
        &mut self,
        registry: &mut SubscriptionRegistry,
    ) -> Result<Connection, Error> {
        self.check_fork(registry);

        if let Some(connection) = &self.active {
            return Ok(connection.clone());
        }

        let session = self.factory.open().map_err(Error::ConnectionCreation)?;
        let generation = self.generation + 1;
        session.on_event(self.handler(generation));

        if let Err(err) = self.prepare(session.as_ref(), registry) {
            session.detach();
            session.close();
            return Err(Error::ConnectionCreation(err));
        }

        let process_id = self.process_id.get();
        let connection = Connection {
            session,
            generation,
            process_id,
        };
        self.generation = generation;
        self.owner_pid = Some(process_id);
        self.active = Some(connection.clone());

        tracing::info!(
            generation,
            process_id,
            channels = registry.len(),
            "connection established"
        );

        // No receivers is not an error.
        let _ = self.reconnect.send(connection.clone());

        Ok(connection)
    }

    /// Release the connection closed by the engine.
    ///
    /// Returns false when `generation` is not the active connection, i.e. the
    /// close came from a connection that was already replaced or torn down.
    pub(crate) fn release(&mut self, generation: u64) -> bool {
        match &self.active {
            Some(connection) if connection.generation == generation => {
                if let Some(connection) = self.active.take() {
                    connection.session.detach();
                }
                tracing::debug!(generation, "connection closed by engine");
                true
            }
            _ => false,
        }
    }

    /// Detach and drop the connection, clearing every subscription.
    pub(crate) fn teardown(&mut self, registry: &mut SubscriptionRegistry) {
        if let Some(connection) = self.active.take() {
            connection.session.detach();
        }
        registry.clear();
        self.owner_pid = None;
    }

    /// Like [`teardown`](Self::teardown), but also closes the session.
    pub(crate) fn dispose(&mut self, registry: &mut SubscriptionRegistry) {
        if let Some(connection) = self.active.take() {
            connection.session.detach();
            connection.session.close();
            tracing::debug!(generation = connection.generation, "connection disposed");
        }
        registry.clear();
        self.owner_pid = None;
    }

    fn prepare(
        &self,
        session: &dyn Session,
        registry: &SubscriptionRegistry,
    ) -> Result<(), SessionError> {
        if let Some(interval) = self.poll_interval {
            session.set_poll_interval(interval)?;
        }
        for channel in registry
            .channels()
            .chain(iter::once(self.sentinel_channel.as_str()))
        {
            session.listen(channel)?;
        }
        Ok(())
    }

    fn handler(&self, generation: u64) -> EventHandler {
        let sink = self.sink.clone();
        Arc::new(move |event: &SessionEvent| {
            let Some(sink) = sink.upgrade() else {
                return;
            };
            match event {
                SessionEvent::Notification { channel, payload } => {
                    sink.on_notification(channel, payload)
                }
                SessionEvent::Close => sink.on_close(generation),
            }
        })
    }
}
