//! Sled sessions with poll-emulated notifications.
//!
//! Every session runs a tokio task that wakes once per poll interval, scans
//! the notification log past its cursor, and emits the rows on channels the
//! session listens to. A storage error while polling closes the session.

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, error, trace, warn};

use pollcast::{EventHandler, Session, SessionError, SessionEvent};

use crate::config::SledEngineConfig;
use crate::error::Error;
use crate::log::{now_ms, NotificationLog};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// A session over a sled notification log.
///
/// Dropping the last handle stops the poll task.
pub struct SledSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    id: u64,
    log: NotificationLog,
    retention: Option<Duration>,
    batch_size: usize,
    poll_interval_ms: AtomicU64,
    next_id: AtomicU64,
    channels: RwLock<HashSet<String>>,
    handlers: Mutex<Vec<EventHandler>>,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl SledSession {
    /// Open a session and start its poll task on the current tokio runtime.
    ///
    /// The session only sees notifications written after it was opened.
    pub fn open(log: NotificationLog, config: &SledEngineConfig) -> Result<Self, Error> {
        let runtime = Handle::try_current().map_err(|e| Error::NoRuntime(e.to_string()))?;
        let next_id = log.next_id()?;
        let (shutdown, shutdown_rx) = watch::channel(false);

        let inner = Arc::new(SessionInner {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::SeqCst),
            log,
            retention: config.retention,
            batch_size: config.batch_size.max(1),
            poll_interval_ms: AtomicU64::new(duration_ms(config.poll_interval)),
            next_id: AtomicU64::new(next_id),
            channels: RwLock::new(HashSet::new()),
            handlers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            shutdown,
        });

        runtime.spawn(poll_loop(Arc::downgrade(&inner), shutdown_rx));
        debug!(session = inner.id, next_id, "sled session opened");

        Ok(Self { inner })
    }

    /// Session id, unique within the process.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Check whether the session has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Current poll interval.
    pub fn poll_interval(&self) -> Duration {
        self.inner.poll_interval()
    }

    /// Run one poll pass immediately. Returns the number of notifications emitted.
    pub fn poll_now(&self) -> Result<usize, Error> {
        self.inner.poll_once()
    }
}

impl Session for SledSession {
    fn listen(&self, channel: &str) -> Result<(), SessionError> {
        self.inner.ensure_open()?;
        self.inner.channels.write().insert(channel.to_string());
        trace!(session = self.inner.id, channel, "LISTEN");
        Ok(())
    }

    fn unlisten(&self, channel: &str) -> Result<(), SessionError> {
        self.inner.ensure_open()?;
        self.inner.channels.write().remove(channel);
        trace!(session = self.inner.id, channel, "UNLISTEN");
        Ok(())
    }

    fn notify(&self, channel: &str, payload: &str) -> Result<(), SessionError> {
        self.inner.ensure_open()?;
        let id = self.inner.log.append(channel, payload)?;
        trace!(session = self.inner.id, channel, id, "NOTIFY");
        Ok(())
    }

    fn set_poll_interval(&self, interval: Duration) -> Result<(), SessionError> {
        self.inner.ensure_open()?;
        self.inner
            .poll_interval_ms
            .store(duration_ms(interval), Ordering::SeqCst);
        Ok(())
    }

    fn on_event(&self, handler: EventHandler) {
        self.inner.handlers.lock().push(handler);
    }

    fn detach(&self) {
        self.inner.handlers.lock().clear();
    }

    fn close(&self) {
        self.inner.close();
    }
}

impl SessionInner {
    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(SessionError::Closed)
        } else {
            Ok(())
        }
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.load(Ordering::SeqCst))
    }

    fn poll_once(&self) -> Result<usize, Error> {
        let from_id = self.next_id.load(Ordering::SeqCst);
        let records = self.log.read_from(from_id, self.batch_size)?;

        let mut delivered = 0;
        for record in records {
            self.next_id.store(record.id + 1, Ordering::SeqCst);
            if self.closed.load(Ordering::SeqCst) {
                break;
            }
            if !self.channels.read().contains(&record.channel) {
                continue;
            }
            self.emit(&SessionEvent::Notification {
                channel: record.channel,
                payload: record.payload,
            });
            delivered += 1;
        }

        if let Some(retention) = self.retention {
            let cutoff = now_ms().saturating_sub(duration_ms(retention));
            let pruned = self.log.prune_before(cutoff, self.batch_size)?;
            if pruned > 0 {
                trace!(session = self.id, pruned, "pruned expired notifications");
            }
        }

        Ok(delivered)
    }

    fn emit(&self, event: &SessionEvent) {
        let handlers = self.handlers.lock().clone();
        for handler in handlers {
            if panic::catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                warn!(session = self.id, "session event handler panicked");
            }
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown.send(true);
        debug!(session = self.id, "sled session closed");
        self.emit(&SessionEvent::Close);
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

async fn poll_loop(session: Weak<SessionInner>, mut shutdown: watch::Receiver<bool>) {
    loop {
        let interval = match session.upgrade() {
            Some(session) => session.poll_interval(),
            None => return,
        };

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => return,
        }

        let Some(session) = session.upgrade() else {
            return;
        };
        if session.closed.load(Ordering::SeqCst) {
            return;
        }

        match session.poll_once() {
            Ok(delivered) => {
                if delivered > 0 {
                    trace!(session = session.id, delivered, "poll delivered notifications");
                }
            }
            Err(err) => {
                error!(session = session.id, error = %err, "notification poll failed; closing session");
                session.close();
                return;
            }
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX).max(1)
}
