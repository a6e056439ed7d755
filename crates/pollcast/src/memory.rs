//! In-memory engine.
//!
//! Sessions opened from one [`MemoryEngine`] share a loopback bus: a NOTIFY on
//! any session is delivered synchronously to every open session listening on
//! that channel. Every call is recorded so tests can assert on the exact
//! sequence of LISTEN/UNLISTEN/NOTIFY requests.
//!
//! The engine keeps a session only while it is open and held by someone
//! else; closed or abandoned sessions are dropped on the next `open`.

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::session::{EventHandler, Session, SessionError, SessionEvent, SessionFactory};

/// A request observed by the in-memory engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCall {
    /// A session was opened.
    Open { session: u64 },
    /// The poll interval of a session was overridden.
    SetPollInterval { session: u64, interval: Duration },
    /// LISTEN.
    Listen { session: u64, channel: String },
    /// UNLISTEN.
    Unlisten { session: u64, channel: String },
    /// NOTIFY.
    Notify {
        session: u64,
        channel: String,
        payload: String,
    },
    /// A session was closed.
    Close { session: u64 },
}

#[derive(Default)]
struct EngineState {
    sessions: Mutex<Vec<Arc<MemorySession>>>,
    calls: Mutex<Vec<SessionCall>>,
    next_session_id: AtomicU64,
    pending_failures: AtomicUsize,
}

impl EngineState {
    fn record(&self, call: SessionCall) {
        self.calls.lock().push(call);
    }
}

/// Session factory for the in-memory engine.
#[derive(Clone, Default)]
pub struct MemoryEngine {
    state: Arc<EngineState>,
}

impl MemoryEngine {
    /// Create an engine with no sessions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` calls to `open` fail.
    pub fn fail_next_opens(&self, count: usize) {
        self.state.pending_failures.store(count, Ordering::SeqCst);
    }

    /// Number of sessions opened so far.
    pub fn open_count(&self) -> usize {
        self.state.next_session_id.load(Ordering::SeqCst) as usize
    }

    /// Number of sessions the engine still tracks.
    pub fn session_count(&self) -> usize {
        self.state.sessions.lock().len()
    }

    /// Get a tracked session by id. Ids start at 1.
    pub fn session(&self, id: u64) -> Option<Arc<MemorySession>> {
        self.state
            .sessions
            .lock()
            .iter()
            .find(|session| session.id == id)
            .cloned()
    }

    /// The most recently opened session.
    pub fn latest(&self) -> Option<Arc<MemorySession>> {
        self.state.sessions.lock().last().cloned()
    }

    /// Every call recorded so far, in order.
    pub fn calls(&self) -> Vec<SessionCall> {
        self.state.calls.lock().clone()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        self.state.calls.lock().clear();
    }

    /// Count LISTEN calls for a channel across all sessions.
    pub fn listen_count(&self, channel: &str) -> usize {
        self.state
            .calls
            .lock()
            .iter()
            .filter(|call| matches!(call, SessionCall::Listen { channel: c, .. } if c == channel))
            .count()
    }

    /// Count UNLISTEN calls for a channel across all sessions.
    pub fn unlisten_count(&self, channel: &str) -> usize {
        self.state
            .calls
            .lock()
            .iter()
            .filter(|call| matches!(call, SessionCall::Unlisten { channel: c, .. } if c == channel))
            .count()
    }

    /// Payloads sent with NOTIFY on a channel, in order.
    pub fn notified(&self, channel: &str) -> Vec<String> {
        self.state
            .calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                SessionCall::Notify {
                    channel: c,
                    payload,
                    ..
                } if c == channel => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }

    fn take_failure(&self) -> bool {
        self.state
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn deliver(&self, channel: &str, payload: &str) {
        let listeners: Vec<Arc<MemorySession>> = self
            .state
            .sessions
            .lock()
            .iter()
            .filter(|session| session.is_listening(channel))
            .cloned()
            .collect();

        let event = SessionEvent::Notification {
            channel: channel.to_string(),
            payload: payload.to_string(),
        };
        let mut first_panic = None;

        for session in listeners {
            if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| session.fire(&event))) {
                tracing::warn!(session = session.id, channel, "loopback delivery panicked");
                first_panic.get_or_insert(panic);
            }
        }

        if let Some(panic) = first_panic {
            panic::resume_unwind(panic);
        }
    }
}

impl SessionFactory for MemoryEngine {
    fn open(&self) -> Result<Arc<dyn Session>, SessionError> {
        if self.take_failure() {
            return Err(SessionError::engine("injected open failure"));
        }

        let id = self.state.next_session_id.fetch_add(1, Ordering::SeqCst) + 1;
        let session = Arc::new(MemorySession {
            id,
            engine: Arc::downgrade(&self.state),
            channels: Mutex::new(HashSet::new()),
            handlers: Mutex::new(Vec::new()),
            poll_interval: Mutex::new(None),
            closed: AtomicBool::new(false),
        });
        {
            let mut sessions = self.state.sessions.lock();
            sessions.retain(|s| !s.is_closed() && Arc::strong_count(s) > 1);
            sessions.push(session.clone());
        }
        self.state.record(SessionCall::Open { session: id });

        Ok(session)
    }
}

/// A session of the in-memory engine.
pub struct MemorySession {
    id: u64,
    engine: Weak<EngineState>,
    channels: Mutex<HashSet<String>>,
    handlers: Mutex<Vec<EventHandler>>,
    poll_interval: Mutex<Option<Duration>>,
    closed: AtomicBool,
}

impl MemorySession {
    /// Session id, unique within its engine.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Check whether the session is listening on a channel.
    pub fn is_listening(&self, channel: &str) -> bool {
        !self.is_closed() && self.channels.lock().contains(channel)
    }

    /// Check whether the session has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of attached event handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.lock().len()
    }

    /// The poll interval override, if any.
    pub fn poll_interval(&self) -> Option<Duration> {
        *self.poll_interval.lock()
    }

    /// Deliver a raw notification as if the engine had polled it.
    ///
    /// Returns false, delivering nothing, if the session is not listening on
    /// the channel.
    pub fn inject(&self, channel: &str, payload: &str) -> bool {
        if !self.is_listening(channel) {
            return false;
        }
        self.fire(&SessionEvent::Notification {
            channel: channel.to_string(),
            payload: payload.to_string(),
        });
        true
    }

    fn fire(&self, event: &SessionEvent) {
        let handlers = self.handlers.lock().clone();
        for handler in handlers {
            handler(event);
        }
    }

    fn record(&self, call: SessionCall) {
        if let Some(engine) = self.engine.upgrade() {
            engine.record(call);
        }
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.is_closed() {
            Err(SessionError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Session for MemorySession {
    fn listen(&self, channel: &str) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.channels.lock().insert(channel.to_string());
        self.record(SessionCall::Listen {
            session: self.id,
            channel: channel.to_string(),
        });
        Ok(())
    }

    fn unlisten(&self, channel: &str) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.channels.lock().remove(channel);
        self.record(SessionCall::Unlisten {
            session: self.id,
            channel: channel.to_string(),
        });
        Ok(())
    }

    fn notify(&self, channel: &str, payload: &str) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.record(SessionCall::Notify {
            session: self.id,
            channel: channel.to_string(),
            payload: payload.to_string(),
        });
        if let Some(state) = self.engine.upgrade() {
            MemoryEngine { state }.deliver(channel, payload);
        }
        Ok(())
    }

    fn set_poll_interval(&self, interval: Duration) -> Result<(), SessionError> {
        self.ensure_open()?;
        *self.poll_interval.lock() = Some(interval);
        self.record(SessionCall::SetPollInterval {
            session: self.id,
            interval,
        });
        Ok(())
    }

    fn on_event(&self, handler: EventHandler) {
        self.handlers.lock().push(handler);
    }

    fn detach(&self) {
        self.handlers.lock().clear();
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.record(SessionCall::Close { session: self.id });
        self.fire(&SessionEvent::Close);
    }
}
