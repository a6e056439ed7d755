//! Subscription registry: channel to ordered listener list.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::codec::Payload;
use crate::pubsub::PubSub;

type ListenerFn = dyn Fn(&PubSub, &Payload) + Send + Sync;

/// A registered notification callback.
///
/// Cloning is cheap and the clone compares equal to the original, so the value
/// returned by [`PubSub::listen`] doubles as the token for targeted removal.
#[derive(Clone)]
pub struct Listener(Arc<ListenerFn>);

impl Listener {
    /// Wrap a callback.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&PubSub, &Payload) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Invoke the callback.
    pub fn call(&self, pubsub: &PubSub, payload: &Payload) {
        (self.0)(pubsub, payload)
    }

    fn addr(&self) -> *const () {
        Arc::as_ptr(&self.0) as *const ()
    }
}

impl PartialEq for Listener {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for Listener {}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Listener").field(&self.addr()).finish()
    }
}

/// Channel to listener list, in registration order.
///
/// A channel is present iff it has at least one listener.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    channels: HashMap<String, Vec<Listener>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener to a channel. Duplicates are kept.
    ///
    /// Returns true if the channel had no listeners before this call.
    pub fn register(&mut self, channel: &str, listener: Listener) -> bool {
        let listeners = self.channels.entry(channel.to_string()).or_default();
        listeners.push(listener);
        listeners.len() == 1
    }

    /// Remove every entry equal to `listener`, or every entry when `None`.
    ///
    /// Returns true if this call emptied the channel.
    pub fn deregister(&mut self, channel: &str, listener: Option<&Listener>) -> bool {
        let Some(listeners) = self.channels.get_mut(channel) else {
            return false;
        };

        match listener {
            Some(listener) => listeners.retain(|existing| existing != listener),
            None => listeners.clear(),
        }

        if listeners.is_empty() {
            self.channels.remove(channel);
            true
        } else {
            false
        }
    }

    /// Copy of a channel's listeners, safe to iterate while the registry changes.
    pub fn snapshot(&self, channel: &str) -> Vec<Listener> {
        self.channels.get(channel).cloned().unwrap_or_default()
    }

    /// Check whether a channel has any listeners.
    pub fn contains(&self, channel: &str) -> bool {
        self.channels.contains_key(channel)
    }

    /// Number of listener entries on a channel.
    pub fn listener_count(&self, channel: &str) -> usize {
        self.channels.get(channel).map_or(0, Vec::len)
    }

    /// Iterate over live channel names.
    pub fn channels(&self) -> impl Iterator<Item = &str> + '_ {
        self.channels.keys().map(String::as_str)
    }

    /// Number of live channels.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Check if no channel is live.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Remove every channel and listener.
    pub fn clear(&mut self) {
        self.channels.clear();
    }
}
