//! Delivery of inbound notifications to registered listeners.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use crate::codec::Payload;
use crate::config::DecodeFailure;
use crate::pubsub::PubSub;
use crate::registry::Listener;

/// Decode `raw` for `channel` and invoke every listener registered on it.
///
/// Listeners run in registration order against a snapshot taken before the
/// first call, so listeners added or removed during delivery do not affect
/// this pass. A panicking listener does not stop the rest; the first panic is
/// resumed once all listeners have run.
pub(crate) fn dispatch(pubsub: &PubSub, channel: &str, raw: &str) {
    let Some((listeners, payload)) = prepare(pubsub, channel, raw) else {
        return;
    };

    tracing::trace!(channel, listeners = listeners.len(), "dispatching notification");

    if let Some(panic) = deliver(pubsub, channel, &listeners, &payload) {
        panic::resume_unwind(panic);
    }
}

fn prepare(pubsub: &PubSub, channel: &str, raw: &str) -> Option<(Vec<Listener>, Payload)> {
    let state = pubsub.shared.state.lock();

    let listeners = state.registry.snapshot(channel);
    if listeners.is_empty() {
        return None;
    }

    match state.codec.decode(channel, raw) {
        Ok(payload) => Some((listeners, payload)),
        Err(err) => match pubsub.shared.config.decode_failure {
            DecodeFailure::Drop => {
                tracing::warn!(channel, error = %err, "dropping notification with undecodable payload");
                None
            }
            DecodeFailure::DeliverRaw => {
                tracing::warn!(channel, error = %err, "delivering undecodable payload as raw text");
                Some((listeners, Payload::Text(raw.to_string())))
            }
        },
    }
}

fn deliver(
    pubsub: &PubSub,
    channel: &str,
    listeners: &[Listener],
    payload: &Payload,
) -> Option<Box<dyn Any + Send>> {
    let mut first_panic = None;

    for listener in listeners {
        let result = panic::catch_unwind(AssertUnwindSafe(|| listener.call(pubsub, payload)));
        if let Err(panic) = result {
            tracing::warn!(channel, "listener panicked during dispatch");
            first_panic.get_or_insert(panic);
        }
    }

    first_panic
}
