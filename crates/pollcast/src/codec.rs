//! Per-channel payload codec.

use std::collections::HashSet;

use serde_json::Value;

use crate::error::Error;

/// A notification payload.
///
/// Plain channels carry [`Payload::Text`]. Channels with JSON enabled carry
/// [`Payload::Json`] inbound; outbound they accept either variant, a text
/// payload being encoded as a JSON string.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Raw text, sent and received unchanged.
    Text(String),
    /// A JSON value.
    Json(Value),
}

impl Payload {
    /// Get the text of a [`Payload::Text`].
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            Payload::Json(_) => None,
        }
    }

    /// Get the value of a [`Payload::Json`].
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Text(_) => None,
            Payload::Json(value) => Some(value),
        }
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Json(value)
    }
}

/// Tracks which channels encode and decode their payloads as JSON.
///
/// Flags are only ever switched on.
#[derive(Debug, Default)]
pub struct CodecPolicy {
    json_channels: HashSet<String>,
}

impl CodecPolicy {
    /// Create a policy with JSON disabled everywhere.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable JSON for a channel. Idempotent.
    pub fn enable_json(&mut self, channel: &str) {
        if self.json_channels.insert(channel.to_string()) {
            tracing::debug!(channel, "json codec enabled");
        }
    }

    /// Check whether a channel has JSON enabled.
    pub fn is_json(&self, channel: &str) -> bool {
        self.json_channels.contains(channel)
    }

    /// Encode an outbound payload into the text handed to the engine.
    pub fn encode(&self, channel: &str, payload: &Payload) -> Result<String, Error> {
        if !self.is_json(channel) {
            return match payload {
                Payload::Text(text) => Ok(text.clone()),
                Payload::Json(_) => Err(Error::PayloadNotText(channel.to_string())),
            };
        }

        let encoded = match payload {
            Payload::Text(text) => serde_json::to_string(text),
            Payload::Json(value) => serde_json::to_string(value),
        };
        encoded.map_err(|source| Error::Encode {
            channel: channel.to_string(),
            source,
        })
    }

    /// Decode an inbound raw payload.
    pub fn decode(&self, channel: &str, raw: &str) -> Result<Payload, serde_json::Error> {
        if self.is_json(channel) {
            serde_json::from_str(raw).map(Payload::Json)
        } else {
            Ok(Payload::Text(raw.to_string()))
        }
    }
}
