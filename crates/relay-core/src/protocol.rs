//! Outbound wire envelopes.
//!
//! Data-bearing messages use `{"type": ..., "data": ...}`. The heartbeat
//! reply is flat (`{"type":"pong","timestamp":...}`), which is what deployed
//! scale firmware expects.

use serde::Serialize;

use crate::errors::Result;
use crate::reading::Reading;

/// Payload of the `welcome` envelope.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Welcome {
    /// Id assigned to the new connection.
    pub client_id: u64,
    /// Server time at connect, ISO-8601.
    pub server_time: String,
    /// Human-readable greeting.
    pub message: String,
}

/// Envelopes carrying a `data` payload.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Envelope<'a> {
    /// Sent once to a new connection.
    Welcome(Welcome),
    /// Recent readings replayed to a new connection, oldest first.
    History(&'a [Reading]),
    /// A reading fanned out to every peer except its producer.
    Weight(&'a Reading),
}

impl Envelope<'_> {
    /// Serialize to the text frame sent on the wire.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Heartbeat acknowledgement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Pong {
    #[serde(rename = "type")]
    kind: &'static str,
    /// Server time in epoch millis.
    pub timestamp: i64,
}

impl Pong {
    /// Pong stamped with the given epoch millis.
    pub fn at(timestamp: i64) -> Self {
        Self {
            kind: "pong",
            timestamp,
        }
    }

    /// Serialize to the text frame sent on the wire.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
