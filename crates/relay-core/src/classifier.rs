//! Inbound message classification.
//!
//! Rules are applied in priority order:
//!
//! 1. `type == "register"` → [`Inbound::Register`]
//! 2. `type == "ping"` → [`Inbound::Ping`]
//! 3. `weight` present → [`Inbound::Reading`] (unit, scale and timestamp may come from the payload)
//! 4. `value` present → [`Inbound::Reading`] (unit `g`, timestamp from the server clock)
//! 5. anything else → [`Inbound::Unrecognized`]
//!
//! Empty strings, `0` ids and `0` timestamps are treated as absent, matching
//! the firmware that zero-fills unset fields.

use chrono::{DateTime, Utc};
use serde_json::{Map, Number, Value};

use crate::clock;
use crate::errors::{RelayError, Result};
use crate::reading::{ConnectionRole, DEFAULT_UNIT, Reading, SourceGroupId};

/// What an inbound payload asks the relay to do.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    /// Declare the connection's role and scale.
    Register {
        /// Role derived from `clientType`.
        role: ConnectionRole,
        /// Declared `scaleId`, or the default group.
        source_group: SourceGroupId,
    },
    /// Heartbeat; answered with a pong to the sender only.
    Ping,
    /// Data reading to record and fan out.
    Reading(Reading),
    /// Payload matched no known shape.
    Unrecognized {
        /// Short description for the log line.
        reason: &'static str,
    },
}

/// Decode a text frame.
pub fn parse_payload(text: &str) -> Result<Value> {
    serde_json::from_str(text).map_err(|e| RelayError::MalformedPayload(e.to_string()))
}

/// Classify a decoded payload.
///
/// `sender_group` is the originating connection's registered scale, used when
/// a reading carries no `scaleId` of its own. `now` stamps receipt time.
pub fn classify(payload: &Value, sender_group: SourceGroupId, now: DateTime<Utc>) -> Inbound {
    let Some(obj) = payload.as_object() else {
        return Inbound::Unrecognized {
            reason: "payload is not a JSON object",
        };
    };

    match obj.get("type").and_then(Value::as_str) {
        Some("register") => {
            let role = obj
                .get("clientType")
                .and_then(Value::as_str)
                .map_or(ConnectionRole::Unknown, ConnectionRole::from_client_type);
            let source_group = declared_group(obj).unwrap_or_default();
            return Inbound::Register { role, source_group };
        }
        Some("ping") => return Inbound::Ping,
        _ => {}
    }

    let source_group = declared_group(obj).unwrap_or(sender_group);
    let received_at = now.timestamp_millis();

    if let Some(weight) = obj.get("weight") {
        let Value::Number(value) = weight else {
            return Inbound::Unrecognized {
                reason: "weight is not a number",
            };
        };
        let unit = obj
            .get("unit")
            .and_then(Value::as_str)
            .filter(|u| !u.is_empty())
            .unwrap_or(DEFAULT_UNIT);
        let produced_at = obj
            .get("timestamp")
            .and_then(epoch_millis)
            .filter(|&ts| ts != 0)
            .unwrap_or(received_at);
        return Inbound::Reading(build_reading(value, unit, source_group, produced_at, now));
    }

    if let Some(value) = obj.get("value") {
        let Value::Number(value) = value else {
            return Inbound::Unrecognized {
                reason: "value is not a number",
            };
        };
        return Inbound::Reading(build_reading(
            value,
            DEFAULT_UNIT,
            source_group,
            received_at,
            now,
        ));
    }

    Inbound::Unrecognized {
        reason: "no weight or value field",
    }
}

fn declared_group(obj: &Map<String, Value>) -> Option<SourceGroupId> {
    obj.get("scaleId").and_then(SourceGroupId::from_value)
}

#[allow(clippy::cast_possible_truncation)]
fn epoch_millis(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
}

fn build_reading(
    value: &Number,
    unit: &str,
    source_group: SourceGroupId,
    produced_at: i64,
    now: DateTime<Utc>,
) -> Reading {
    Reading {
        value: value.clone(),
        unit: unit.to_owned(),
        source_group,
        produced_at,
        recorded_at: clock::to_iso8601(now),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
