//! Normalized readings and per-connection identity types.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

/// Unit applied when a reading does not name one.
pub const DEFAULT_UNIT: &str = "g";

/// Identifies which physical scale a reading came from.
///
/// Always positive; `0` and missing values collapse to [`SourceGroupId::DEFAULT`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceGroupId(u64);

impl SourceGroupId {
    /// Group assigned to connections and readings that never declare one.
    pub const DEFAULT: Self = Self(1);

    /// Build from a raw id, rejecting `0`.
    pub fn new(id: u64) -> Option<Self> {
        (id > 0).then_some(Self(id))
    }

    /// Read a `scaleId`-style JSON field. Only positive integers are accepted.
    pub fn from_value(value: &Value) -> Option<Self> {
        value.as_u64().and_then(Self::new)
    }

    /// Raw numeric id.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl Default for SourceGroupId {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for SourceGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Declared purpose of a connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionRole {
    /// Not registered yet, or registered with an unknown client type.
    #[default]
    Unknown,
    /// Supplies readings (scale firmware).
    Producer,
    /// Observes readings (dashboard).
    Consumer,
}

impl ConnectionRole {
    /// Map a registration `clientType` to a role.
    ///
    /// Device firmware registers as `esp32`/`scale`, dashboards as `dashboard`;
    /// the generic `producer`/`consumer` names are accepted too.
    pub fn from_client_type(client_type: &str) -> Self {
        match client_type.to_ascii_lowercase().as_str() {
            "producer" | "esp32" | "scale" => Self::Producer,
            "consumer" | "dashboard" => Self::Consumer,
            _ => Self::Unknown,
        }
    }

    /// Lowercase name used in logs and on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Producer => "producer",
            Self::Consumer => "consumer",
        }
    }
}

impl fmt::Display for ConnectionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One normalized data point.
///
/// Field names on the wire follow the dashboard protocol
/// (`weight`, `unit`, `scaleId`, `timestamp`, `datetime`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Measured value, kept exactly as the producer sent it.
    #[serde(rename = "weight")]
    pub value: Number,
    /// Measurement unit.
    pub unit: String,
    /// Scale the reading belongs to.
    #[serde(rename = "scaleId")]
    pub source_group: SourceGroupId,
    /// Producer-side epoch millis, or receipt time when the producer sent none.
    #[serde(rename = "timestamp")]
    pub produced_at: i64,
    /// Receipt time at the relay, ISO-8601.
    #[serde(rename = "datetime")]
    pub recorded_at: String,
}

impl Reading {
    /// Value as a float, for logging.
    pub fn value_f64(&self) -> f64 {
        self.value.as_f64().unwrap_or(f64::NAN)
    }
}
