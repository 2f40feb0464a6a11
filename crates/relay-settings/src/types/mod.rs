//! Settings schema.
//!
//! Every struct uses `#[serde(rename_all = "camelCase", default)]` so a
//! partial `settings.json` only has to name the fields it changes.

use serde::{Deserialize, Serialize};

use relay_core::history::{DEFAULT_HISTORY_CAPACITY, DEFAULT_REPLAY_LEN};
use relay_core::logging::DEFAULT_LOG_LEVEL;

use crate::errors::{Result, SettingsError};

/// Greeting sent in every `welcome` envelope.
pub const DEFAULT_WELCOME_MESSAGE: &str = "Connected to Periyar Scale Server";

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Listener address.
    pub server: ServerSettings,
    /// Fan-out and history behaviour.
    pub relay: RelayBehaviour,
    /// WebSocket liveness probing.
    pub heartbeat: HeartbeatSettings,
    /// Graceful shutdown.
    pub shutdown: ShutdownSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl RelaySettings {
    /// Reject combinations that cannot work together.
    pub fn validate(&self) -> Result<()> {
        if self.relay.outbound_queue == 0 {
            return Err(SettingsError::InvalidValue(
                "relay.outboundQueue must be at least 1".to_string(),
            ));
        }
        if self.heartbeat.ping_interval_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "heartbeat.pingIntervalSecs must be at least 1".to_string(),
            ));
        }
        if self.heartbeat.pong_timeout_secs < self.heartbeat.ping_interval_secs {
            return Err(SettingsError::InvalidValue(format!(
                "heartbeat.pongTimeoutSecs ({}) is shorter than heartbeat.pingIntervalSecs ({})",
                self.heartbeat.pong_timeout_secs, self.heartbeat.ping_interval_secs
            )));
        }
        Ok(())
    }
}

/// Listener address.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Interface to bind.
    pub host: String,
    /// TCP port. `0` picks an ephemeral port.
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Fan-out and history behaviour.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelayBehaviour {
    /// Readings retained in memory.
    pub history_capacity: usize,
    /// Readings replayed to each new connection.
    pub history_replay: usize,
    /// Frames buffered per connection before deliveries start failing.
    pub outbound_queue: usize,
    /// Greeting placed in the `welcome` envelope.
    pub welcome_message: String,
}

impl Default for RelayBehaviour {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            history_replay: DEFAULT_REPLAY_LEN,
            outbound_queue: 256,
            welcome_message: DEFAULT_WELCOME_MESSAGE.to_string(),
        }
    }
}

/// WebSocket liveness probing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeartbeatSettings {
    /// Seconds between protocol-level pings.
    pub ping_interval_secs: u64,
    /// Seconds without a pong before the connection is dropped.
    pub pong_timeout_secs: u64,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            ping_interval_secs: 30,
            pong_timeout_secs: 60,
        }
    }
}

/// Graceful shutdown.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShutdownSettings {
    /// Hard deadline, in seconds, before the process force-exits.
    pub timeout_secs: u64,
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self { timeout_secs: 10 }
    }
}

/// Log output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}
