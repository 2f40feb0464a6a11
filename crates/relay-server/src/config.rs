//! Server configuration.

use std::time::Duration;

use relay_core::history::{DEFAULT_HISTORY_CAPACITY, DEFAULT_REPLAY_LEN};
use relay_settings::{DEFAULT_WELCOME_MESSAGE, RelaySettings};

/// Runtime configuration for [`crate::server::RelayServer`].
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Readings retained in the history buffer.
    pub history_capacity: usize,
    /// Readings replayed to each new connection.
    pub history_replay: usize,
    /// Outbound frames buffered per connection.
    pub outbound_queue: usize,
    /// Greeting in the `welcome` envelope.
    pub welcome_message: String,
    /// Interval between server-initiated Ping frames.
    pub ping_interval: Duration,
    /// Silence after which a client is considered dead.
    pub pong_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            history_replay: DEFAULT_REPLAY_LEN,
            outbound_queue: 256,
            welcome_message: DEFAULT_WELCOME_MESSAGE.into(),
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(60),
        }
    }
}

impl From<&RelaySettings> for ServerConfig {
    fn from(settings: &RelaySettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            history_capacity: settings.relay.history_capacity,
            history_replay: settings
                .relay
                .history_replay
                .min(settings.relay.history_capacity),
            outbound_queue: settings.relay.outbound_queue,
            welcome_message: settings.relay.welcome_message.clone(),
            ping_interval: Duration::from_secs(settings.heartbeat.ping_interval_secs),
            pong_timeout: Duration::from_secs(settings.heartbeat.pong_timeout_secs),
        }
    }
}
