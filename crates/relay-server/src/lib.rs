//! # relay-server
//!
//! Axum HTTP + `WebSocket` relay for scale readings.
//!
//! - `/ws`: producers and consumers connect here; readings from one are fanned out to all others
//! - [`relay::Relay`]: connection lifecycle, inbound dispatch, history and fan-out behind one lock
//! - [`websocket`]: per-connection state, the connection registry, the session loop
//! - `/health`, `/metrics` and an HTML status page at `/`
//! - Graceful shutdown via [`shutdown::ShutdownCoordinator`]

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod metrics;
pub mod relay;
pub mod server;
pub mod shutdown;
pub mod status;
pub mod websocket;

pub use config::ServerConfig;
pub use relay::{BroadcastReport, Departure, DisconnectReason, HandleOutcome, Relay};
pub use server::RelayServer;
pub use shutdown::ShutdownCoordinator;
