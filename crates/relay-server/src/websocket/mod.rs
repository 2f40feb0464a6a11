//! WebSocket connection state, the connection registry, and the per-connection session loop.

pub mod connection;
pub mod registry;
pub mod session;
