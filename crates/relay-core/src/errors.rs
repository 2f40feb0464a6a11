//! Relay error taxonomy.
//!
//! None of these are fatal to the process. Each one is logged at the point
//! where it is observed and the affected connection keeps running (or is
//! cleaned up through the normal close path for [`RelayError::Transport`]).

use thiserror::Error;

/// Errors raised while handling a single connection's traffic.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The inbound frame could not be decoded as JSON.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    /// The payload decoded but matches no known message shape.
    #[error("unrecognized message shape: {0}")]
    UnrecognizedShape(String),
    /// An outbound message could not be queued for one destination.
    #[error("failed to deliver to client {client_id}: {reason}")]
    SendFailure {
        /// Destination connection id.
        client_id: u64,
        /// Why the enqueue failed.
        reason: &'static str,
    },
    /// The connection's transport failed.
    #[error("transport error: {0}")]
    Transport(String),
    /// An outbound envelope could not be serialized.
    #[error("failed to serialize envelope: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
