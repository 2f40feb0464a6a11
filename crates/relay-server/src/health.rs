//! `/health` endpoint body.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: &'static str,
    /// Seconds since the server started.
    pub uptime: f64,
    /// Open WebSocket connections.
    pub connections: usize,
    /// Readings currently held in history.
    pub history_length: usize,
    /// Server time, ISO-8601.
    pub timestamp: String,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    connections: usize,
    history_length: usize,
    now: DateTime<Utc>,
) -> HealthResponse {
    HealthResponse {
        status: "ok",
        uptime: start_time.elapsed().as_secs_f64(),
        connections,
        history_length,
        timestamp: relay_core::clock::to_iso8601(now),
    }
}
