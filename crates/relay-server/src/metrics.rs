//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Call once at startup,
/// before any metric is recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric names, shared between the relay and the session loop.

/// WebSocket connections opened (counter).
pub const RELAY_CONNECTIONS_TOTAL: &str = "relay_connections_total";
/// WebSocket connections closed (counter, labels: reason).
pub const RELAY_DISCONNECTIONS_TOTAL: &str = "relay_disconnections_total";
/// Open WebSocket connections (gauge).
pub const RELAY_CONNECTIONS_ACTIVE: &str = "relay_connections_active";
/// Connection lifetime in seconds (histogram).
pub const RELAY_CONNECTION_DURATION_SECONDS: &str = "relay_connection_duration_seconds";
/// Readings accepted and recorded (counter).
pub const RELAY_READINGS_TOTAL: &str = "relay_readings_total";
/// Successful per-peer broadcast enqueues (counter).
pub const RELAY_BROADCAST_DELIVERIES_TOTAL: &str = "relay_broadcast_deliveries_total";
/// Failed per-peer broadcast enqueues (counter).
pub const RELAY_BROADCAST_DROPS_TOTAL: &str = "relay_broadcast_drops_total";
/// Inbound frames that were not valid JSON (counter).
pub const RELAY_MALFORMED_TOTAL: &str = "relay_malformed_total";
/// Inbound payloads matching no known shape (counter).
pub const RELAY_UNRECOGNIZED_TOTAL: &str = "relay_unrecognized_total";
