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

// Metric name constants to avoid typos across modules.

/// WebSocket connections authenticated (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Upgrades refused at the connection limit (counter).
pub const WS_CONNECTIONS_REJECTED_TOTAL: &str = "ws_connections_rejected_total";
/// Connection lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Handshake and refresh authentication failures (counter, labels: reason).
pub const AUTH_FAILURES_TOTAL: &str = "auth_failures_total";
/// Inbound messages (counter, labels: type).
pub const MESSAGES_RECEIVED_TOTAL: &str = "messages_received_total";
/// Error frames sent (counter, labels: code).
pub const PROTOCOL_ERRORS_TOTAL: &str = "protocol_errors_total";
/// Full-state broadcasts (counter).
pub const BROADCASTS_TOTAL: &str = "broadcasts_total";
/// Broadcast frames dropped on full send queues (counter).
pub const BROADCAST_DROPS_TOTAL: &str = "broadcast_drops_total";
/// Context entries evicted by pruning (counter).
pub const CONTEXT_EVICTIONS_TOTAL: &str = "context_evictions_total";
/// Context entries held (gauge).
pub const CONTEXT_ENTRIES: &str = "context_entries";
/// Connections closed by the idle sweep (counter).
pub const STALE_CONNECTIONS_SWEPT_TOTAL: &str = "stale_connections_swept_total";
