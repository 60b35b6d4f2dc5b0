//! Metrics collection and exposition.
//!
//! # Metrics
//! - `stomp_frames_received_total` (counter, labels: command)
//! - `stomp_frames_denied_total` (counter, labels: command)
//! - `stomp_messages_delivered_total` (counter)
//! - `stomp_heartbeat_timeouts_total` (counter)
//! - `stomp_broker_failures_total` (counter)
//! - `stomp_delivery_failures_total` (counter)
//! - `stomp_active_sessions` (gauge)
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every update is a no-op
//! - The Prometheus exporter runs its own HTTP listener when enabled

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

pub const FRAMES_RECEIVED_TOTAL: &str = "stomp_frames_received_total";
pub const FRAMES_DENIED_TOTAL: &str = "stomp_frames_denied_total";
pub const MESSAGES_DELIVERED_TOTAL: &str = "stomp_messages_delivered_total";
pub const HEARTBEAT_TIMEOUTS_TOTAL: &str = "stomp_heartbeat_timeouts_total";
pub const BROKER_FAILURES_TOTAL: &str = "stomp_broker_failures_total";
pub const DELIVERY_FAILURES_TOTAL: &str = "stomp_delivery_failures_total";
pub const ACTIVE_SESSIONS: &str = "stomp_active_sessions";

/// Install the global Prometheus recorder and its scrape listener.
///
/// Must run inside a tokio runtime.
pub fn install_recorder(address: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(address)
        .install()?;
    tracing::info!(%address, "Prometheus metrics exporter listening");
    Ok(())
}
