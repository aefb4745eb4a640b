//! Metrics collection and export for Relay.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "relay_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "relay_connections_active";
    pub const FRAMES_TOTAL: &str = "relay_frames_total";
    pub const FRAMES_BYTES: &str = "relay_frames_bytes";
    pub const MESSAGES_SEQUENCED_TOTAL: &str = "relay_messages_sequenced_total";
    pub const BROADCAST_FAILURES_TOTAL: &str = "relay_broadcast_failures_total";
    pub const FRAME_LATENCY_SECONDS: &str = "relay_frame_latency_seconds";
    pub const ERRORS_TOTAL: &str = "relay_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    // Describe metrics
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of sessions since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active sessions"
    );
    metrics::describe_counter!(names::FRAMES_TOTAL, "Total number of frames processed");
    metrics::describe_counter!(names::FRAMES_BYTES, "Total bytes of frames processed");
    metrics::describe_counter!(
        names::MESSAGES_SEQUENCED_TOTAL,
        "Total number of messages written to the timeline"
    );
    metrics::describe_counter!(
        names::BROADCAST_FAILURES_TOTAL,
        "Total number of failed per-target broadcast writes"
    );
    metrics::describe_histogram!(
        names::FRAME_LATENCY_SECONDS,
        "Inbound frame handling latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new session.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a session ending.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a frame.
pub fn record_frame(bytes: usize, direction: &str) {
    counter!(names::FRAMES_TOTAL, "direction" => direction.to_string()).increment(1);
    counter!(names::FRAMES_BYTES, "direction" => direction.to_string()).increment(bytes as u64);
}

/// Record frame handling latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::FRAME_LATENCY_SECONDS).record(seconds);
}

/// Record a message accepted by the sequencer.
pub fn record_sequenced() {
    counter!(names::MESSAGES_SEQUENCED_TOTAL).increment(1);
}

/// Record failed per-target broadcast writes.
pub fn record_broadcast_failures(count: usize) {
    counter!(names::BROADCAST_FAILURES_TOTAL).increment(count as u64);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
