//! Metrics collection and export for the relay.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use async_trait::async_trait;
use bytes::Bytes;
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use relay_transport::{FrameSink, FrameSource, TransportError};
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "relay_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "relay_connections_active";
    pub const MESSAGES_TOTAL: &str = "relay_messages_total";
    pub const MESSAGES_BYTES: &str = "relay_messages_bytes";
    pub const ROOMS_ACTIVE: &str = "relay_rooms_active";
    pub const ROOM_TEARDOWNS_TOTAL: &str = "relay_room_teardowns_total";
    pub const ERRORS_TOTAL: &str = "relay_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of frames relayed");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of frames relayed");
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Current number of rooms with a live hub");
    metrics::describe_counter!(
        names::ROOM_TEARDOWNS_TOTAL,
        "Total number of rooms force-closed"
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

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a frame.
pub fn record_message(bytes: usize, direction: &'static str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Update active room count.
pub fn set_active_rooms(count: usize) {
    gauge!(names::ROOMS_ACTIVE).set(count as f64);
}

/// Record a forced room teardown.
pub fn record_teardown() {
    counter!(names::ROOM_TEARDOWNS_TOTAL).increment(1);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
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

/// A connection half that counts the frames passing through it.
pub struct Metered<T>(pub T);

#[async_trait]
impl<S: FrameSource> FrameSource for Metered<S> {
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        let frame = self.0.recv().await;
        match &frame {
            Ok(Some(data)) => record_message(data.len(), "inbound"),
            Ok(None) => {}
            Err(_) => record_error("receive"),
        }
        frame
    }
}

#[async_trait]
impl<K: FrameSink> FrameSink for Metered<K> {
    async fn send_text(&mut self, data: Bytes) -> Result<(), TransportError> {
        let len = data.len();
        let result = self.0.send_text(data).await;
        match &result {
            Ok(()) => record_message(len, "outbound"),
            Err(_) => record_error("send"),
        }
        result
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.0.close().await
    }
}
