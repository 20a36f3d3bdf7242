//! Metrics collection and export for TeaMQ.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use teamq_core::{BrokerStats, FrameOutcome};
use teamq_transport::{FrameWriter, TransportError};
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "teamq_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "teamq_connections_active";
    pub const FRAMES_TOTAL: &str = "teamq_frames_total";
    pub const FRAMES_BYTES: &str = "teamq_frames_bytes";
    pub const DISPATCH_TOTAL: &str = "teamq_dispatch_total";
    pub const DELIVERIES_TOTAL: &str = "teamq_deliveries_total";
    pub const QUEUES_ACTIVE: &str = "teamq_queues_active";
    pub const USERS_ACTIVE: &str = "teamq_users_active";
    pub const WORKERS_ACTIVE: &str = "teamq_workers_active";
    pub const LATENCY_SECONDS: &str = "teamq_latency_seconds";
    pub const ERRORS_TOTAL: &str = "teamq_errors_total";
}

/// Describe every metric to the installed recorder.
///
/// Descriptions only reach a recorder that is already installed.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::FRAMES_TOTAL, "Total number of frames read or written");
    metrics::describe_counter!(names::FRAMES_BYTES, "Total bytes of frames read or written");
    metrics::describe_counter!(
        names::DISPATCH_TOTAL,
        "Inbound frames by what the broker did with them"
    );
    metrics::describe_counter!(
        names::DELIVERIES_TOTAL,
        "Copies written to subscribers by broadcasts"
    );
    metrics::describe_gauge!(names::QUEUES_ACTIVE, "Queues with at least one subscriber");
    metrics::describe_gauge!(names::USERS_ACTIVE, "Distinct authenticated users");
    metrics::describe_gauge!(names::WORKERS_ACTIVE, "Registered workers");
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Frame processing latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Install the Prometheus exporter, then describe the metrics to it.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;
    init_metrics();

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
pub fn record_frame(bytes: usize, direction: &'static str) {
    counter!(names::FRAMES_TOTAL, "direction" => direction).increment(1);
    counter!(names::FRAMES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record frame latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

/// Label for a frame outcome.
#[must_use]
pub fn outcome_label(outcome: &FrameOutcome) -> &'static str {
    match outcome {
        FrameOutcome::Ignored => "ignored",
        FrameOutcome::Command(_) => "command",
        FrameOutcome::Rejected(_) => "rejected",
        FrameOutcome::Published { .. } => "delivered",
        FrameOutcome::Forwarded { .. } => "forwarded",
        FrameOutcome::Dropped => "dropped",
    }
}

/// Record what the broker did with a frame.
pub fn record_outcome(outcome: &FrameOutcome) {
    counter!(names::DISPATCH_TOTAL, "outcome" => outcome_label(outcome)).increment(1);
    match outcome {
        FrameOutcome::Published { recipients } => {
            counter!(names::DELIVERIES_TOTAL).increment(*recipients as u64);
        }
        FrameOutcome::Rejected(_) => record_error("rejected"),
        _ => {}
    }
}

/// Update table size gauges.
pub fn set_broker_stats(stats: BrokerStats) {
    gauge!(names::QUEUES_ACTIVE).set(stats.queues as f64);
    gauge!(names::USERS_ACTIVE).set(stats.users as f64);
    gauge!(names::WORKERS_ACTIVE).set(stats.workers as f64);
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

/// [`FrameWriter`] wrapper that counts outbound frames.
pub struct MeteredWriter {
    inner: Arc<dyn FrameWriter>,
}

impl MeteredWriter {
    #[must_use]
    pub fn new(inner: Arc<dyn FrameWriter>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl FrameWriter for MeteredWriter {
    async fn send_raw(&self, data: Bytes) -> Result<(), TransportError> {
        let len = data.len();
        self.inner.send_raw(data).await?;
        record_frame(len, "outbound");
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.inner.close().await
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    fn remote_addr(&self) -> Option<String> {
        self.inner.remote_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use teamq_core::{BrokerError, Command};
    use teamq_transport::memory;

    #[test]
    fn test_metrics_guard() {
        // No recorder installed, must not panic
        let _guard = ConnectionMetricsGuard::new();
        record_outcome(&FrameOutcome::Published { recipients: 3 });
        set_broker_stats(BrokerStats::default());
    }

    #[test]
    fn test_descriptions_reach_installed_recorder() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            init_metrics();
            record_connection();
        });

        let rendered = handle.render();
        assert!(rendered.contains("# HELP teamq_connections_total"));
        assert!(rendered.contains("teamq_connections_total 1"));
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(outcome_label(&FrameOutcome::Ignored), "ignored");
        assert_eq!(outcome_label(&FrameOutcome::Command(Command::Quit)), "command");
        assert_eq!(
            outcome_label(&FrameOutcome::Rejected(BrokerError::AuthRequired)),
            "rejected"
        );
        assert_eq!(
            outcome_label(&FrameOutcome::Forwarded {
                worker: 1,
                affinity: true
            }),
            "forwarded"
        );
        assert_eq!(outcome_label(&FrameOutcome::Dropped), "dropped");
    }

    #[tokio::test]
    async fn test_metered_writer_delegates() {
        let (inner, mut outbox) = memory::channel();
        let writer = MeteredWriter::new(inner);

        writer.send_raw(Bytes::from_static(b"{}\n")).await.unwrap();
        assert_eq!(outbox.drain().len(), 1);
        assert_eq!(writer.remote_addr().as_deref(), Some("memory"));

        writer.close().await.unwrap();
        assert!(!writer.is_open());
        assert!(writer.send_raw(Bytes::from_static(b"{}\n")).await.is_err());
    }
}
