//! Prometheus metrics for the consumption runtime.
//!
//! Collected per topic:
//! - Messages handed to the handler, and how long the handler took
//! - Read failures reported by the broker
//! - Number of engines currently running
//!
//! # Example
//!
//! ```rust,no_run
//! use changefeed_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Serve metrics on port 9090
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, gauge, histogram};

/// Messages delivered to a handler, labelled by topic.
pub const MESSAGES_HANDLED: &str = "changefeed_messages_handled_total";
/// Read failures reported by the broker, labelled by topic.
pub const READ_FAILURES: &str = "changefeed_read_failures_total";
/// Handler latency, labelled by topic.
pub const HANDLER_DURATION: &str = "changefeed_handler_duration_seconds";
/// Engines in the running state.
pub const ENGINES_RUNNING: &str = "changefeed_engines_running";

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build the exporter or bind its listener
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the global recorder and start serving `/metrics`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Build`] if the exporter cannot be built or the
    /// listener cannot bind.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g., by another test), the call
    /// succeeds without serving and [`render`](Self::render) returns `None`.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = recorder.handle();
        if metrics::set_global_recorder(recorder).is_err() {
            tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
            return Ok(());
        }

        tokio::spawn(async move {
            // ExporterError carries no Debug or Display impl.
            if exporter.await.is_err() {
                tracing::error!("Metrics exporter stopped");
            }
        });
        self.handle = Some(handle);
        tracing::info!(
            addr = %self.addr,
            "Metrics server started - available at http://{}/metrics",
            self.addr
        );
        Ok(())
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    describe_counter!(MESSAGES_HANDLED, "Total number of messages delivered to the handler");
    describe_counter!(READ_FAILURES, "Total number of failed reads from the broker");
    describe_histogram!(HANDLER_DURATION, "Time taken by the handler per message");
    describe_gauge!(ENGINES_RUNNING, "Number of consumption engines currently running");
}

/// Consumption engine metrics recorder.
pub struct EngineMetrics;

impl EngineMetrics {
    /// Record a message handled for `topic`.
    pub fn record_handled(topic: &str, duration: Duration) {
        counter!(MESSAGES_HANDLED, "topic" => topic.to_string()).increment(1);
        histogram!(HANDLER_DURATION, "topic" => topic.to_string()).record(duration.as_secs_f64());
    }

    /// Record a read failure for `topic`.
    pub fn record_read_failure(topic: &str) {
        counter!(READ_FAILURES, "topic" => topic.to_string()).increment(1);
    }

    /// Record an engine entering the running state.
    pub fn record_started() {
        gauge!(ENGINES_RUNNING).increment(1.0);
    }

    /// Record a running engine being closed.
    pub fn record_stopped() {
        gauge!(ENGINES_RUNNING).decrement(1.0);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metrics_server_creation() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let server = MetricsServer::new(addr);
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
    }

    #[tokio::test]
    async fn test_engine_metrics_render() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let mut server = MetricsServer::new(addr);
        server.start().unwrap();

        EngineMetrics::record_started();
        EngineMetrics::record_handled("customers.public.users", Duration::from_millis(3));
        EngineMetrics::record_read_failure("customers.public.users");
        EngineMetrics::record_stopped();

        // Another test may have installed the recorder first.
        if let Some(rendered) = server.render() {
            assert!(rendered.contains(MESSAGES_HANDLED));
            assert!(rendered.contains(READ_FAILURES));
            assert!(rendered.contains("topic=\"customers.public.users\""));
            assert!(rendered.contains(ENGINES_RUNNING));
        }
    }
}
