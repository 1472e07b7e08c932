//! Prometheus metrics for the intake and consumer sides.
//!
//! Counters are recorded through the `metrics` facade and are no-ops until a
//! recorder is installed, which the binaries do through [`MetricsServer`].
//!
//! # Example
//!
//! ```rust,no_run
//! use order_intake_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use order_intake_core::DeadLetterReason;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Installs the global recorder and serves the scrape endpoint on `addr`.
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

    /// Install the recorder and start serving `/metrics`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Install`] if the exporter cannot bind or a
    /// different recorder is already installed.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .build()
            .map_err(|e| MetricsError::Install(e.to_string()))?;
        let handle = recorder.handle();

        if metrics::set_global_recorder(recorder).is_err() {
            tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
            return Ok(());
        }

        tokio::spawn(async move {
            // `ExporterError` implements neither `Debug` nor `Display` in 0.15.
            if let Err(_e) = exporter.await {
                tracing::error!("Metrics exporter stopped");
            }
        });
        self.handle = Some(handle);
        tracing::info!(addr = %self.addr, "Metrics server started");
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

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(
        "intake_orders_accepted_total",
        "Orders accepted and published to the queue"
    );
    describe_counter!(
        "intake_idempotent_replays_total",
        "Requests answered from the idempotency cache"
    );
    describe_counter!(
        "intake_invalid_payloads_total",
        "Requests rejected for an invalid payload"
    );
    describe_counter!(
        "intake_publish_failures_total",
        "Accepted orders whose publish failed"
    );

    describe_counter!(
        "consumer_messages_completed_total",
        "Messages processed and completed"
    );
    describe_counter!(
        "consumer_messages_dead_lettered_total",
        "Messages dead-lettered by the consumer, by reason"
    );
    describe_counter!(
        "consumer_processing_faults_total",
        "Processing faults returned for redelivery"
    );

    describe_counter!("retry_attempts_total", "Total number of publish retry attempts");
    describe_counter!("retry_successes_total", "Publishes that succeeded after a retry");
    describe_counter!(
        "retry_exhausted_total",
        "Publishes that failed after exhausting retries"
    );
}

/// Intake metrics recorder.
pub struct IntakeMetrics;

impl IntakeMetrics {
    /// Record an accepted and published order.
    pub fn record_accepted() {
        counter!("intake_orders_accepted_total").increment(1);
    }

    /// Record a response served from the idempotency cache.
    pub fn record_replay() {
        counter!("intake_idempotent_replays_total").increment(1);
    }

    /// Record a rejected payload.
    pub fn record_invalid_payload() {
        counter!("intake_invalid_payloads_total").increment(1);
    }

    /// Record a failed publish.
    pub fn record_publish_failure() {
        counter!("intake_publish_failures_total").increment(1);
    }
}

/// Consumer metrics recorder.
pub struct ConsumerMetrics;

impl ConsumerMetrics {
    /// Record a completed message.
    pub fn record_completed() {
        counter!("consumer_messages_completed_total").increment(1);
    }

    /// Record a dead-lettered message.
    pub fn record_dead_lettered(reason: DeadLetterReason) {
        counter!("consumer_messages_dead_lettered_total", "reason" => reason.as_str()).increment(1);
    }

    /// Record a processing fault.
    pub fn record_fault() {
        counter!("consumer_processing_faults_total").increment(1);
    }
}

/// Retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record a retry attempt.
    pub fn record_attempt() {
        counter!("retry_attempts_total").increment(1);
    }

    /// Record a successful retry.
    pub fn record_success() {
        counter!("retry_successes_total").increment(1);
    }

    /// Record exhausted retries.
    pub fn record_exhausted() {
        counter!("retry_exhausted_total").increment(1);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_metrics_server_creation() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let server = MetricsServer::new(addr);
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
    }

    #[test]
    fn recorders_are_noops_without_installed_recorder() {
        IntakeMetrics::record_accepted();
        IntakeMetrics::record_replay();
        ConsumerMetrics::record_dead_lettered(DeadLetterReason::InvalidPayload);
        RetryMetrics::record_attempt();
    }
}
