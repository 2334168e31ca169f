//! Prometheus metrics for observability and monitoring.
//!
//! This module provides metric collection for every Sentinel component:
//! - Booking outcomes and lock wait latency
//! - Reservation event emission and delivery failures
//! - Projection applies, ignores, retries and dead letters
//! - Dead-letter archiving
//! - Discovery queries
//!
//! # Example
//!
//! ```rust,no_run
//! use sentinel_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Start metrics server on port 9090
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
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

    /// Install the global recorder and start the scrape endpoint.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a metrics recorder is already installed (e.g., in tests), this logs a
    /// warning and leaves the existing recorder in place.
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
        match metrics::set_global_recorder(recorder) {
            Ok(()) => {
                let addr = self.addr;
                tokio::spawn(async move {
                    if let Err(e) = exporter.await {
                        tracing::error!(%addr, error = ?e, "Metrics endpoint stopped");
                    }
                });
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics server started");
                Ok(())
            }
            Err(_) => {
                // Tests and embedders may install their own recorder first.
                tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                Ok(())
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if server hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
pub fn register_metrics() {
    // Booking
    describe_counter!(
        "sentinel_reservations_total",
        "Total reservation requests by outcome label"
    );
    describe_histogram!(
        "sentinel_lock_wait_duration_seconds",
        "Time spent waiting for the seat lock"
    );

    // Events
    describe_counter!(
        "sentinel_events_emitted_total",
        "Total reservation events acknowledged by the broker"
    );
    describe_counter!(
        "sentinel_event_delivery_failures_total",
        "Total reservation events the broker did not accept"
    );

    // Ingest
    describe_counter!(
        "sentinel_ingested_total",
        "Total reservation events handled by the catalog ingestor by result"
    );

    // Projection
    describe_counter!(
        "sentinel_projection_applied_total",
        "Total change records applied to the read model by operation"
    );
    describe_counter!(
        "sentinel_projection_ignored_total",
        "Total malformed change records acknowledged without applying"
    );
    describe_counter!(
        "sentinel_projection_retries_total",
        "Total projection retry attempts"
    );
    describe_counter!(
        "sentinel_projection_dead_lettered_total",
        "Total change records forwarded to the dead-letter channel"
    );
    describe_counter!(
        "sentinel_projection_dead_letter_failures_total",
        "Total dead-letter hand-offs that failed"
    );

    // Dead letters
    describe_counter!(
        "sentinel_dead_letters_archived_total",
        "Total dead letters archived for remediation"
    );
    describe_counter!(
        "sentinel_dlq_added_total",
        "Total entries written to the dead-letter table by source topic"
    );
    describe_counter!(
        "sentinel_dlq_resolved_total",
        "Total dead-letter entries resolved by an operator"
    );
    describe_counter!(
        "sentinel_dlq_discarded_total",
        "Total dead-letter entries discarded"
    );

    // Discovery
    describe_counter!(
        "sentinel_discovery_queries_total",
        "Total discovery queries by response status"
    );
}

/// Booking metrics recorder.
pub struct BookingMetrics;

impl BookingMetrics {
    /// Record a terminal reservation outcome.
    pub fn record_outcome(label: &'static str) {
        counter!("sentinel_reservations_total", "outcome" => label).increment(1);
    }

    /// Record how long a request waited for its lock.
    pub fn record_lock_wait(duration: Duration) {
        histogram!("sentinel_lock_wait_duration_seconds").record(duration.as_secs_f64());
    }
}

/// Reservation event metrics recorder.
pub struct EventMetrics;

impl EventMetrics {
    /// Record an event acknowledged by the broker.
    pub fn record_emitted() {
        counter!("sentinel_events_emitted_total").increment(1);
    }

    /// Record an event the broker did not accept.
    pub fn record_delivery_failure() {
        counter!("sentinel_event_delivery_failures_total").increment(1);
    }
}

/// Reservation ingest metrics recorder.
pub struct IngestMetrics;

impl IngestMetrics {
    /// Record one handled reservation event: `stored`, `malformed` or `failed`.
    pub fn record(result: &'static str) {
        counter!("sentinel_ingested_total", "result" => result).increment(1);
    }
}

/// Projection metrics recorder.
pub struct ProjectionMetrics;

impl ProjectionMetrics {
    /// Record an applied change.
    pub fn record_applied(operation: &'static str) {
        counter!("sentinel_projection_applied_total", "operation" => operation).increment(1);
    }

    /// Record an ignored record.
    pub fn record_ignored() {
        counter!("sentinel_projection_ignored_total").increment(1);
    }

    /// Record retry attempts made for one record.
    pub fn record_retries(retries: u32) {
        counter!("sentinel_projection_retries_total").increment(u64::from(retries));
    }

    /// Record a record forwarded to the dead-letter channel.
    pub fn record_dead_lettered() {
        counter!("sentinel_projection_dead_lettered_total").increment(1);
    }

    /// Record a failed dead-letter hand-off.
    pub fn record_dead_letter_failure() {
        counter!("sentinel_projection_dead_letter_failures_total").increment(1);
    }
}

/// Dead-letter archive metrics recorder.
pub struct DeadLetterMetrics;

impl DeadLetterMetrics {
    /// Record an archived dead letter.
    pub fn record_archived() {
        counter!("sentinel_dead_letters_archived_total").increment(1);
    }
}

/// Discovery metrics recorder.
pub struct DiscoveryMetrics;

impl DiscoveryMetrics {
    /// Record a discovery query by its response status.
    pub fn record_query(status: &'static str) {
        counter!("sentinel_discovery_queries_total", "status" => status).increment(1);
    }
}
