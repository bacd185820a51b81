//! Prometheus metrics helpers for the Pulse pipeline.
//!
//! This module owns recorder installation, the exposition server, and the
//! descriptions of every operational metric the pipeline records.
//!
//! # Usage
//!
//! ```rust,ignore
//! use pulse_core::metrics::{init_metrics, start_metrics_server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let handle = init_metrics();
//!     start_metrics_server(9091, handle).await.unwrap();
//!
//!     metrics::counter!("intake_events_accepted_total").increment(1);
//! }
//! ```
//!
//! # Metric Naming Conventions
//!
//! - Prefix: component name (`intake_`, `queue_`, `processor_`, `engagement_`)
//! - Suffix: unit or type (`_total`, `_seconds`)
//!
//! The exposition endpoint runs on its own port so it never collides with the
//! dashboard-facing `GET /metrics` route.

use axum::{Router, routing::get};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Initialize the Prometheus metrics recorder.
///
/// This must be called once at startup before any metrics are recorded.
///
/// # Panics
///
/// Panics if called more than once (the recorder can only be installed once).
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    register_pipeline_metrics();

    handle
}

/// Try to initialize the Prometheus metrics recorder.
///
/// Like [`init_metrics`] but returns `None` if a recorder is already
/// installed.
pub fn try_init_metrics() -> Option<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder().ok()?;
    register_pipeline_metrics();
    Some(handle)
}

/// Start the Prometheus exposition server on `port`.
///
/// Binds before returning so an unavailable port is reported to the caller,
/// then serves `/metrics` from a background task.
pub async fn start_metrics_server(
    port: u16,
    handle: PrometheusHandle,
) -> Result<(), std::io::Error> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "metrics server stopped");
        }
    });

    Ok(())
}

/// Register descriptions for the pipeline metrics.
fn register_pipeline_metrics() {
    // =========================================================================
    // Intake
    // =========================================================================

    describe_counter!(
        "intake_events_accepted_total",
        "Events validated and appended to the ingestion stream"
    );
    describe_counter!(
        "intake_events_rejected_total",
        "Request bodies rejected as malformed"
    );
    describe_counter!(
        "intake_enqueue_errors_total",
        "Validated events lost because the queue append failed"
    );

    // =========================================================================
    // Durable queue
    // =========================================================================

    describe_counter!("queue_appends_total", "Messages appended to any stream");

    // =========================================================================
    // Stream processor
    // =========================================================================

    describe_counter!(
        "processor_events_persisted_total",
        "Queue messages inserted into the event store"
    );
    describe_counter!(
        "processor_decode_errors_total",
        "Queue messages skipped because the payload did not decode"
    );
    describe_counter!(
        "processor_insert_errors_total",
        "Queue messages skipped because the insert failed"
    );
    describe_counter!(
        "processor_ack_errors_total",
        "Persisted messages whose acknowledgement failed"
    );
    describe_counter!(
        "processor_read_errors_total",
        "Failed stream reads (retried after backoff)"
    );
    describe_histogram!(
        "processor_insert_duration_seconds",
        "Time spent inserting one event"
    );

    // =========================================================================
    // Engagement view
    // =========================================================================

    describe_counter!(
        "engagement_refresh_total",
        "Completed rebuilds of the user engagement view"
    );
    describe_counter!(
        "engagement_refresh_errors_total",
        "Failed rebuilds of the user engagement view"
    );
    describe_gauge!(
        "engagement_view_users",
        "Users in the engagement view as of the last rebuild"
    );
}

// =============================================================================
// Metric Recording Helpers
// =============================================================================

/// Increment a counter.
#[inline]
pub fn increment(name: &'static str, count: u64) {
    metrics::counter!(name).increment(count);
}

/// Set a gauge value.
#[inline]
pub fn set_gauge(name: &'static str, value: f64) {
    metrics::gauge!(name).set(value);
}

/// Record a duration in seconds on a histogram.
#[inline]
pub fn record_seconds(name: &'static str, seconds: f64) {
    metrics::histogram!(name).record(seconds);
}
