//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Updates**: Published, delivered, and gated-out price updates
//! - **Sessions**: Active stream sessions and why they closed
//! - **Tickers**: Active ticker count and feed start/stop failures
//! - **Latency**: Fan-out duration per publish
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! before [`init_metrics`] is a no-op, so unit tests never need a recorder.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::session::CloseReason;
use crate::infrastructure::broadcast::DeliveryFailure;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if another global recorder was already installed.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Update counters
    describe_counter!(
        "ticker_stream_updates_published_total",
        "Total price updates published to the broadcast hub"
    );
    describe_counter!(
        "ticker_stream_updates_delivered_total",
        "Total per-session mailbox enqueues"
    );
    describe_counter!(
        "ticker_stream_updates_rejected_total",
        "Total feed updates dropped because their ticker is not tracked"
    );
    describe_counter!(
        "ticker_stream_delivery_failures_total",
        "Total per-session delivery failures by reason"
    );

    // Session gauges and counters
    describe_gauge!(
        "ticker_stream_sessions_active",
        "Number of sessions registered with the hub"
    );
    describe_counter!(
        "ticker_stream_sessions_closed_total",
        "Total closed sessions by reason"
    );

    // Ticker gauges and counters
    describe_gauge!(
        "ticker_stream_tickers_active",
        "Number of tickers in the active set"
    );
    describe_counter!(
        "ticker_stream_feed_failures_total",
        "Total feed start/stop failures by operation"
    );

    // Latency histograms
    describe_histogram!(
        "ticker_stream_publish_seconds",
        "Time to fan one update out to every session"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Feed operation label for failure counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOperation {
    /// Starting a ticker's price stream.
    Start,
    /// Stopping a ticker's price stream.
    Stop,
}

impl FeedOperation {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
        }
    }
}

/// Record one update accepted by the hub.
pub fn record_update_published() {
    counter!("ticker_stream_updates_published_total").increment(1);
}

/// Record successful mailbox enqueues for one publish.
pub fn record_updates_delivered(count: u64) {
    counter!("ticker_stream_updates_delivered_total").increment(count);
}

/// Record a feed update dropped by the publish gate.
pub fn record_update_rejected() {
    counter!("ticker_stream_updates_rejected_total").increment(1);
}

/// Record a per-session delivery failure.
pub fn record_delivery_failure(failure: DeliveryFailure) {
    counter!(
        "ticker_stream_delivery_failures_total",
        "reason" => failure.as_str()
    )
    .increment(1);
}

/// Update the registered session count.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_sessions(count: usize) {
    gauge!("ticker_stream_sessions_active").set(count as f64);
}

/// Record a session reaching `Closed`.
pub fn record_session_closed(reason: CloseReason) {
    counter!(
        "ticker_stream_sessions_closed_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Update the active ticker count.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_tickers(count: usize) {
    gauge!("ticker_stream_tickers_active").set(count as f64);
}

/// Record a failed feed start or stop.
pub fn record_feed_failure(operation: FeedOperation) {
    counter!(
        "ticker_stream_feed_failures_total",
        "operation" => operation.as_str()
    )
    .increment(1);
}

/// Record how long one publish fan-out took.
pub fn record_publish_duration(duration: Duration) {
    histogram!("ticker_stream_publish_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
