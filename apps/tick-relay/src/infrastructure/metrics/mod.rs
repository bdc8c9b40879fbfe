//! Prometheus Metrics Module
//!
//! Exposes relay metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Ticks**: received, dropped (by reason) and processing latency
//! - **Sink**: cache write failures and broadcast deliveries
//! - **Connection**: connect attempts by outcome and the connection state gauge
//! - **Fan-out**: subscribed symbols and connected push consumers
//!
//! # Integration
//!
//! Metrics are rendered at `/metrics` on the HTTP server.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::streaming::ConnectionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Later calls return the same handle.
///
/// # Errors
///
/// Returns `BuildError` if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
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
    describe_counter!(
        "tick_relay_ticks_received_total",
        "Ticks decoded from the upstream feed"
    );
    describe_counter!(
        "tick_relay_ticks_dropped_total",
        "Inbound frames dropped, by reason"
    );
    describe_counter!(
        "tick_relay_cache_write_failures_total",
        "Failed cache writes"
    );
    describe_counter!(
        "tick_relay_broadcast_deliveries_total",
        "Push events handed to consumers"
    );
    describe_counter!(
        "tick_relay_connect_attempts_total",
        "Feed connection attempts by outcome"
    );

    describe_gauge!(
        "tick_relay_connection_state",
        "Feed connection state (0 disconnected, 1 connecting, 2 connected, -1 failed)"
    );
    describe_gauge!(
        "tick_relay_subscriptions",
        "Symbols in the desired subscription set"
    );
    describe_gauge!(
        "tick_relay_push_consumers",
        "Connected push channel consumers"
    );

    describe_histogram!(
        "tick_relay_tick_processing_seconds",
        "Time from frame receipt to broadcast completion"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Reasons an inbound frame is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Frame failed to parse.
    Malformed,
    /// Sink was closed.
    Closed,
}

impl DropReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::Closed => "closed",
        }
    }
}

/// Outcome of one connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Handshake completed.
    Connected,
    /// Credential rejected.
    AuthRejected,
    /// Any other failure.
    Failed,
}

impl ConnectOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::AuthRejected => "auth_rejected",
            Self::Failed => "failed",
        }
    }
}

/// Record a decoded tick.
pub fn record_tick_received() {
    counter!("tick_relay_ticks_received_total").increment(1);
}

/// Record a dropped frame.
pub fn record_tick_dropped(reason: DropReason) {
    counter!(
        "tick_relay_ticks_dropped_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Record a failed cache write.
pub fn record_cache_write_failure() {
    counter!("tick_relay_cache_write_failures_total").increment(1);
}

/// Record events handed to push consumers.
pub fn record_broadcast(event: &str, receivers: u64) {
    counter!(
        "tick_relay_broadcast_deliveries_total",
        "event" => event.to_string()
    )
    .increment(receivers);
}

/// Record a connection attempt.
pub fn record_connect_attempt(outcome: ConnectOutcome) {
    counter!(
        "tick_relay_connect_attempts_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Update the connection state gauge.
pub fn set_connection_state(state: ConnectionState) {
    gauge!("tick_relay_connection_state").set(state.gauge_value());
}

/// Update the subscription gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscriptions(count: usize) {
    gauge!("tick_relay_subscriptions").set(count as f64);
}

/// Update the push consumer gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_push_consumers(count: usize) {
    gauge!("tick_relay_push_consumers").set(count as f64);
}

/// Record tick processing duration.
pub fn record_processing_duration(duration: Duration) {
    histogram!("tick_relay_tick_processing_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
