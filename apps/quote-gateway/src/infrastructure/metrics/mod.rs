//! Prometheus Metrics Module
//!
//! Exposes gateway metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Upstream**: Frames received, malformed frames, commands sent, reconnects, conflicts
//! - **Fan-out**: Ticks dispatched, frames dropped for lagging sessions
//! - **State**: Connection state, active symbols, active sessions
//! - **Latency**: Frame processing time
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! before [`init_metrics`] is a no-op.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::infrastructure::upstream::{ConnectionState, Provider};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if another global recorder is already installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new();
            let handle = builder
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
    // Upstream counters
    describe_counter!(
        "quote_gateway_frames_received_total",
        "Inbound upstream frames by provider and kind"
    );
    describe_counter!(
        "quote_gateway_malformed_frames_total",
        "Upstream frames that failed to decode"
    );
    describe_counter!(
        "quote_gateway_upstream_commands_total",
        "Subscribe and unsubscribe commands written upstream"
    );
    describe_counter!(
        "quote_gateway_reconnects_total",
        "Upstream reconnection attempts"
    );
    describe_counter!(
        "quote_gateway_conflicts_total",
        "Approval key conflicts reported by the provider"
    );

    // Fan-out counters
    describe_counter!(
        "quote_gateway_ticks_dispatched_total",
        "Ticks published onto symbol channels"
    );
    describe_counter!(
        "quote_gateway_ticks_lagged_total",
        "Ticks skipped by sessions that fell behind"
    );

    // Gauges
    describe_gauge!(
        "quote_gateway_connection_state",
        "Upstream connection state (0 disconnected, 1 connecting, 2 connected)"
    );
    describe_gauge!(
        "quote_gateway_active_symbols",
        "Symbols with at least one subscriber"
    );
    describe_gauge!(
        "quote_gateway_active_sessions",
        "Open client WebSocket sessions"
    );

    // Latency histograms
    describe_histogram!(
        "quote_gateway_frame_processing_seconds",
        "Time to decode and dispatch one upstream frame"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record an inbound upstream frame.
pub fn record_frame(provider: Provider, kind: &'static str) {
    counter!(
        "quote_gateway_frames_received_total",
        "provider" => provider.as_str(),
        "kind" => kind
    )
    .increment(1);
}

/// Record a frame that failed to decode.
pub fn record_malformed(provider: Provider) {
    counter!(
        "quote_gateway_malformed_frames_total",
        "provider" => provider.as_str()
    )
    .increment(1);
}

/// Record a command written upstream.
pub fn record_upstream_command(provider: Provider, action: &'static str) {
    counter!(
        "quote_gateway_upstream_commands_total",
        "provider" => provider.as_str(),
        "action" => action
    )
    .increment(1);
}

/// Record a reconnection attempt.
pub fn record_reconnect(provider: Provider) {
    counter!(
        "quote_gateway_reconnects_total",
        "provider" => provider.as_str()
    )
    .increment(1);
}

/// Record an approval key conflict.
pub fn record_conflict(provider: Provider) {
    counter!(
        "quote_gateway_conflicts_total",
        "provider" => provider.as_str()
    )
    .increment(1);
}

/// Record ticks published to symbol channels.
pub fn record_ticks_dispatched(provider: Provider, count: usize) {
    counter!(
        "quote_gateway_ticks_dispatched_total",
        "provider" => provider.as_str()
    )
    .increment(count as u64);
}

/// Record ticks a session skipped because it lagged.
pub fn record_ticks_lagged(provider: Provider, count: u64) {
    counter!(
        "quote_gateway_ticks_lagged_total",
        "provider" => provider.as_str()
    )
    .increment(count);
}

/// Update the connection state gauge.
pub fn set_connection_state(provider: Provider, state: ConnectionState) {
    gauge!(
        "quote_gateway_connection_state",
        "provider" => provider.as_str()
    )
    .set(state.as_gauge());
}

/// Update the active symbol gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_symbols(provider: Provider, count: usize) {
    gauge!(
        "quote_gateway_active_symbols",
        "provider" => provider.as_str()
    )
    .set(count as f64);
}

/// A session opened.
pub fn session_opened() {
    gauge!("quote_gateway_active_sessions").increment(1.0);
}

/// A session closed.
pub fn session_closed() {
    gauge!("quote_gateway_active_sessions").decrement(1.0);
}

/// Record frame processing duration.
pub fn record_frame_processing(provider: Provider, duration: Duration) {
    histogram!(
        "quote_gateway_frame_processing_seconds",
        "provider" => provider.as_str()
    )
    .record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_noop() {
        record_frame(Provider::Kis, "ticks");
        record_malformed(Provider::Finnhub);
        record_ticks_dispatched(Provider::Kis, 3);
        set_connection_state(Provider::Kis, ConnectionState::Connected);
        session_opened();
        session_closed();
    }

    #[test]
    fn init_is_idempotent() {
        let first = init_metrics();
        record_reconnect(Provider::Kis);
        let second = init_metrics();
        assert!(get_metrics_handle().is_some());
        assert!(second.render().contains("quote_gateway_reconnects_total"));
        drop(first);
    }
}
