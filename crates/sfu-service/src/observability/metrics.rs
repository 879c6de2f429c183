//! Metrics definitions for the SFU service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `sfu_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `event`: the twelve inbound signaling event names
//! - `code`: `SfuError::error_code` values
//! - `status`: `completed` or `failed`

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the handle used to render
/// `/metrics`.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Recordings run from seconds to hours
        .set_buckets_for_metric(
            Matcher::Full("sfu_recording_duration_seconds".to_string()),
            &[
                5.0, 30.0, 60.0, 300.0, 900.0, 1800.0, 3600.0, 7200.0, 14400.0,
            ],
        )
        .map_err(|e| format!("Failed to set recording duration buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// Registry gauges
// ============================================================================

/// Metric: `sfu_rooms_active`
#[allow(clippy::cast_precision_loss)]
pub fn set_rooms_active(count: usize) {
    gauge!("sfu_rooms_active").set(count as f64);
}

/// Metric: `sfu_peers_active`
#[allow(clippy::cast_precision_loss)]
pub fn set_peers_active(count: usize) {
    gauge!("sfu_peers_active").set(count as f64);
}

/// Metric: `sfu_producers_active`
#[allow(clippy::cast_precision_loss)]
pub fn set_producers_active(count: usize) {
    gauge!("sfu_producers_active").set(count as f64);
}

/// Messages waiting in the registry mailbox.
///
/// Metric: `sfu_registry_mailbox_depth`
#[allow(clippy::cast_precision_loss)]
pub fn set_registry_mailbox_depth(depth: usize) {
    gauge!("sfu_registry_mailbox_depth").set(depth as f64);
}

// ============================================================================
// Signaling
// ============================================================================

/// Count an inbound signaling event.
///
/// Metric: `sfu_signaling_messages_total`
/// Labels: `event`
pub fn record_signaling_message(event: &'static str) {
    counter!("sfu_signaling_messages_total", "event" => event).increment(1);
}

/// Count an error reply.
///
/// Metric: `sfu_signaling_errors_total`
/// Labels: `code`
pub fn record_signaling_error(code: i32) {
    counter!("sfu_signaling_errors_total", "code" => code.to_string()).increment(1);
}

// ============================================================================
// Recording
// ============================================================================

/// Record a finished recording session.
///
/// Metric: `sfu_recordings_total`, `sfu_recording_duration_seconds`
/// Labels: `status`
pub fn record_recording(status: &'static str, duration: Duration) {
    counter!("sfu_recordings_total", "status" => status).increment(1);
    histogram!("sfu_recording_duration_seconds").record(duration.as_secs_f64());
}
