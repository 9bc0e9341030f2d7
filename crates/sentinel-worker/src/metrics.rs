//! Pipeline metrics collection.
//!
//! Counters and histograms are labelled by `source`; the recorder is
//! whatever the binary installed (Prometheus) or a no-op in tests.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

use crate::error::{WorkerError, WorkerResult};

/// Metric name constants for consistency.
pub mod names {
    pub const FRAMES_SAMPLED_TOTAL: &str = "sentinel_frames_sampled_total";
    pub const FRAMES_CLASSIFIED_TOTAL: &str = "sentinel_frames_classified_total";
    pub const FRAMES_DROPPED_TOTAL: &str = "sentinel_frames_dropped_total";
    pub const FRAMES_INVALID_TOTAL: &str = "sentinel_frames_invalid_total";
    pub const PREDICTION_FAILURES_TOTAL: &str = "sentinel_prediction_failures_total";
    pub const ALERTS_TOTAL: &str = "sentinel_alerts_total";
    pub const SINK_FAILURES_TOTAL: &str = "sentinel_sink_failures_total";
    pub const INFERENCE_DURATION_SECONDS: &str = "sentinel_inference_duration_seconds";
    pub const BATCH_SIZE: &str = "sentinel_batch_size";
    pub const ACTIVE_STREAMS: &str = "sentinel_active_streams";
}

/// Install the Prometheus exporter with an HTTP listener on `addr`.
pub fn init_prometheus(addr: SocketAddr) -> WorkerResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics exporter: {}", e)))
}

pub fn record_sampled(source: &str) {
    counter!(names::FRAMES_SAMPLED_TOTAL, "source" => source.to_string()).increment(1);
}

pub fn record_dropped(source: &str, count: u64) {
    if count > 0 {
        counter!(names::FRAMES_DROPPED_TOTAL, "source" => source.to_string()).increment(count);
    }
}

pub fn record_invalid(source: &str) {
    counter!(names::FRAMES_INVALID_TOTAL, "source" => source.to_string()).increment(1);
}

/// Record a successfully classified batch.
pub fn record_batch(source: &str, frames: usize, latency_secs: f64) {
    let labels = [("source", source.to_string())];
    counter!(names::FRAMES_CLASSIFIED_TOTAL, &labels).increment(frames as u64);
    histogram!(names::INFERENCE_DURATION_SECONDS, &labels).record(latency_secs);
    histogram!(names::BATCH_SIZE, &labels).record(frames as f64);
}

pub fn record_prediction_failure(source: &str, frames: usize) {
    counter!(names::PREDICTION_FAILURES_TOTAL, "source" => source.to_string())
        .increment(frames as u64);
}

pub fn record_alert(source: &str, label: &str) {
    counter!(
        names::ALERTS_TOTAL,
        "source" => source.to_string(),
        "label" => label.to_string()
    )
    .increment(1);
}

pub fn record_sink_failure(source: &str) {
    counter!(names::SINK_FAILURES_TOTAL, "source" => source.to_string()).increment(1);
}

pub fn set_active_streams(count: usize) {
    gauge!(names::ACTIVE_STREAMS).set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        assert!(names::FRAMES_SAMPLED_TOTAL.starts_with("sentinel_"));
        assert!(names::INFERENCE_DURATION_SECONDS.ends_with("_seconds"));
        assert!(names::ALERTS_TOTAL.ends_with("_total"));
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_sampled("0");
        record_batch("0", 4, 0.02);
        record_alert("0", "Fighting");
        set_active_streams(1);
    }
}
