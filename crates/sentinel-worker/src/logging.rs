//! Structured per-stream logging.
//!
//! Every pipeline logs its lifecycle with the same `source` field so a
//! single camera can be followed through interleaved output.

use tracing::{error, info, warn, Span};

use sentinel_models::SourceId;

use crate::pipeline::PipelineReport;

/// Stream logger with a fixed `source` field.
#[derive(Debug, Clone)]
pub struct StreamLogger {
    source: String,
    live: bool,
}

impl StreamLogger {
    pub fn new(source: &SourceId) -> Self {
        Self {
            source: source.to_string(),
            live: source.is_live(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(source = %self.source, live = self.live, "Stream started: {}", message);
    }

    pub fn log_warning(&self, message: &str) {
        warn!(source = %self.source, "Stream warning: {}", message);
    }

    pub fn log_error(&self, message: &str) {
        error!(source = %self.source, "Stream error: {}", message);
    }

    /// Log the final counters of a finished pipeline.
    pub fn log_completion(&self, report: &PipelineReport) {
        info!(
            source = %self.source,
            end_reason = %report.end_reason,
            sampled = report.sampled,
            classified = report.classified,
            dropped = report.dropped,
            invalid = report.invalid,
            prediction_failures = report.prediction_failures,
            alerts = report.alerts,
            "Stream finished"
        );
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Span wrapping all work done for this stream.
    pub fn create_span(&self) -> Span {
        tracing::info_span!("stream", source = %self.source)
    }
}
