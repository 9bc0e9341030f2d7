//! Alert records emitted when a sustained event is detected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::SourceId;

/// Unique identifier for an alert.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(pub String);

impl AlertId {
    /// Generate a new random alert ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for AlertId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An event that stayed above the confidence threshold for the required
/// number of consecutive observations.
///
/// Emitted at most once per streak. Downstream consumers own its lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    /// Source the streak was observed on (absent for standalone deciders)
    pub source: Option<SourceId>,
    /// Event label
    pub label: String,
    /// Label index in the classifier's label set
    pub label_index: usize,
    /// Confidence of the observation that triggered the alert
    pub confidence: f32,
    /// Wall-clock time of the first observation in the streak
    pub started_at: DateTime<Utc>,
    /// Wall-clock time of the triggering observation
    pub triggered_at: DateTime<Utc>,
    /// Source frame index where the streak began
    pub start_frame: u64,
    /// Source frame index that triggered the alert
    pub trigger_frame: u64,
    /// Source-relative time of the streak start, in seconds
    pub start_offset_secs: f64,
    /// Source-relative time of the trigger, in seconds
    pub trigger_offset_secs: f64,
}

impl Alert {
    /// Attach the originating source.
    pub fn with_source(mut self, source: SourceId) -> Self {
        self.source = Some(source);
        self
    }

    /// Source-relative streak duration in seconds.
    pub fn streak_duration_secs(&self) -> f64 {
        (self.trigger_offset_secs - self.start_offset_secs).max(0.0)
    }
}
