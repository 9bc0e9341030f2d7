//! Consecutive-threshold alert state machine.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, info};

use sentinel_models::{Alert, AlertId, LabelSet, SourceId};

use crate::error::{MlError, MlResult};
use crate::smoothing::SmoothedObservation;

/// Where and when an observation was made.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationContext {
    /// Source frame index
    pub frame_index: u64,
    /// Source-relative timestamp
    pub timestamp: Duration,
    /// Wall-clock time of the observation
    pub at: DateTime<Utc>,
}

impl ObservationContext {
    /// Context stamped with the current wall-clock time.
    pub fn new(frame_index: u64, timestamp: Duration) -> Self {
        Self {
            frame_index,
            timestamp,
            at: Utc::now(),
        }
    }

    pub fn with_time(mut self, at: DateTime<Utc>) -> Self {
        self.at = at;
        self
    }
}

/// Decider state.
#[derive(Debug, Clone, PartialEq)]
pub enum DeciderState {
    Idle,
    /// Qualifying streak below the required length
    Accumulating {
        label: usize,
        streak: u32,
        started: ObservationContext,
    },
    /// Streak reached the required length and its alert was emitted
    Fired {
        label: usize,
        streak: u32,
        started: ObservationContext,
    },
}

/// Turns smoothed observations into at most one alert per sustained streak.
///
/// An observation qualifies when its confidence is at or above the
/// threshold. `consecutive` qualifying observations of the same label emit
/// one alert; a non-qualifying observation resets to idle, and a qualifying
/// observation of a different label starts a new streak.
///
/// Every label can alert, background classes such as `Normal` included;
/// callers that only want event classes filter alerts by label.
#[derive(Debug, Clone)]
pub struct AlertDecider {
    labels: LabelSet,
    threshold: f32,
    consecutive: u32,
    source: Option<SourceId>,
    state: DeciderState,
}

impl AlertDecider {
    pub fn new(labels: LabelSet, threshold: f32, consecutive: u32) -> MlResult<Self> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(MlError::invalid_configuration(format!(
                "threshold must be in [0, 1], got {}",
                threshold
            )));
        }
        if consecutive == 0 {
            return Err(MlError::invalid_configuration(
                "consecutive must be at least 1",
            ));
        }
        Ok(Self {
            labels,
            threshold,
            consecutive,
            source: None,
            state: DeciderState::Idle,
        })
    }

    /// Tag emitted alerts with their source.
    pub fn with_source(mut self, source: SourceId) -> Self {
        self.source = Some(source);
        self
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn state(&self) -> &DeciderState {
        &self.state
    }

    /// Current streak length, 0 when idle.
    pub fn streak(&self) -> u32 {
        match &self.state {
            DeciderState::Idle => 0,
            DeciderState::Accumulating { streak, .. } | DeciderState::Fired { streak, .. } => {
                *streak
            }
        }
    }

    /// Label of the current streak.
    pub fn tracked_label(&self) -> Option<usize> {
        match &self.state {
            DeciderState::Idle => None,
            DeciderState::Accumulating { label, .. } | DeciderState::Fired { label, .. } => {
                Some(*label)
            }
        }
    }

    pub fn reset(&mut self) {
        self.state = DeciderState::Idle;
    }

    /// Advance the state machine by one observation.
    pub fn update(
        &mut self,
        observation: &SmoothedObservation,
        context: &ObservationContext,
    ) -> Option<Alert> {
        // NaN confidence never qualifies
        if !(observation.confidence >= self.threshold) {
            if self.streak() > 0 {
                debug!(
                    frame = context.frame_index,
                    confidence = observation.confidence,
                    "Streak broken by low confidence"
                );
            }
            self.state = DeciderState::Idle;
            return None;
        }

        let label = observation.label_index;
        let (streak, started, fired) = match &self.state {
            DeciderState::Accumulating {
                label: tracked,
                streak,
                started,
            } if *tracked == label => (streak.saturating_add(1), started.clone(), false),
            DeciderState::Fired {
                label: tracked,
                streak,
                started,
            } if *tracked == label => (streak.saturating_add(1), started.clone(), true),
            _ => (1, context.clone(), false),
        };

        if streak < self.consecutive {
            self.state = DeciderState::Accumulating {
                label,
                streak,
                started,
            };
            return None;
        }

        let alert = (!fired).then(|| self.build_alert(observation, &started, context));
        self.state = DeciderState::Fired {
            label,
            streak,
            started,
        };

        if let Some(alert) = &alert {
            info!(
                alert_id = %alert.id,
                label = %alert.label,
                confidence = alert.confidence,
                start_frame = alert.start_frame,
                trigger_frame = alert.trigger_frame,
                "Alert triggered"
            );
        }
        alert
    }

    fn build_alert(
        &self,
        observation: &SmoothedObservation,
        started: &ObservationContext,
        context: &ObservationContext,
    ) -> Alert {
        let label = self
            .labels
            .name(observation.label_index)
            .map(str::to_string)
            .unwrap_or_else(|| observation.label.clone());

        Alert {
            id: AlertId::new(),
            source: self.source.clone(),
            label,
            label_index: observation.label_index,
            confidence: observation.confidence,
            started_at: started.at,
            triggered_at: context.at,
            start_frame: started.frame_index,
            trigger_frame: context.frame_index,
            start_offset_secs: started.timestamp.as_secs_f64(),
            trigger_offset_secs: context.timestamp.as_secs_f64(),
        }
    }
}
