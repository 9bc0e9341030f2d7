//! Temporal smoothing of per-frame predictions.
//!
//! Two interchangeable filters: an exponential moving average over full
//! probability vectors, and a majority vote over the last few predicted
//! labels.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use sentinel_models::{LabelSet, Prediction, ProbabilityVector};

use crate::error::{MlError, MlResult};

/// Exponential moving average over probability vectors.
#[derive(Debug, Clone)]
pub struct Ema {
    alpha: f32,
    state: Option<Vec<f32>>,
}

impl Ema {
    /// `alpha` must lie in `(0, 1]`.
    pub fn new(alpha: f32) -> MlResult<Self> {
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(MlError::invalid_configuration(format!(
                "smoothing alpha must be in (0, 1], got {}",
                alpha
            )));
        }
        Ok(Self { alpha, state: None })
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    /// Fold in one observation and return the new smoothed vector.
    ///
    /// The first observation is returned unchanged.
    pub fn update(&mut self, observation: &ProbabilityVector) -> MlResult<ProbabilityVector> {
        let obs = observation.as_slice();
        let next: Vec<f32> = match &self.state {
            None => obs.to_vec(),
            Some(prev) => {
                if prev.len() != obs.len() {
                    return Err(MlError::DimensionMismatch {
                        expected: prev.len(),
                        actual: obs.len(),
                    });
                }
                prev.iter()
                    .zip(obs)
                    .map(|(p, o)| self.alpha * o + (1.0 - self.alpha) * p)
                    .collect()
            }
        };
        self.state = Some(next.clone());
        Ok(ProbabilityVector::new(next))
    }

    pub fn reset(&mut self) {
        self.state = None;
    }
}

/// Majority vote over a sliding window of label indices.
#[derive(Debug, Clone)]
pub struct MajorityVote {
    window: usize,
    history: VecDeque<usize>,
}

impl MajorityVote {
    /// `window` must be at least 1.
    pub fn new(window: usize) -> MlResult<Self> {
        if window == 0 {
            return Err(MlError::invalid_configuration(
                "majority window must be at least 1",
            ));
        }
        Ok(Self {
            window,
            history: VecDeque::with_capacity(window + 1),
        })
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Record a label and return the most frequent label in the window.
    ///
    /// Ties go to the smallest label index.
    pub fn update(&mut self, label: usize) -> usize {
        self.history.push_back(label);
        while self.history.len() > self.window {
            self.history.pop_front();
        }

        let mut counts: Vec<(usize, usize)> = Vec::with_capacity(self.history.len());
        for &l in &self.history {
            match counts.iter_mut().find(|(label, _)| *label == l) {
                Some((_, count)) => *count += 1,
                None => counts.push((l, 1)),
            }
        }

        counts
            .into_iter()
            .max_by(|(la, ca), (lb, cb)| ca.cmp(cb).then(lb.cmp(la)))
            .map(|(label, _)| label)
            .unwrap_or(label)
    }

    /// Window contents, oldest first.
    pub fn history(&self) -> impl Iterator<Item = usize> + '_ {
        self.history.iter().copied()
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }
}

/// Which smoothing filter a pipeline uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmoothingMode {
    #[default]
    Ema,
    #[serde(alias = "majority")]
    MajorityVote,
}

impl SmoothingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SmoothingMode::Ema => "ema",
            SmoothingMode::MajorityVote => "majority_vote",
        }
    }
}

impl fmt::Display for SmoothingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SmoothingMode {
    type Err = MlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ema" => Ok(SmoothingMode::Ema),
            "majority" | "majority_vote" | "vote" => Ok(SmoothingMode::MajorityVote),
            other => Err(MlError::invalid_configuration(format!(
                "unknown smoothing mode: {}",
                other
            ))),
        }
    }
}

/// Smoothed label decision for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct SmoothedObservation {
    pub label_index: usize,
    pub label: String,
    pub confidence: f32,
}

/// Per-pipeline smoothing filter.
#[derive(Debug, Clone)]
pub enum Smoother {
    Ema(Ema),
    MajorityVote(MajorityVote),
}

impl Smoother {
    /// Build the filter selected by `mode`. Only the matching parameter is
    /// validated.
    pub fn from_mode(mode: SmoothingMode, alpha: f32, window: usize) -> MlResult<Self> {
        Ok(match mode {
            SmoothingMode::Ema => Smoother::Ema(Ema::new(alpha)?),
            SmoothingMode::MajorityVote => Smoother::MajorityVote(MajorityVote::new(window)?),
        })
    }

    pub fn mode(&self) -> SmoothingMode {
        match self {
            Smoother::Ema(_) => SmoothingMode::Ema,
            Smoother::MajorityVote(_) => SmoothingMode::MajorityVote,
        }
    }

    /// Smooth one prediction into a label and confidence.
    pub fn observe(
        &mut self,
        prediction: &Prediction,
        labels: &LabelSet,
    ) -> MlResult<SmoothedObservation> {
        let probs = &prediction.probabilities;
        if probs.len() != labels.len() {
            return Err(MlError::DimensionMismatch {
                expected: labels.len(),
                actual: probs.len(),
            });
        }

        let (label_index, confidence) = match self {
            Smoother::Ema(ema) => {
                let smoothed = ema.update(probs)?;
                smoothed.argmax().ok_or(MlError::DimensionMismatch {
                    expected: labels.len(),
                    actual: 0,
                })?
            }
            Smoother::MajorityVote(vote) => {
                let (raw, _) = prediction.best().ok_or(MlError::DimensionMismatch {
                    expected: labels.len(),
                    actual: 0,
                })?;
                let voted = vote.update(raw);
                (voted, probs.get(voted).unwrap_or(0.0))
            }
        };

        Ok(SmoothedObservation {
            label_index,
            label: labels.name(label_index).unwrap_or_default().to_string(),
            confidence,
        })
    }

    pub fn reset(&mut self) {
        match self {
            Smoother::Ema(ema) => ema.reset(),
            Smoother::MajorityVote(vote) => vote.reset(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn pv(values: &[f32]) -> ProbabilityVector {
        ProbabilityVector::new(values.to_vec())
    }

    fn prediction(values: &[f32]) -> Prediction {
        Prediction {
            frame_index: 0,
            timestamp: Duration::ZERO,
            probabilities: pv(values),
            top: Vec::new(),
        }
    }

    #[test]
    fn test_ema_first_update_is_identity() {
        let mut ema = Ema::new(0.3).unwrap();
        let v0 = pv(&[0.1, 0.7, 0.2]);
        assert_eq!(ema.update(&v0).unwrap(), v0);
        assert!(ema.is_initialized());
    }

    #[test]
    fn test_ema_blends() {
        let mut ema = Ema::new(0.5).unwrap();
        ema.update(&pv(&[1.0, 0.0])).unwrap();
        let out = ema.update(&pv(&[0.0, 1.0])).unwrap();
        assert_eq!(out.as_slice(), &[0.5, 0.5]);
    }

    #[test]
    fn test_ema_is_deterministic() {
        let inputs = [
            pv(&[0.2, 0.3, 0.5]),
            pv(&[0.6, 0.3, 0.1]),
            pv(&[0.15, 0.8, 0.05]),
            pv(&[0.33, 0.33, 0.34]),
        ];
        let run = || {
            let mut ema = Ema::new(0.37).unwrap();
            inputs
                .iter()
                .map(|v| ema.update(v).unwrap())
                .map(|v| v.as_slice().iter().map(|p| p.to_bits()).collect::<Vec<_>>())
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_ema_alpha_bounds() {
        assert!(Ema::new(0.0).is_err());
        assert!(Ema::new(1.5).is_err());
        assert!(Ema::new(f32::NAN).is_err());
        assert!(Ema::new(1.0).is_ok());
    }

    #[test]
    fn test_ema_dimension_mismatch_and_reset() {
        let mut ema = Ema::new(0.5).unwrap();
        ema.update(&pv(&[0.5, 0.5])).unwrap();
        assert!(matches!(
            ema.update(&pv(&[1.0])),
            Err(MlError::DimensionMismatch { expected: 2, actual: 1 })
        ));

        ema.reset();
        assert!(!ema.is_initialized());
        assert_eq!(ema.update(&pv(&[1.0])).unwrap().as_slice(), &[1.0]);
    }

    #[test]
    fn test_majority_vote() {
        let mut vote = MajorityVote::new(5).unwrap();
        let mut last = 0;
        for label in [1, 1, 1, 2, 2] {
            last = vote.update(label);
        }
        assert_eq!(last, 1);
    }

    #[test]
    fn test_majority_window_is_fifo() {
        let mut vote = MajorityVote::new(3).unwrap();
        for label in 0..5 {
            vote.update(label);
        }
        assert_eq!(vote.history().collect::<Vec<_>>(), vec![2, 3, 4]);
    }

    #[test]
    fn test_majority_tie_prefers_smallest_index() {
        let mut vote = MajorityVote::new(4).unwrap();
        let mut last = 0;
        for label in [1, 1, 2, 2] {
            last = vote.update(label);
        }
        assert_eq!(last, 1);

        let mut vote = MajorityVote::new(2).unwrap();
        vote.update(5);
        assert_eq!(vote.update(3), 3);
    }

    #[test]
    fn test_majority_window_bounds() {
        assert!(MajorityVote::new(0).is_err());
    }

    #[test]
    fn test_smoothing_mode_parse() {
        assert_eq!("EMA".parse::<SmoothingMode>().unwrap(), SmoothingMode::Ema);
        assert_eq!(
            "majority".parse::<SmoothingMode>().unwrap(),
            SmoothingMode::MajorityVote
        );
        assert!("median".parse::<SmoothingMode>().is_err());
    }

    #[test]
    fn test_smoother_ema_observation() {
        let labels = LabelSet::new(["Normal", "Fighting"]).unwrap();
        let mut smoother = Smoother::from_mode(SmoothingMode::Ema, 0.5, 0).unwrap();

        let first = smoother.observe(&prediction(&[0.2, 0.8]), &labels).unwrap();
        assert_eq!(first.label, "Fighting");
        assert_eq!(first.confidence, 0.8);

        let second = smoother.observe(&prediction(&[0.6, 0.4]), &labels).unwrap();
        assert_eq!(second.label_index, 1);
        assert!((second.confidence - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_smoother_majority_uses_current_confidence() {
        let labels = LabelSet::synthetic(3);
        let mut smoother = Smoother::from_mode(SmoothingMode::MajorityVote, 0.0, 3).unwrap();

        smoother.observe(&prediction(&[0.1, 0.9, 0.0]), &labels).unwrap();
        smoother.observe(&prediction(&[0.1, 0.8, 0.1]), &labels).unwrap();
        let obs = smoother.observe(&prediction(&[0.3, 0.2, 0.5]), &labels).unwrap();

        assert_eq!(obs.label_index, 1);
        assert_eq!(obs.confidence, 0.2);
    }

    #[test]
    fn test_smoother_rejects_misaligned_prediction() {
        let mut smoother = Smoother::from_mode(SmoothingMode::Ema, 0.5, 1).unwrap();
        let result = smoother.observe(&prediction(&[1.0]), &LabelSet::synthetic(2));
        assert!(matches!(result, Err(MlError::DimensionMismatch { .. })));
    }
}
