//! Per-frame classification results.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Probability distribution over a label set, in label index order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProbabilityVector(Vec<f32>);

impl ProbabilityVector {
    /// Wrap already-normalized probabilities.
    pub fn new(probs: Vec<f32>) -> Self {
        Self(probs)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }

    /// Probability at a label index.
    pub fn get(&self, index: usize) -> Option<f32> {
        self.0.get(index).copied()
    }

    /// Sum of all entries.
    pub fn sum(&self) -> f32 {
        self.0.iter().sum()
    }

    /// Check entries are non-negative and sum to one within `tolerance`.
    pub fn is_normalized(&self, tolerance: f32) -> bool {
        !self.0.is_empty()
            && self.0.iter().all(|p| *p >= 0.0 && p.is_finite())
            && (self.sum() - 1.0).abs() <= tolerance
    }

    /// Index and value of the highest probability.
    ///
    /// Ties resolve to the lowest index.
    pub fn argmax(&self) -> Option<(usize, f32)> {
        let mut best: Option<(usize, f32)> = None;
        for (i, &p) in self.0.iter().enumerate() {
            match best {
                Some((_, b)) if p <= b => {}
                _ => best = Some((i, p)),
            }
        }
        best
    }

    /// The `k` highest entries as `(index, probability)`, descending.
    pub fn top_k(&self, k: usize) -> Vec<(usize, f32)> {
        let mut ranked: Vec<(usize, f32)> = self.0.iter().copied().enumerate().collect();
        // Stable sort keeps lower indices first among equal scores
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(k);
        ranked
    }
}

impl From<Vec<f32>> for ProbabilityVector {
    fn from(probs: Vec<f32>) -> Self {
        Self(probs)
    }
}

/// A label name with its score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelScore {
    pub label: String,
    pub score: f32,
}

/// Classification result for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Source frame index
    pub frame_index: u64,
    /// Source-relative timestamp
    pub timestamp: Duration,
    /// Full distribution aligned to the label set
    pub probabilities: ProbabilityVector,
    /// Highest-scoring labels, descending
    pub top: Vec<LabelScore>,
}

impl Prediction {
    /// Most likely label index and its probability.
    pub fn best(&self) -> Option<(usize, f32)> {
        self.probabilities.argmax()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argmax_prefers_lowest_index_on_tie() {
        let v = ProbabilityVector::new(vec![0.1, 0.45, 0.45]);
        assert_eq!(v.argmax(), Some((1, 0.45)));
        assert_eq!(ProbabilityVector::new(vec![]).argmax(), None);
    }

    #[test]
    fn test_top_k_descending() {
        let v = ProbabilityVector::new(vec![0.1, 0.6, 0.05, 0.25]);
        assert_eq!(v.top_k(2), vec![(1, 0.6), (3, 0.25)]);
        assert_eq!(v.top_k(10).len(), 4);
    }

    #[test]
    fn test_is_normalized() {
        assert!(ProbabilityVector::new(vec![0.5, 0.5]).is_normalized(1e-4));
        assert!(!ProbabilityVector::new(vec![0.5, 0.6]).is_normalized(1e-4));
        assert!(!ProbabilityVector::new(vec![1.2, -0.2]).is_normalized(1e-4));
    }
}
