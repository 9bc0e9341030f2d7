//! Frame classification.

use std::sync::Arc;
use tracing::debug;

use sentinel_models::{Frame, LabelScore, LabelSet, Prediction, ProbabilityVector};

use crate::error::{MlError, MlResult};
use crate::model::InferenceModel;
use crate::preprocess::Preprocessor;

/// Number of top labels reported per prediction by default.
pub const DEFAULT_TOP_K: usize = 3;

/// Numerically stable softmax.
pub fn softmax(scores: &[f32]) -> Vec<f32> {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Maps frames to probability distributions over a fixed label set.
pub trait Classifier: Send + Sync {
    /// Label vocabulary every prediction is aligned to.
    fn labels(&self) -> &LabelSet;

    /// One prediction per frame, in input order.
    fn classify_batch(&self, frames: &[Frame]) -> MlResult<Vec<Prediction>>;

    fn classify(&self, frame: &Frame) -> MlResult<Prediction> {
        self.classify_batch(std::slice::from_ref(frame))?
            .pop()
            .ok_or_else(|| MlError::prediction_contract("classifier returned no prediction"))
    }
}

/// [`Classifier`] over any [`InferenceModel`].
pub struct FrameClassifier {
    model: Arc<dyn InferenceModel>,
    labels: LabelSet,
    preprocessor: Preprocessor,
    top_k: usize,
}

impl FrameClassifier {
    /// Build a classifier, resolving its label set once.
    ///
    /// Labels come from `labels` if given, then from the model's own
    /// mapping, and otherwise are the stringified class indices.
    pub fn new(
        model: Arc<dyn InferenceModel>,
        labels: Option<LabelSet>,
        top_k: usize,
    ) -> MlResult<Self> {
        let classes = model.num_classes();
        if classes == 0 {
            return Err(MlError::invalid_configuration("model reports zero classes"));
        }

        let labels = match labels {
            Some(labels) => labels,
            None => match model.id2label() {
                Some(names) => LabelSet::new(names)
                    .map_err(|e| MlError::invalid_configuration(format!("model labels: {}", e)))?,
                None => LabelSet::synthetic(classes),
            },
        };

        if labels.len() != classes {
            return Err(MlError::invalid_configuration(format!(
                "label set has {} entries but model outputs {} classes",
                labels.len(),
                classes
            )));
        }
        if top_k == 0 || top_k > labels.len() {
            return Err(MlError::invalid_configuration(format!(
                "top_k must be between 1 and {}, got {}",
                labels.len(),
                top_k
            )));
        }

        Ok(Self {
            preprocessor: Preprocessor::new(model.input_size()),
            model,
            labels,
            top_k,
        })
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    fn prediction(&self, frame: &Frame, scores: &[f32]) -> Prediction {
        let probabilities = ProbabilityVector::new(softmax(scores));
        let top = probabilities
            .top_k(self.top_k)
            .into_iter()
            .map(|(index, score)| LabelScore {
                label: self.labels.name(index).unwrap_or_default().to_string(),
                score,
            })
            .collect();

        Prediction {
            frame_index: frame.index(),
            timestamp: frame.timestamp(),
            probabilities,
            top,
        }
    }
}

impl Classifier for FrameClassifier {
    fn labels(&self) -> &LabelSet {
        &self.labels
    }

    fn classify_batch(&self, frames: &[Frame]) -> MlResult<Vec<Prediction>> {
        if frames.is_empty() {
            return Ok(Vec::new());
        }

        let input = self.preprocessor.batch_tensor(frames)?;
        let scores = self
            .model
            .forward(input)
            .map_err(|e| MlError::prediction_failure("forward pass failed", e))?;

        let expected = (frames.len(), self.labels.len());
        if scores.dim() != expected {
            return Err(MlError::prediction_contract(format!(
                "model output shape {:?} does not match {:?}",
                scores.dim(),
                expected
            )));
        }

        if let Some((row, _)) = scores
            .rows()
            .into_iter()
            .enumerate()
            .find(|(_, row)| row.iter().any(|s| !s.is_finite()))
        {
            return Err(MlError::prediction_contract(format!(
                "model returned non-finite scores for frame {}",
                frames[row].index()
            )));
        }

        debug!(batch = frames.len(), "Classified batch");

        Ok(frames
            .iter()
            .zip(scores.rows())
            .map(|(frame, row)| self.prediction(frame, &row.to_vec()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use ndarray::{Array2, Array4};
    use std::time::Duration;

    /// Scores each frame by its first normalized pixel value.
    struct FakeModel {
        classes: usize,
        labels: Option<Vec<String>>,
        fail: bool,
        extra_rows: usize,
        poison: Option<f32>,
    }

    impl FakeModel {
        fn new(classes: usize) -> Self {
            Self {
                classes,
                labels: None,
                fail: false,
                extra_rows: 0,
                poison: None,
            }
        }
    }

    impl InferenceModel for FakeModel {
        fn forward(&self, input: Array4<f32>) -> Result<Array2<f32>, BoxError> {
            if self.fail {
                return Err("device lost".into());
            }
            let batch = input.shape()[0];
            let mut scores = Array2::from_shape_fn((batch + self.extra_rows, self.classes), |(n, c)| {
                let n = n.min(batch - 1);
                input[[n, 0, 0, 0]] * c as f32
            });
            if let Some(value) = self.poison {
                scores[[batch - 1, 0]] = value;
            }
            Ok(scores)
        }

        fn input_size(&self) -> u32 {
            4
        }

        fn num_classes(&self) -> usize {
            self.classes
        }

        fn id2label(&self) -> Option<Vec<String>> {
            self.labels.clone()
        }
    }

    fn frame(index: u64, value: u8) -> Frame {
        Frame::new(index, Duration::from_millis(index * 100), 4, 4, vec![value; 48])
    }

    #[test]
    fn test_softmax_is_stable_and_normalized() {
        let probs = softmax(&[1000.0, 1000.0, 999.0]);
        assert!(probs.iter().all(|p| p.is_finite()));
        assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert!((probs[0] - probs[1]).abs() < 1e-7);
    }

    #[test]
    fn test_empty_batch() {
        let classifier = FrameClassifier::new(Arc::new(FakeModel::new(3)), None, 2).unwrap();
        assert!(classifier.classify_batch(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_batch_in_order_and_normalized() {
        let classifier = FrameClassifier::new(Arc::new(FakeModel::new(4)), None, 3).unwrap();
        let frames: Vec<Frame> = (0..5).map(|i| frame(i * 15, (i * 40) as u8)).collect();

        let predictions = classifier.classify_batch(&frames).unwrap();

        assert_eq!(predictions.len(), 5);
        for (frame, prediction) in frames.iter().zip(&predictions) {
            assert_eq!(prediction.frame_index, frame.index());
            assert_eq!(prediction.timestamp, frame.timestamp());
            assert_eq!(prediction.probabilities.len(), 4);
            assert!(prediction.probabilities.is_normalized(1e-4));
            assert_eq!(prediction.top.len(), 3);
            assert!(prediction.top.windows(2).all(|w| w[0].score >= w[1].score));
        }
    }

    #[test]
    fn test_label_resolution_order() {
        let synthetic = FrameClassifier::new(Arc::new(FakeModel::new(3)), None, 1).unwrap();
        assert_eq!(synthetic.labels().as_slice(), &["0", "1", "2"]);

        let mut model = FakeModel::new(2);
        model.labels = Some(vec!["Normal".into(), "Fighting".into()]);
        let from_model = FrameClassifier::new(Arc::new(model), None, 1).unwrap();
        assert_eq!(from_model.labels().name(1), Some("Fighting"));

        let mut model = FakeModel::new(2);
        model.labels = Some(vec!["Normal".into(), "Fighting".into()]);
        let explicit = LabelSet::new(["Calm", "Riot"]).unwrap();
        let classifier = FrameClassifier::new(Arc::new(model), Some(explicit), 1).unwrap();
        assert_eq!(classifier.labels().name(0), Some("Calm"));
    }

    #[test]
    fn test_label_size_mismatch_rejected() {
        let result = FrameClassifier::new(Arc::new(FakeModel::new(3)), Some(LabelSet::ucf_crime()), 3);
        assert!(matches!(result, Err(MlError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_top_k_bounds() {
        assert!(FrameClassifier::new(Arc::new(FakeModel::new(3)), None, 0).is_err());
        assert!(FrameClassifier::new(Arc::new(FakeModel::new(3)), None, 4).is_err());
        assert!(FrameClassifier::new(Arc::new(FakeModel::new(3)), None, 3).is_ok());
    }

    #[test]
    fn test_degenerate_frame_skips_model() {
        let mut model = FakeModel::new(3);
        model.fail = true;
        let classifier = FrameClassifier::new(Arc::new(model), None, 1).unwrap();
        let bad = Frame::new(7, Duration::ZERO, 4, 4, vec![0u8; 10]);
        assert!(matches!(
            classifier.classify(&bad),
            Err(MlError::InvalidFrame { index: 7, .. })
        ));
    }

    #[test]
    fn test_forward_failure_wrapped_with_cause() {
        use std::error::Error as _;

        let mut model = FakeModel::new(3);
        model.fail = true;
        let classifier = FrameClassifier::new(Arc::new(model), None, 1).unwrap();
        let err = classifier.classify(&frame(0, 10)).unwrap_err();
        assert!(matches!(err, MlError::PredictionFailure { .. }));
        assert_eq!(err.source().unwrap().to_string(), "device lost");
    }

    #[test]
    fn test_wrong_output_shape_is_prediction_failure() {
        let mut model = FakeModel::new(3);
        model.extra_rows = 1;
        let classifier = FrameClassifier::new(Arc::new(model), None, 1).unwrap();
        assert!(matches!(
            classifier.classify_batch(&[frame(0, 1)]),
            Err(MlError::PredictionFailure { .. })
        ));
    }

    #[test]
    fn test_non_finite_scores_rejected() {
        for value in [f32::INFINITY, f32::NEG_INFINITY, f32::NAN] {
            let mut model = FakeModel::new(2);
            model.poison = Some(value);
            let classifier = FrameClassifier::new(Arc::new(model), None, 1).unwrap();

            let err = classifier
                .classify_batch(&[frame(0, 10), frame(15, 20)])
                .unwrap_err();
            assert!(matches!(err, MlError::PredictionFailure { .. }), "{}", value);
            assert!(err.is_recoverable());
            assert!(err.to_string().contains("frame 15"), "{}", err);
        }
    }
}
