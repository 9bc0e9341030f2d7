//! Classification and decision logic for the detection pipeline.
//!
//! This crate provides:
//! - Frame preprocessing into normalized NCHW tensors
//! - A classifier over any forward-pass model, with an ONNX Runtime backend
//! - At-most-once model loading shared across pipelines
//! - EMA and majority-vote smoothing of per-frame predictions
//! - The consecutive-threshold alert state machine

pub mod alert;
pub mod classifier;
pub mod error;
pub mod loader;
pub mod model;
pub mod preprocess;
pub mod smoothing;

pub use alert::{AlertDecider, DeciderState, ObservationContext};
pub use classifier::{softmax, Classifier, FrameClassifier, DEFAULT_TOP_K};
pub use error::{BoxError, MlError, MlResult};
pub use loader::{ModelConfig, ModelLoader};
pub use model::{InferenceModel, OrtModel, DEFAULT_OUTPUT_NAME};
pub use preprocess::Preprocessor;
pub use smoothing::{Ema, MajorityVote, SmoothedObservation, Smoother, SmoothingMode};
