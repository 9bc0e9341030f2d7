//! Shared data models for the Sentinel detection pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Decoded video frames and source identifiers
//! - The label vocabulary shared by classifier and decision logic
//! - Per-frame predictions and probability vectors
//! - Alert records emitted to downstream sinks

pub mod alert;
pub mod frame;
pub mod label;
pub mod prediction;
pub mod source;

// Re-export common types
pub use alert::{Alert, AlertId};
pub use frame::{ChannelOrder, Frame};
pub use label::{LabelSet, LabelSetError, UCF_CRIME_LABELS};
pub use prediction::{LabelScore, Prediction, ProbabilityVector};
pub use source::{SourceId, SourceIdError};
