//! Error types for classification and decision logic.

use std::path::PathBuf;
use thiserror::Error;

/// Boxed cause attached to wrapped failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for ML operations.
pub type MlResult<T> = Result<T, MlError>;

/// Errors from classifiers, smoothers and deciders.
#[derive(Debug, Error)]
pub enum MlError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid frame {index}: {message}")]
    InvalidFrame { index: u64, message: String },

    #[error("Prediction failed: {message}")]
    PredictionFailure {
        message: String,
        #[source]
        cause: Option<BoxError>,
    },

    #[error("Dimension mismatch: expected {expected} entries, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Model not found: {0}")]
    ModelNotFound(PathBuf),

    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("Model not loaded")]
    NotLoaded,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl MlError {
    /// Create an invalid configuration error.
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }

    /// Create an invalid frame error.
    pub fn invalid_frame(index: u64, message: impl Into<String>) -> Self {
        Self::InvalidFrame {
            index,
            message: message.into(),
        }
    }

    /// Wrap a failure from inside the forward pass.
    pub fn prediction_failure(message: impl Into<String>, cause: impl Into<BoxError>) -> Self {
        Self::PredictionFailure {
            message: message.into(),
            cause: Some(cause.into()),
        }
    }

    /// A prediction failure with no underlying error (contract violations).
    pub fn prediction_contract(message: impl Into<String>) -> Self {
        Self::PredictionFailure {
            message: message.into(),
            cause: None,
        }
    }

    /// Create a model load error.
    pub fn model_load(message: impl Into<String>) -> Self {
        Self::ModelLoad(message.into())
    }

    /// Whether the error affects only the frames it was raised for.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MlError::InvalidFrame { .. } | MlError::PredictionFailure { .. }
        )
    }
}
