//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Classifier failed on {failures} consecutive batches: {last_error}")]
    PersistentPredictionFailure { failures: u32, last_error: String },

    #[error("Alert sink failed: {0}")]
    SinkFailed(String),

    #[error("Stream already running: {0}")]
    AlreadyRunning(String),

    #[error("Pipeline task failed: {0}")]
    TaskFailed(String),

    #[error("Media error: {0}")]
    Media(#[from] sentinel_media::MediaError),

    #[error("ML error: {0}")]
    Ml(#[from] sentinel_ml::MlError),

    #[error("Invalid source: {0}")]
    Source(#[from] sentinel_models::SourceIdError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn sink_failed(msg: impl Into<String>) -> Self {
        Self::SinkFailed(msg.into())
    }

    pub fn task_failed(msg: impl Into<String>) -> Self {
        Self::TaskFailed(msg.into())
    }

    /// Whether the error was raised before any work started.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            WorkerError::ConfigError(_)
                | WorkerError::Source(_)
                | WorkerError::Media(sentinel_media::MediaError::InvalidConfiguration(_))
                | WorkerError::Ml(sentinel_ml::MlError::InvalidConfiguration(_))
        )
    }
}
