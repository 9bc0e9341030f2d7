//! Error types for media operations.

use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while opening or decoding a video source.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Source unavailable: {source_id}: {message}")]
    SourceUnavailable { source_id: String, message: String },

    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("Invalid frame {index}: {message}")]
    InvalidFrame { index: u64, message: String },

    #[error("Decode failed: {0}")]
    DecodeFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl MediaError {
    /// Create an invalid configuration error.
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }

    /// Create a source unavailable error.
    pub fn source_unavailable(source_id: impl ToString, message: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            source_id: source_id.to_string(),
            message: message.into(),
        }
    }

    /// Create an invalid frame error.
    pub fn invalid_frame(index: u64, message: impl Into<String>) -> Self {
        Self::InvalidFrame {
            index,
            message: message.into(),
        }
    }

    /// Create a decode failure error.
    pub fn decode_failed(message: impl Into<String>) -> Self {
        Self::DecodeFailed(message.into())
    }

    /// Whether the stream can continue past this error.
    ///
    /// Only frame-local problems are recoverable; anything else ends the
    /// source.
    pub fn is_frame_local(&self) -> bool {
        matches!(self, MediaError::InvalidFrame { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_local_classification() {
        assert!(MediaError::invalid_frame(3, "short read").is_frame_local());
        assert!(!MediaError::decode_failed("pipe closed").is_frame_local());
        assert!(!MediaError::source_unavailable("cam", "refused").is_frame_local());
    }

    #[test]
    fn test_source_unavailable_message() {
        let err = MediaError::source_unavailable("rtsp://cam/1", "connection refused");
        assert_eq!(
            err.to_string(),
            "Source unavailable: rtsp://cam/1: connection refused"
        );
    }
}
