//! Video source identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use url::Url;

/// Errors parsing a source identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceIdError {
    #[error("Empty source identifier")]
    Empty,

    #[error("Invalid stream URL {url}: {message}")]
    InvalidUrl { url: String, message: String },
}

/// Opaque handle for a video source: a file, a network stream or a local
/// capture device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum SourceId {
    /// Video file on disk
    File(PathBuf),
    /// Network stream (rtsp, http, ...)
    Url(Url),
    /// Local capture device index
    Device(u32),
}

impl SourceId {
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self::File(path.as_ref().to_path_buf())
    }

    pub fn device(index: u32) -> Self {
        Self::Device(index)
    }

    /// Whether the source is unbounded (network stream or device).
    pub fn is_live(&self) -> bool {
        !matches!(self, SourceId::File(_))
    }

    /// URL scheme for network sources.
    pub fn scheme(&self) -> Option<&str> {
        match self {
            SourceId::Url(url) => Some(url.scheme()),
            _ => None,
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceId::File(path) => write!(f, "{}", path.display()),
            SourceId::Url(url) => write!(f, "{}", url),
            SourceId::Device(index) => write!(f, "{}", index),
        }
    }
}

impl FromStr for SourceId {
    type Err = SourceIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(SourceIdError::Empty);
        }

        if let Ok(index) = s.parse::<u32>() {
            return Ok(SourceId::Device(index));
        }

        if s.contains("://") {
            return Url::parse(s)
                .map(SourceId::Url)
                .map_err(|e| SourceIdError::InvalidUrl {
                    url: s.to_string(),
                    message: e.to_string(),
                });
        }

        Ok(SourceId::File(PathBuf::from(s)))
    }
}

impl From<u32> for SourceId {
    fn from(index: u32) -> Self {
        SourceId::Device(index)
    }
}

impl From<SourceId> for String {
    fn from(source: SourceId) -> Self {
        source.to_string()
    }
}

impl TryFrom<String> for SourceId {
    type Error = SourceIdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_variants() {
        assert_eq!("0".parse::<SourceId>().unwrap(), SourceId::Device(0));
        assert_eq!(
            "videos/lobby.mp4".parse::<SourceId>().unwrap(),
            SourceId::file("videos/lobby.mp4")
        );

        let rtsp: SourceId = "rtsp://cam.local:554/stream1".parse().unwrap();
        assert_eq!(rtsp.scheme(), Some("rtsp"));
        assert!(rtsp.is_live());
        assert!(!SourceId::file("a.mp4").is_live());
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("  ".parse::<SourceId>(), Err(SourceIdError::Empty));
        assert!(matches!(
            "http://".parse::<SourceId>(),
            Err(SourceIdError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_display_round_trip() {
        for raw in ["3", "clips/a.mp4", "rtsp://10.0.0.2/live"] {
            let source: SourceId = raw.parse().unwrap();
            assert_eq!(source.to_string().parse::<SourceId>().unwrap(), source);
        }
    }
}
