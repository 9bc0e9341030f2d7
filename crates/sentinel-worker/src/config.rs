//! Pipeline and worker configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use sentinel_media::FrameSampler;
use sentinel_ml::{ModelConfig, SmoothingMode, DEFAULT_OUTPUT_NAME};
use sentinel_models::SourceId;

use crate::error::{WorkerError, WorkerResult};

/// What the frame queue does when it is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Evict the oldest queued frame to make room
    #[default]
    DropOldest,
    /// Wait for the consumer to make room
    Block,
}

impl fmt::Display for BackpressurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackpressurePolicy::DropOldest => write!(f, "drop_oldest"),
            BackpressurePolicy::Block => write!(f, "block"),
        }
    }
}

impl FromStr for BackpressurePolicy {
    type Err = WorkerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop_oldest" | "drop" => Ok(BackpressurePolicy::DropOldest),
            "block" => Ok(BackpressurePolicy::Block),
            other => Err(WorkerError::config_error(format!(
                "unknown backpressure policy: {}",
                other
            ))),
        }
    }
}

/// Per-source pipeline configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Sampling rate in frames per second
    pub target_fps: f64,
    /// Minimum smoothed confidence for an observation to count
    pub threshold: f32,
    /// Qualifying observations in a row needed to alert
    pub consecutive: u32,
    /// Maximum frames per classifier call
    pub batch_size: usize,
    /// Smoothing filter
    pub smoothing: SmoothingMode,
    /// EMA weight of the newest observation
    pub smoothing_alpha: f32,
    /// Majority vote window
    pub majority_window: usize,
    /// Labels reported per prediction
    pub top_k: usize,
    /// Longest wait to fill a batch once its first frame arrived
    pub batch_timeout: Duration,
    /// Frame queue capacity
    pub queue_capacity: usize,
    /// Full queue behaviour
    pub backpressure: BackpressurePolicy,
    /// Failed batches in a row before the pipeline gives up
    pub max_consecutive_failures: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_fps: 2.0,
            threshold: 0.7,
            consecutive: 3,
            batch_size: 1,
            smoothing: SmoothingMode::Ema,
            smoothing_alpha: 0.5,
            majority_window: 5,
            top_k: 3,
            batch_timeout: Duration::from_millis(200),
            queue_capacity: 32,
            backpressure: BackpressurePolicy::DropOldest,
            max_consecutive_failures: 10,
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            target_fps: env_or("FRAME_FPS", defaults.target_fps),
            threshold: env_or("THRESHOLD", defaults.threshold),
            consecutive: env_or("CONSECUTIVE", defaults.consecutive),
            batch_size: env_or("BATCH_SIZE", defaults.batch_size),
            smoothing: env_or("SMOOTHING", defaults.smoothing),
            smoothing_alpha: env_or("SMOOTHING_ALPHA", defaults.smoothing_alpha),
            majority_window: env_or("MAJORITY_WINDOW", defaults.majority_window),
            top_k: env_or("TOP_K", defaults.top_k),
            batch_timeout: Duration::from_millis(env_or(
                "BATCH_TIMEOUT_MS",
                defaults.batch_timeout.as_millis() as u64,
            )),
            queue_capacity: env_or("QUEUE_CAPACITY", defaults.queue_capacity),
            backpressure: env_or("BACKPRESSURE", defaults.backpressure),
            max_consecutive_failures: env_or(
                "MAX_CONSECUTIVE_FAILURES",
                defaults.max_consecutive_failures,
            ),
        }
    }

    /// Reject values no pipeline can run with.
    pub fn validate(&self) -> WorkerResult<()> {
        FrameSampler::validate_target(self.target_fps)?;

        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(WorkerError::config_error(format!(
                "threshold must be in [0, 1], got {}",
                self.threshold
            )));
        }
        if self.consecutive == 0 {
            return Err(WorkerError::config_error("consecutive must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(WorkerError::config_error("batch_size must be at least 1"));
        }
        if self.top_k == 0 {
            return Err(WorkerError::config_error("top_k must be at least 1"));
        }
        if self.queue_capacity == 0 {
            return Err(WorkerError::config_error("queue_capacity must be at least 1"));
        }
        if self.max_consecutive_failures == 0 {
            return Err(WorkerError::config_error(
                "max_consecutive_failures must be at least 1",
            ));
        }
        match self.smoothing {
            SmoothingMode::Ema if !(self.smoothing_alpha > 0.0 && self.smoothing_alpha <= 1.0) => {
                Err(WorkerError::config_error(format!(
                    "smoothing_alpha must be in (0, 1], got {}",
                    self.smoothing_alpha
                )))
            }
            SmoothingMode::MajorityVote if self.majority_window == 0 => Err(
                WorkerError::config_error("majority_window must be at least 1"),
            ),
            _ => Ok(()),
        }
    }
}

/// Process-level worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Settings shared by every pipeline
    pub pipeline: PipelineConfig,
    /// ONNX classifier model
    pub model_path: PathBuf,
    /// Optional JSON label file
    pub labels_path: Option<PathBuf>,
    /// Logits output tensor name
    pub model_output: String,
    /// Comma-separated source identifiers
    pub sources: Vec<String>,
    /// Prometheus listener address
    pub metrics_addr: Option<SocketAddr>,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            model_path: PathBuf::from("models/vit-ucf-crime.onnx"),
            labels_path: None,
            model_output: DEFAULT_OUTPUT_NAME.to_string(),
            sources: Vec::new(),
            metrics_addr: None,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            pipeline: PipelineConfig::from_env(),
            model_path: std::env::var("SENTINEL_MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_path),
            labels_path: std::env::var("SENTINEL_LABELS_PATH")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            model_output: std::env::var("SENTINEL_MODEL_OUTPUT")
                .unwrap_or(defaults.model_output),
            sources: std::env::var("SENTINEL_SOURCES")
                .map(|s| split_sources(&s))
                .unwrap_or_default(),
            metrics_addr: std::env::var("SENTINEL_METRICS_ADDR")
                .ok()
                .and_then(|s| s.parse().ok()),
            shutdown_timeout: Duration::from_secs(env_or(
                "SENTINEL_SHUTDOWN_TIMEOUT",
                defaults.shutdown_timeout.as_secs(),
            )),
        }
    }

    /// Parse the configured source identifiers.
    pub fn source_ids(&self) -> WorkerResult<Vec<SourceId>> {
        self.sources
            .iter()
            .map(|s| s.parse::<SourceId>().map_err(WorkerError::from))
            .collect()
    }

    /// Model loading settings.
    pub fn model_config(&self) -> ModelConfig {
        let mut config = ModelConfig::new(&self.model_path).with_top_k(self.pipeline.top_k);
        config.output_name = self.model_output.clone();
        match &self.labels_path {
            Some(path) => config.with_labels(path),
            None => config,
        }
    }
}

fn split_sources(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
