//! Detection pipeline worker.
//!
//! This crate provides:
//! - The per-source pipeline (sampling, batching, classification, smoothing, alerting)
//! - A bounded frame queue with explicit backpressure
//! - Alert sinks
//! - Multi-source supervision with per-stream cancellation
//! - Configuration, structured logging and metrics

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod queue;
pub mod sink;
pub mod supervisor;

pub use config::{BackpressurePolicy, PipelineConfig, WorkerConfig};
pub use error::{WorkerError, WorkerResult};
pub use logging::StreamLogger;
pub use pipeline::{EndReason, Pipeline, PipelineReport};
pub use queue::FrameQueue;
pub use sink::{AlertSink, ChannelSink, LogSink};
pub use supervisor::StreamSupervisor;
