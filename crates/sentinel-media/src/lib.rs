//! FFmpeg CLI frame sources for the detection pipeline.
//!
//! This crate provides:
//! - Source probing via FFprobe (geometry, native frame rate)
//! - Raw BGR frame decoding from files, RTSP streams and capture devices
//! - Fixed-rate sampling from variable-rate sources
//! - Scoped decoder lifetimes (the FFmpeg process dies with its source)

pub mod decoder;
pub mod error;
pub mod frame_source;
pub mod probe;
pub mod sampler;

pub use decoder::{FfmpegDecoder, FrameDecoder, RawFrame, SyntheticDecoder};
pub use error::{MediaError, MediaResult};
pub use frame_source::FrameSource;
pub use probe::{probe_source, SourceInfo, FALLBACK_FPS};
pub use sampler::FrameSampler;
