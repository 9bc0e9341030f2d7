//! Raw frame decoders.
//!
//! A decoder yields every frame of a source, in order, as packed BGR24 bytes.
//! Sampling happens one level up in [`crate::FrameSource`].

use async_trait::async_trait;
use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

use sentinel_models::SourceId;

use crate::error::{MediaError, MediaResult};
use crate::probe::{input_args, probe_source, SourceInfo};

/// One decoded frame before sampling.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Position in the decoded sequence, starting at 0
    pub index: u64,
    /// Packed BGR24 pixels
    pub data: Vec<u8>,
}

/// Sequential frame decoder.
#[async_trait]
pub trait FrameDecoder: Send {
    /// Geometry and native rate of the source.
    fn info(&self) -> &SourceInfo;

    /// Decode the next frame. `Ok(None)` marks the end of a finite source.
    async fn next_frame(&mut self) -> MediaResult<Option<RawFrame>>;

    /// Release the underlying decoder. Idempotent.
    async fn close(&mut self) -> MediaResult<()>;
}

/// FFmpeg subprocess decoding to raw BGR24 on stdout.
///
/// The process is spawned with kill-on-drop, so abandoning the decoder
/// without calling [`FrameDecoder::close`] still terminates FFmpeg.
pub struct FfmpegDecoder {
    source: SourceId,
    info: SourceInfo,
    child: Option<Child>,
    stdout: Option<BufReader<ChildStdout>>,
    next_index: u64,
}

impl FfmpegDecoder {
    /// Probe and start decoding a source.
    ///
    /// Both steps run eagerly so an unreadable source fails here rather than
    /// on the first read.
    pub async fn open(source: &SourceId) -> MediaResult<Self> {
        let info = probe_source(source).await?;

        which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)?;

        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-hide_banner", "-nostdin", "-loglevel", "error"])
            .args(input_args(source))
            .args(["-map", "0:v:0", "-pix_fmt", "bgr24", "-f", "rawvideo", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(source = %source, "Spawning FFmpeg decoder");

        let mut child = cmd
            .spawn()
            .map_err(|e| MediaError::source_unavailable(source, format!("spawn ffmpeg: {}", e)))?;

        let stdout = child.stdout.take().ok_or_else(|| {
            MediaError::source_unavailable(source, "failed to capture FFmpeg stdout")
        })?;

        // Drain stderr so FFmpeg never blocks on a full pipe
        if let Some(stderr) = child.stderr.take() {
            let source_label = source.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(source = %source_label, "ffmpeg: {}", line);
                }
            });
        }

        info!(
            source = %source,
            width = info.width,
            height = info.height,
            native_fps = info.effective_fps(),
            "Opened video source"
        );

        let capacity = info_frame_capacity(&info);
        Ok(Self {
            source: source.clone(),
            info,
            child: Some(child),
            stdout: Some(BufReader::with_capacity(capacity, stdout)),
            next_index: 0,
        })
    }

    pub fn source(&self) -> &SourceId {
        &self.source
    }
}

/// Read buffer sized to hold a whole frame.
fn info_frame_capacity(info: &SourceInfo) -> usize {
    info.frame_len().max(8 * 1024)
}

#[async_trait]
impl FrameDecoder for FfmpegDecoder {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    async fn next_frame(&mut self) -> MediaResult<Option<RawFrame>> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(None);
        };

        let frame_len = self.info.frame_len();
        let mut data = vec![0u8; frame_len];
        let mut filled = 0;
        while filled < frame_len {
            let n = stdout.read(&mut data[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        let index = self.next_index;

        if filled == 0 {
            // End of stream; a decoder that never produced a frame failed
            let status = match self.child.as_mut() {
                Some(child) => child.wait().await.ok(),
                None => None,
            };
            self.stdout = None;
            if index == 0 {
                if let Some(status) = status.filter(|s| !s.success()) {
                    return Err(MediaError::decode_failed(format!(
                        "ffmpeg exited with {:?} before the first frame of {}",
                        status.code(),
                        self.source
                    )));
                }
            }
            debug!(source = %self.source, frames = index, "Decoder reached end of stream");
            return Ok(None);
        }

        self.next_index += 1;

        if filled < frame_len {
            // Truncated trailing frame; the stream ends after reporting it
            self.stdout = None;
            return Err(MediaError::invalid_frame(
                index,
                format!("truncated frame: {} of {} bytes", filled, frame_len),
            ));
        }

        Ok(Some(RawFrame { index, data }))
    }

    async fn close(&mut self) -> MediaResult<()> {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            // Already-exited processes make start_kill a no-op
            let _ = child.start_kill();
            let status = child.wait().await?;
            debug!(source = %self.source, status = ?status.code(), "Decoder closed");
        }
        Ok(())
    }
}

/// In-memory decoder for demos and tests.
///
/// Yields a fixed list of frames at a declared native rate, optionally
/// cycling forever to imitate a live source.
pub struct SyntheticDecoder {
    info: SourceInfo,
    frames: VecDeque<Vec<u8>>,
    repeat: bool,
    frame_delay: Option<Duration>,
    next_index: u64,
    closed: Arc<AtomicBool>,
}

impl SyntheticDecoder {
    /// Decoder over explicit frame buffers.
    pub fn new(info: SourceInfo, frames: Vec<Vec<u8>>) -> Self {
        Self {
            info,
            frames: frames.into(),
            repeat: false,
            frame_delay: None,
            next_index: 0,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// `count` uniform frames of the given geometry and rate.
    pub fn solid(width: u32, height: u32, fps: f64, count: usize, value: u8) -> Self {
        let info = SourceInfo::new(width, height, Some(fps));
        let frame = vec![value; info.frame_len()];
        Self::new(info, vec![frame; count])
    }

    /// Cycle through the frames forever.
    pub fn repeat_forever(mut self) -> Self {
        self.repeat = true;
        self
    }

    /// Sleep before each frame, like a real-time source.
    pub fn with_frame_delay(mut self, delay: Duration) -> Self {
        self.frame_delay = Some(delay);
        self
    }

    /// Flag set once the decoder has been released.
    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }
}

#[async_trait]
impl FrameDecoder for SyntheticDecoder {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    async fn next_frame(&mut self) -> MediaResult<Option<RawFrame>> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(None);
        }
        if let Some(delay) = self.frame_delay {
            tokio::time::sleep(delay).await;
        }

        let Some(data) = self.frames.pop_front() else {
            return Ok(None);
        };
        if self.repeat {
            self.frames.push_back(data.clone());
        }

        let index = self.next_index;
        self.next_index += 1;
        Ok(Some(RawFrame { index, data }))
    }

    async fn close(&mut self) -> MediaResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for SyntheticDecoder {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_synthetic_decoder_yields_in_order() {
        let mut decoder = SyntheticDecoder::solid(2, 2, 30.0, 3, 7);
        for expected in 0..3 {
            let frame = decoder.next_frame().await.unwrap().unwrap();
            assert_eq!(frame.index, expected);
            assert_eq!(frame.data.len(), 12);
        }
        assert!(decoder.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_synthetic_decoder_repeats() {
        let mut decoder = SyntheticDecoder::solid(1, 1, 30.0, 2, 0).repeat_forever();
        for expected in 0..10 {
            assert_eq!(decoder.next_frame().await.unwrap().unwrap().index, expected);
        }
    }

    #[tokio::test]
    async fn test_close_and_drop_release() {
        let mut decoder = SyntheticDecoder::solid(1, 1, 30.0, 5, 0);
        let closed = decoder.closed_flag();
        decoder.close().await.unwrap();
        assert!(closed.load(Ordering::SeqCst));
        assert!(decoder.next_frame().await.unwrap().is_none());

        let dropped = SyntheticDecoder::solid(1, 1, 30.0, 5, 0);
        let flag = dropped.closed_flag();
        drop(dropped);
        assert!(flag.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_ffmpeg_open_missing_file_is_unavailable() {
        let result = FfmpegDecoder::open(&SourceId::file("/nonexistent/video.mp4")).await;
        assert!(matches!(result, Err(MediaError::SourceUnavailable { .. })));
    }
}
