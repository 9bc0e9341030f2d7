//! Bounded-rate frame sequences over a decoder.

use futures::Stream;
use std::time::Duration;
use tracing::{debug, warn};

use sentinel_models::{Frame, SourceId};

use crate::decoder::{FfmpegDecoder, FrameDecoder, RawFrame};
use crate::error::{MediaError, MediaResult};
use crate::probe::SourceInfo;
use crate::sampler::FrameSampler;

/// Lazy, sampled sequence of frames from one source.
///
/// Lifecycle is open -> `next_frame`* -> close. The sequence cannot be
/// rewound; reopen the source to start over. The decoder is released when
/// the sequence ends, fails, or is dropped.
pub struct FrameSource<D: FrameDecoder = FfmpegDecoder> {
    source: SourceId,
    decoder: D,
    sampler: FrameSampler,
    decoded: u64,
    forwarded: u64,
    finished: bool,
}

impl FrameSource<FfmpegDecoder> {
    /// Open a source with FFmpeg and sample it at `target_fps`.
    ///
    /// The target rate is validated before anything is probed or spawned.
    pub async fn open(source: SourceId, target_fps: f64) -> MediaResult<Self> {
        FrameSampler::validate_target(target_fps)?;
        let decoder = FfmpegDecoder::open(&source).await?;
        Self::with_decoder(source, decoder, target_fps)
    }
}

impl<D: FrameDecoder> FrameSource<D> {
    /// Sample frames from an already-open decoder.
    pub fn with_decoder(source: SourceId, decoder: D, target_fps: f64) -> MediaResult<Self> {
        let sampler = FrameSampler::new(decoder.info().fps, target_fps)?;

        debug!(
            source = %source,
            native_fps = sampler.native_fps(),
            target_fps,
            interval = sampler.interval(),
            "Frame sampling configured"
        );

        Ok(Self {
            source,
            decoder,
            sampler,
            decoded: 0,
            forwarded: 0,
            finished: false,
        })
    }

    pub fn source(&self) -> &SourceId {
        &self.source
    }

    pub fn info(&self) -> &SourceInfo {
        self.decoder.info()
    }

    pub fn sampler(&self) -> &FrameSampler {
        &self.sampler
    }

    /// Decoded frames seen so far, including discarded ones.
    pub fn decoded(&self) -> u64 {
        self.decoded
    }

    /// Frames forwarded so far.
    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }

    /// Next sampled frame.
    ///
    /// Returns `Ok(None)` once a finite source is exhausted. An
    /// [`MediaError::InvalidFrame`] error affects only that frame and the
    /// caller may keep reading; any other error ends the sequence.
    pub async fn next_frame(&mut self) -> MediaResult<Option<Frame>> {
        if self.finished {
            return Ok(None);
        }

        loop {
            match self.decoder.next_frame().await {
                Ok(Some(raw)) => {
                    self.decoded += 1;
                    if !self.sampler.keeps(raw.index) {
                        continue;
                    }
                    self.forwarded += 1;
                    return self.to_frame(raw).map(Some);
                }
                Ok(None) => {
                    self.finish().await;
                    return Ok(None);
                }
                Err(MediaError::InvalidFrame { index, .. }) if !self.sampler.keeps(index) => {
                    // Corrupt frame that sampling would have discarded anyway
                    self.decoded += 1;
                    continue;
                }
                Err(e) if e.is_frame_local() => {
                    self.decoded += 1;
                    return Err(e);
                }
                Err(e) => {
                    warn!(source = %self.source, error = %e, "Frame source failed");
                    self.finish().await;
                    return Err(e);
                }
            }
        }
    }

    /// Release the decoder early.
    pub async fn close(mut self) -> MediaResult<()> {
        self.finished = true;
        self.decoder.close().await
    }

    /// Convert into a `Stream` of frames.
    ///
    /// Frame-local errors are yielded in place and the stream continues;
    /// a fatal error is yielded once and then the stream ends.
    pub fn into_stream(self) -> impl Stream<Item = MediaResult<Frame>> + Send
    where
        D: 'static,
    {
        futures::stream::unfold(Some(self), |state| async move {
            let mut source = state?;
            match source.next_frame().await {
                Ok(Some(frame)) => Some((Ok(frame), Some(source))),
                Ok(None) => None,
                Err(e) if e.is_frame_local() => Some((Err(e), Some(source))),
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    async fn finish(&mut self) {
        self.finished = true;
        if let Err(e) = self.decoder.close().await {
            warn!(source = %self.source, error = %e, "Failed to close decoder");
        }
        debug!(
            source = %self.source,
            decoded = self.decoded,
            forwarded = self.forwarded,
            "Frame source finished"
        );
    }

    fn to_frame(&self, raw: RawFrame) -> MediaResult<Frame> {
        let info = self.decoder.info();
        if raw.data.len() != info.frame_len() {
            return Err(MediaError::invalid_frame(
                raw.index,
                format!(
                    "expected {} bytes for {}x{}, got {}",
                    info.frame_len(),
                    info.width,
                    info.height,
                    raw.data.len()
                ),
            ));
        }

        let timestamp = Duration::from_secs_f64(raw.index as f64 / self.sampler.native_fps());
        Ok(Frame::new(raw.index, timestamp, info.width, info.height, raw.data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::SyntheticDecoder;
    use futures::StreamExt;
    use std::sync::atomic::Ordering;

    fn source(decoder: SyntheticDecoder, target_fps: f64) -> FrameSource<SyntheticDecoder> {
        FrameSource::with_decoder(SourceId::file("synthetic.mp4"), decoder, target_fps).unwrap()
    }

    #[tokio::test]
    async fn test_samples_multiples_of_interval() {
        let mut frames = source(SyntheticDecoder::solid(4, 4, 30.0, 100, 0), 2.0);

        let mut indices = Vec::new();
        while let Some(frame) = frames.next_frame().await.unwrap() {
            indices.push(frame.index());
        }

        assert_eq!(indices, vec![0, 15, 30, 45, 60, 75, 90]);
        assert_eq!(frames.decoded(), 100);
        assert_eq!(frames.forwarded(), 7);
    }

    #[tokio::test]
    async fn test_timestamps_follow_native_rate() {
        let mut frames = source(SyntheticDecoder::solid(1, 1, 30.0, 31, 0), 2.0);
        let _ = frames.next_frame().await.unwrap().unwrap();
        let second = frames.next_frame().await.unwrap().unwrap();
        assert_eq!(second.index(), 15);
        assert!((second.timestamp().as_secs_f64() - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_unknown_native_rate_assumes_thirty() {
        let info = SourceInfo::new(1, 1, None);
        let decoder = SyntheticDecoder::new(info, vec![vec![0u8; 3]; 31]);
        let mut frames = source(decoder, 2.0);

        let mut indices = Vec::new();
        while let Some(frame) = frames.next_frame().await.unwrap() {
            indices.push(frame.index());
        }
        assert_eq!(indices, vec![0, 15, 30]);
    }

    #[tokio::test]
    async fn test_invalid_target_rejected_before_decoding() {
        let decoder = SyntheticDecoder::solid(1, 1, 30.0, 5, 0);
        let result = FrameSource::with_decoder(SourceId::device(0), decoder, 0.0);
        assert!(matches!(result, Err(MediaError::InvalidConfiguration(_))));

        // Opening an FFmpeg source never gets as far as probing
        let result = FrameSource::open(SourceId::file("/nonexistent.mp4"), -1.0).await;
        assert!(matches!(result, Err(MediaError::InvalidConfiguration(_))));
    }

    #[tokio::test]
    async fn test_wrong_sized_frame_is_frame_local() {
        let info = SourceInfo::new(2, 2, Some(1.0));
        let decoder = SyntheticDecoder::new(info, vec![vec![0u8; 12], vec![0u8; 5], vec![0u8; 12]]);
        let mut frames = source(decoder, 1.0);

        assert_eq!(frames.next_frame().await.unwrap().unwrap().index(), 0);
        let err = frames.next_frame().await.unwrap_err();
        assert!(matches!(err, MediaError::InvalidFrame { index: 1, .. }));
        assert_eq!(frames.next_frame().await.unwrap().unwrap().index(), 2);
        assert!(frames.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_decoder_released_on_end_and_close() {
        let decoder = SyntheticDecoder::solid(1, 1, 30.0, 3, 0);
        let closed = decoder.closed_flag();
        let mut frames = source(decoder, 30.0);
        while frames.next_frame().await.unwrap().is_some() {}
        assert!(closed.load(Ordering::SeqCst));

        let decoder = SyntheticDecoder::solid(1, 1, 30.0, 3, 0).repeat_forever();
        let closed = decoder.closed_flag();
        let mut frames = source(decoder, 30.0);
        frames.next_frame().await.unwrap();
        frames.close().await.unwrap();
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_into_stream_collects_sampled_frames() {
        let frames = source(SyntheticDecoder::solid(2, 2, 10.0, 20, 0), 5.0);
        let indices: Vec<u64> = frames
            .into_stream()
            .map(|f| f.unwrap().index())
            .collect()
            .await;
        assert_eq!(indices, vec![0, 2, 4, 6, 8, 10, 12, 14, 16, 18]);
    }
}
