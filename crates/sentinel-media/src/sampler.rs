//! Fixed-rate frame sampling from variable-rate sources.

use crate::error::{MediaError, MediaResult};
use crate::probe::FALLBACK_FPS;

/// Decides which decoded frames to forward.
///
/// Forwards every `round(native / target)`-th frame, starting with frame 0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSampler {
    native_fps: f64,
    target_fps: f64,
    interval: u64,
}

impl FrameSampler {
    /// Create a sampler.
    ///
    /// `target_fps` must be finite and positive. An unknown or non-positive
    /// `native_fps` falls back to 30.
    pub fn new(native_fps: Option<f64>, target_fps: f64) -> MediaResult<Self> {
        Self::validate_target(target_fps)?;

        let native_fps = native_fps
            .filter(|fps| fps.is_finite() && *fps > 0.0)
            .unwrap_or(FALLBACK_FPS);
        let interval = ((native_fps / target_fps).round() as u64).max(1);

        Ok(Self {
            native_fps,
            target_fps,
            interval,
        })
    }

    /// Reject a target rate before any source is touched.
    pub fn validate_target(target_fps: f64) -> MediaResult<()> {
        if !target_fps.is_finite() || target_fps <= 0.0 {
            return Err(MediaError::invalid_configuration(format!(
                "target_fps must be > 0, got {}",
                target_fps
            )));
        }
        Ok(())
    }

    /// Whether the decoded frame at `index` is forwarded.
    pub fn keeps(&self, index: u64) -> bool {
        index % self.interval == 0
    }

    /// Decoded frames per forwarded frame.
    pub fn interval(&self) -> u64 {
        self.interval
    }

    /// Native rate used for sampling and timestamps.
    pub fn native_fps(&self) -> f64 {
        self.native_fps
    }

    pub fn target_fps(&self) -> f64 {
        self.target_fps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_rounding() {
        assert_eq!(FrameSampler::new(Some(30.0), 2.0).unwrap().interval(), 15);
        assert_eq!(FrameSampler::new(Some(29.97), 2.0).unwrap().interval(), 15);
        assert_eq!(FrameSampler::new(Some(25.0), 2.0).unwrap().interval(), 13);
        assert_eq!(FrameSampler::new(Some(24.0), 10.0).unwrap().interval(), 2);
    }

    #[test]
    fn test_target_above_native_forwards_every_frame() {
        let sampler = FrameSampler::new(Some(10.0), 60.0).unwrap();
        assert_eq!(sampler.interval(), 1);
        assert!((0..5).all(|i| sampler.keeps(i)));
    }

    #[test]
    fn test_unknown_native_rate_uses_fallback() {
        for native in [None, Some(0.0), Some(-1.0), Some(f64::NAN)] {
            let sampler = FrameSampler::new(native, 2.0).unwrap();
            assert_eq!(sampler.native_fps(), FALLBACK_FPS);
            assert_eq!(sampler.interval(), 15);
        }
    }

    #[test]
    fn test_keeps_multiples_of_interval() {
        let sampler = FrameSampler::new(Some(30.0), 2.0).unwrap();
        let kept: Vec<u64> = (0..61).filter(|i| sampler.keeps(*i)).collect();
        assert_eq!(kept, vec![0, 15, 30, 45, 60]);
    }

    #[test]
    fn test_rejects_non_positive_target() {
        for target in [0.0, -2.0, f64::INFINITY, f64::NAN] {
            assert!(matches!(
                FrameSampler::new(Some(30.0), target),
                Err(MediaError::InvalidConfiguration(_))
            ));
        }
    }
}
