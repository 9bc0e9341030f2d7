//! Decoded video frames.

use std::sync::Arc;
use std::time::Duration;

/// Channel order of a frame's interleaved pixel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelOrder {
    /// Blue, green, red (FFmpeg `bgr24`, OpenCV default)
    #[default]
    Bgr,
    /// Red, green, blue
    Rgb,
}

/// Number of color channels in every frame.
pub const CHANNELS: usize = 3;

/// An immutable decoded frame.
///
/// Pixel data is reference counted so a frame can be handed between the
/// decode task and the classifier without copying.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Index of the frame in the decoded source (not the sampled ordinal)
    index: u64,
    /// Source-relative presentation time
    timestamp: Duration,
    /// Width in pixels
    width: u32,
    /// Height in pixels
    height: u32,
    /// Channel order of `data`
    order: ChannelOrder,
    /// Interleaved pixel data, `width * height * 3` bytes
    data: Arc<[u8]>,
}

impl Frame {
    /// Create a BGR frame.
    pub fn new(
        index: u64,
        timestamp: Duration,
        width: u32,
        height: u32,
        data: impl Into<Arc<[u8]>>,
    ) -> Self {
        Self {
            index,
            timestamp,
            width,
            height,
            order: ChannelOrder::Bgr,
            data: data.into(),
        }
    }

    /// Set the channel order of the pixel buffer.
    pub fn with_order(mut self, order: ChannelOrder) -> Self {
        self.order = order;
        self
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn order(&self) -> ChannelOrder {
        self.order
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Expected buffer length for the frame's dimensions.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * CHANNELS
    }

    /// Check whether the frame cannot be classified.
    ///
    /// A frame is degenerate when it has no pixels or its buffer does not
    /// match its declared dimensions.
    pub fn is_degenerate(&self) -> bool {
        self.data.is_empty()
            || self.width == 0
            || self.height == 0
            || self.data.len() != self.expected_len()
    }

    /// Pixel at `(x, y)` as `[r, g, b]`, regardless of storage order.
    ///
    /// Returns `None` for out-of-range coordinates or a degenerate frame.
    pub fn rgb_at(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height || self.is_degenerate() {
            return None;
        }
        let base = (y as usize * self.width as usize + x as usize) * CHANNELS;
        let px = &self.data[base..base + CHANNELS];
        Some(match self.order {
            ChannelOrder::Bgr => [px[2], px[1], px[0]],
            ChannelOrder::Rgb => [px[0], px[1], px[2]],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_degenerate_detection() {
        let ok = Frame::new(0, Duration::ZERO, 2, 2, vec![0u8; 12]);
        assert!(!ok.is_degenerate());

        let empty = Frame::new(0, Duration::ZERO, 2, 2, Vec::<u8>::new());
        assert!(empty.is_degenerate());

        let short = Frame::new(0, Duration::ZERO, 2, 2, vec![0u8; 11]);
        assert!(short.is_degenerate());

        let zero_width = Frame::new(0, Duration::ZERO, 0, 2, Vec::<u8>::new());
        assert!(zero_width.is_degenerate());
    }

    #[test]
    fn test_rgb_at_swaps_bgr() {
        let frame = Frame::new(0, Duration::ZERO, 1, 1, vec![10u8, 20, 30]);
        assert_eq!(frame.rgb_at(0, 0), Some([30, 20, 10]));
        assert_eq!(frame.rgb_at(1, 0), None);

        let rgb = frame.clone().with_order(ChannelOrder::Rgb);
        assert_eq!(rgb.rgb_at(0, 0), Some([10, 20, 30]));
    }

    #[test]
    fn test_clone_shares_pixels() {
        let frame = Frame::new(7, Duration::from_millis(500), 1, 1, vec![1u8, 2, 3]);
        let copy = frame.clone();
        assert_eq!(copy.index(), 7);
        assert!(std::ptr::eq(frame.data().as_ptr(), copy.data().as_ptr()));
    }
}
