//! Frame preprocessing into model input tensors.
//!
//! Frames arrive as BGR; models expect RGB resized to a square input,
//! normalized per channel, in NCHW layout.

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;

use sentinel_models::{ChannelOrder, Frame};

use crate::error::{MlError, MlResult};

/// ImageNet channel means (RGB).
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet channel standard deviations (RGB).
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];
/// Default square input size (ViT-B/16).
pub const DEFAULT_INPUT_SIZE: u32 = 224;

/// Resizes and normalizes frames for a model.
#[derive(Debug, Clone, PartialEq)]
pub struct Preprocessor {
    input_size: u32,
    mean: [f32; 3],
    std: [f32; 3],
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new(DEFAULT_INPUT_SIZE)
    }
}

impl Preprocessor {
    /// ImageNet normalization at the given square input size.
    pub fn new(input_size: u32) -> Self {
        Self {
            input_size,
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
        }
    }

    /// Override channel normalization.
    pub fn with_normalization(mut self, mean: [f32; 3], std: [f32; 3]) -> Self {
        self.mean = mean;
        self.std = std;
        self
    }

    pub fn input_size(&self) -> u32 {
        self.input_size
    }

    /// Reject frames the model must never see.
    pub fn validate(frame: &Frame) -> MlResult<()> {
        if frame.data().is_empty() {
            return Err(MlError::invalid_frame(frame.index(), "empty pixel buffer"));
        }
        if frame.is_degenerate() {
            return Err(MlError::invalid_frame(
                frame.index(),
                format!(
                    "buffer of {} bytes does not match {}x{}x3",
                    frame.data().len(),
                    frame.width(),
                    frame.height()
                ),
            ));
        }
        Ok(())
    }

    /// Build a `[N, 3, S, S]` tensor from a batch of frames.
    ///
    /// Every frame is validated before any pixel work starts.
    pub fn batch_tensor(&self, frames: &[Frame]) -> MlResult<Array4<f32>> {
        for frame in frames {
            Self::validate(frame)?;
        }

        let size = self.input_size as usize;
        let mut tensor = Array4::<f32>::zeros((frames.len(), 3, size, size));

        for (n, frame) in frames.iter().enumerate() {
            let resized = self.resize_rgb(frame)?;
            for (x, y, pixel) in resized.enumerate_pixels() {
                for c in 0..3 {
                    let v = pixel[c] as f32 / 255.0;
                    tensor[[n, c, y as usize, x as usize]] = (v - self.mean[c]) / self.std[c];
                }
            }
        }

        Ok(tensor)
    }

    /// Convert to RGB and resize to the model's square input.
    fn resize_rgb(&self, frame: &Frame) -> MlResult<RgbImage> {
        let rgb = to_rgb_bytes(frame);
        let img = RgbImage::from_raw(frame.width(), frame.height(), rgb).ok_or_else(|| {
            MlError::invalid_frame(frame.index(), "failed to create image buffer")
        })?;

        if img.width() == self.input_size && img.height() == self.input_size {
            return Ok(img);
        }
        Ok(imageops::resize(
            &img,
            self.input_size,
            self.input_size,
            FilterType::Triangle,
        ))
    }
}

/// Packed RGB bytes for a frame in either channel order.
fn to_rgb_bytes(frame: &Frame) -> Vec<u8> {
    match frame.order() {
        ChannelOrder::Rgb => frame.data().to_vec(),
        ChannelOrder::Bgr => frame
            .data()
            .chunks_exact(3)
            .flat_map(|px| [px[2], px[1], px[0]])
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn bgr_frame(width: u32, height: u32, bgr: [u8; 3]) -> Frame {
        let data: Vec<u8> = (0..width * height).flat_map(|_| bgr).collect();
        Frame::new(0, Duration::ZERO, width, height, data)
    }

    #[test]
    fn test_tensor_shape() {
        let pre = Preprocessor::new(8);
        let frames = vec![bgr_frame(16, 12, [0, 0, 0]), bgr_frame(4, 4, [0, 0, 0])];
        let tensor = pre.batch_tensor(&frames).unwrap();
        assert_eq!(tensor.shape(), &[2, 3, 8, 8]);
    }

    #[test]
    fn test_bgr_to_rgb_channel_placement() {
        // Pure red in BGR order is [0, 0, 255]
        let pre = Preprocessor::new(2).with_normalization([0.0; 3], [1.0; 3]);
        let tensor = pre.batch_tensor(&[bgr_frame(2, 2, [0, 0, 255])]).unwrap();
        assert!((tensor[[0, 0, 0, 0]] - 1.0).abs() < 1e-6);
        assert!(tensor[[0, 1, 0, 0]].abs() < 1e-6);
        assert!(tensor[[0, 2, 0, 0]].abs() < 1e-6);
    }

    #[test]
    fn test_imagenet_normalization() {
        let pre = Preprocessor::new(1);
        let tensor = pre.batch_tensor(&[bgr_frame(1, 1, [255, 255, 255])]).unwrap();
        for c in 0..3 {
            let expected = (1.0 - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
            assert!((tensor[[0, c, 0, 0]] - expected).abs() < 1e-5);
        }
    }

    #[test]
    fn test_degenerate_frames_rejected() {
        let pre = Preprocessor::default();
        let empty = Frame::new(4, Duration::ZERO, 10, 10, Vec::<u8>::new());
        let err = pre.batch_tensor(&[bgr_frame(2, 2, [1, 2, 3]), empty]).unwrap_err();
        assert!(matches!(err, MlError::InvalidFrame { index: 4, .. }));
    }

    #[test]
    fn test_empty_batch() {
        let tensor = Preprocessor::new(4).batch_tensor(&[]).unwrap();
        assert_eq!(tensor.shape(), &[0, 3, 4, 4]);
    }
}
