//! Tensor conversion around model inference
//!
//! Models take a square RGB input stretched to their native size (aspect ratio
//! is not preserved) and return a saliency map at that size, which is scaled
//! back to the source image dimensions.

use crate::{
    error::{BgRemovalError, Result},
    models::PreprocessingConfig,
    types::SegmentationMask,
};
use image::{imageops::FilterType, DynamicImage, GrayImage, Luma};
use ndarray::Array4;

/// Image to tensor and tensor to mask conversion
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Build the normalized NCHW input tensor for `image`
    ///
    /// Pixels are divided by the brightest channel value of the resized image
    /// (not 255), then normalized with the model's mean and std.
    ///
    /// # Errors
    /// - Zero-sized target or image
    pub fn preprocess_image(
        image: &DynamicImage,
        preprocessing_config: &PreprocessingConfig,
    ) -> Result<Array4<f32>> {
        let [height, width] = preprocessing_config.target_size;
        if height == 0 || width == 0 {
            return Err(BgRemovalError::processing("Model input size must be non-zero"));
        }
        if image.width() == 0 || image.height() == 0 {
            return Err(BgRemovalError::invalid_image("Image has zero width or height"));
        }

        let resized = image::imageops::resize(&image.to_rgb8(), width, height, FilterType::Lanczos3);

        let max_value = resized
            .as_raw()
            .iter()
            .copied()
            .max()
            .map_or(1.0, |max| f32::from(max.max(1)));

        let mean = preprocessing_config.normalization_mean;
        let std = preprocessing_config.normalization_std;
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

        for (x, y, pixel) in resized.enumerate_pixels() {
            for (channel, value) in pixel.0.iter().enumerate() {
                let (Some(m), Some(s)) = (mean.get(channel), std.get(channel)) else {
                    continue;
                };
                if let Some(slot) = tensor.get_mut([0, channel, y as usize, x as usize]) {
                    *slot = (f32::from(*value) / max_value - m) / s;
                }
            }
        }

        Ok(tensor)
    }

    /// Turn model output into a mask at the original image size
    ///
    /// Channel 0 is min-max normalized to [0, 1]; a constant map becomes
    /// all-background.
    ///
    /// # Errors
    /// - Output tensor has no spatial extent
    pub fn tensor_to_mask(
        output: &Array4<f32>,
        original_dimensions: (u32, u32),
    ) -> Result<SegmentationMask> {
        let (_, channels, height, width) = output.dim();
        if channels == 0 || height == 0 || width == 0 {
            return Err(BgRemovalError::processing(format!(
                "Model output has unexpected shape {:?}",
                output.shape()
            )));
        }

        let prediction = output.slice(ndarray::s![0, 0, .., ..]);
        let (min, max) = prediction
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        let range = max - min;

        let gray = GrayImage::from_fn(width as u32, height as u32, |x, y| {
            let value = prediction
                .get((y as usize, x as usize))
                .copied()
                .unwrap_or(min);
            let normalized = if range > f32::EPSILON {
                (value - min) / range
            } else {
                0.0
            };
            Luma([(normalized * 255.0).round().clamp(0.0, 255.0) as u8])
        });

        let (orig_width, orig_height) = original_dimensions;
        let resized = if (orig_width, orig_height) == (width as u32, height as u32) {
            gray
        } else {
            image::imageops::resize(&gray, orig_width, orig_height, FilterType::Lanczos3)
        };

        Ok(SegmentationMask::from_gray(&resized))
    }
}
