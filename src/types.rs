//! Result types shared by the processor, services and CLI

use crate::{
    config::PngCompression,
    error::{BgRemovalError, Result},
    services::ImageIOService,
};
use image::{imageops::FilterType, GrayImage, RgbaImage};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Grayscale foreground mask, one byte per pixel in row-major order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentationMask {
    pub data: Vec<u8>,
    /// (width, height)
    pub dimensions: (u32, u32),
}

impl SegmentationMask {
    #[must_use]
    pub fn new(data: Vec<u8>, dimensions: (u32, u32)) -> Self {
        Self { data, dimensions }
    }

    #[must_use]
    pub fn from_gray(image: &GrayImage) -> Self {
        Self {
            data: image.as_raw().clone(),
            dimensions: image.dimensions(),
        }
    }

    /// # Errors
    /// - Data length does not match the dimensions
    pub fn to_gray_image(&self) -> Result<GrayImage> {
        let (width, height) = self.dimensions;
        GrayImage::from_raw(width, height, self.data.clone()).ok_or_else(|| {
            BgRemovalError::internal(format!(
                "Mask data length {} does not match {}x{}",
                self.data.len(),
                width,
                height
            ))
        })
    }

    /// Resize the mask with Lanczos3 filtering
    ///
    /// # Errors
    /// - Mask data is inconsistent with its dimensions
    pub fn resize(&self, width: u32, height: u32) -> Result<Self> {
        if self.dimensions == (width, height) {
            return Ok(self.clone());
        }
        let resized = image::imageops::resize(&self.to_gray_image()?, width, height, FilterType::Lanczos3);
        Ok(Self::from_gray(&resized))
    }

    /// Fraction of pixels at or above half intensity
    #[must_use]
    pub fn foreground_ratio(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let foreground = self.data.iter().filter(|&&value| value >= 128).count();
        foreground as f32 / self.data.len() as f32
    }
}

/// Per-stage timings of one processed image, in milliseconds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingTimings {
    /// Model load time, only set for the image that triggered initialization
    pub model_load_ms: Option<u64>,
    pub image_decode_ms: u64,
    pub preprocessing_ms: u64,
    pub inference_ms: u64,
    /// Mask conversion, mask post-processing and matting
    pub postprocessing_ms: u64,
    pub image_encode_ms: Option<u64>,
    pub total_ms: u64,
}

impl ProcessingTimings {
    /// One-line summary for debug logging
    #[must_use]
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "decode {}ms, preprocess {}ms, inference {}ms, postprocess {}ms",
            self.image_decode_ms, self.preprocessing_ms, self.inference_ms, self.postprocessing_ms
        );
        if let Some(encode) = self.image_encode_ms {
            summary.push_str(&format!(", encode {encode}ms"));
        }
        if let Some(load) = self.model_load_ms {
            summary.push_str(&format!(", model load {load}ms"));
        }
        summary.push_str(&format!(", total {}ms", self.total_ms));
        summary
    }
}

/// Cutout produced for a single image
#[derive(Debug, Clone)]
pub struct RemovalResult {
    /// RGBA cutout, transparent where the background was
    pub image: RgbaImage,
    /// Mask at the original image size
    pub mask: SegmentationMask,
    /// (width, height) of the source image
    pub original_dimensions: (u32, u32),
    pub timings: ProcessingTimings,
}

impl RemovalResult {
    #[must_use]
    pub fn new(
        image: RgbaImage,
        mask: SegmentationMask,
        original_dimensions: (u32, u32),
        timings: ProcessingTimings,
    ) -> Self {
        Self {
            image,
            mask,
            original_dimensions,
            timings,
        }
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Shrink the cutout so its longest side is at most `max_dimension`
    ///
    /// Images already within the limit are returned unchanged; the mask keeps
    /// the original resolution.
    #[must_use]
    pub fn downsample(mut self, max_dimension: u32) -> Self {
        let (width, height) = self.image.dimensions();
        let longest = width.max(height);
        if max_dimension == 0 || longest <= max_dimension {
            return self;
        }

        let scale = f64::from(max_dimension) / f64::from(longest);
        let new_width = ((f64::from(width) * scale).round() as u32).max(1);
        let new_height = ((f64::from(height) * scale).round() as u32).max(1);

        log::debug!("Downsampling {width}x{height} to {new_width}x{new_height}");
        self.image =
            image::imageops::resize(&self.image, new_width, new_height, FilterType::Lanczos3);
        self
    }

    /// Encode the cutout as an RGBA PNG
    ///
    /// # Errors
    /// - PNG encoding failures
    pub fn to_png_bytes(&self, compression: PngCompression) -> Result<Vec<u8>> {
        ImageIOService::encode_png(&self.image, compression)
    }

    /// Write the cutout as an RGBA PNG, creating parent directories
    ///
    /// # Errors
    /// - File system or encoding failures
    pub fn save_png<P: AsRef<Path>>(&self, path: P, compression: PngCompression) -> Result<()> {
        ImageIOService::save_png(&self.image, path, compression)
    }
}
