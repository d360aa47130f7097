//! Image file input/output
//!
//! Keeps format checks, decoding and PNG encoding out of the processor so
//! they can be tested without a model.

use crate::{
    config::PngCompression,
    error::{BgRemovalError, Result},
};
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageFormat, ImageReader, RgbaImage};
use std::path::Path;

/// Files smaller than this are rejected before decoding
pub const MIN_IMAGE_FILE_SIZE: u64 = 100;

/// Lowercase extensions accepted as input
pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "tif", "webp"];

/// Service for image file input/output operations
pub struct ImageIOService;

impl ImageIOService {
    /// Check whether `path` has a supported image extension (case-insensitive)
    pub fn is_supported_format<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                let ext = ext.to_lowercase();
                SUPPORTED_EXTENSIONS.contains(&ext.as_str())
            })
    }

    /// Detect the image format from the file signature
    #[must_use]
    pub fn detect_format(bytes: &[u8]) -> Option<ImageFormat> {
        match bytes {
            [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, ..] => Some(ImageFormat::Png),
            [0xFF, 0xD8, 0xFF, ..] => Some(ImageFormat::Jpeg),
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => {
                Some(ImageFormat::WebP)
            },
            [b'I', b'I', 0x2A, 0x00, ..] | [b'M', b'M', 0x00, 0x2A, ..] => Some(ImageFormat::Tiff),
            [b'B', b'M', ..] => Some(ImageFormat::Bmp),
            _ => None,
        }
    }

    /// Check that `path` is a plausible, decodable image and return its
    /// dimensions without decoding the pixels
    ///
    /// # Errors
    /// - File cannot be read
    /// - File is smaller than [`MIN_IMAGE_FILE_SIZE`]
    /// - Header cannot be decoded
    pub fn validate_image<P: AsRef<Path>>(path: P) -> Result<(u32, u32)> {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path)
            .map_err(|e| BgRemovalError::file_io_error("read image metadata", path, &e))?;

        if metadata.len() < MIN_IMAGE_FILE_SIZE {
            return Err(BgRemovalError::invalid_image(format!(
                "{} is too small to be an image ({} bytes)",
                path.display(),
                metadata.len()
            )));
        }

        ImageReader::open(path)
            .map_err(|e| BgRemovalError::file_io_error("open image", path, &e))?
            .with_guessed_format()
            .map_err(|e| BgRemovalError::file_io_error("read image header", path, &e))?
            .into_dimensions()
            .map_err(|e| {
                BgRemovalError::invalid_image(format!("{} cannot be decoded: {e}", path.display()))
            })
    }

    /// Load an image, falling back to content sniffing when the extension
    /// does not match the data
    ///
    /// # Errors
    /// - File cannot be read
    /// - Data cannot be decoded as an image
    pub fn load_image<P: AsRef<Path>>(path: P) -> Result<DynamicImage> {
        let path = path.as_ref();

        match image::open(path) {
            Ok(image) => Ok(image),
            Err(image::ImageError::IoError(e)) => {
                Err(BgRemovalError::file_io_error("read image file", path, &e))
            },
            Err(e) => {
                log::debug!(
                    "Extension-based loading failed for {}: {}. Attempting content-based detection.",
                    path.display(),
                    e
                );
                let data = std::fs::read(path)
                    .map_err(|io_err| BgRemovalError::file_io_error("read image data", path, &io_err))?;
                image::load_from_memory(&data).map_err(|content_err| {
                    BgRemovalError::invalid_image(format!(
                        "{} cannot be decoded: {content_err}",
                        path.display()
                    ))
                })
            },
        }
    }

    /// Decode an image from memory
    ///
    /// # Errors
    /// - Data cannot be decoded as an image
    pub fn load_from_bytes(bytes: &[u8]) -> Result<DynamicImage> {
        if bytes.is_empty() {
            return Err(BgRemovalError::invalid_image("Empty image data"));
        }
        image::load_from_memory(bytes)
            .map_err(|e| BgRemovalError::invalid_image(format!("Failed to decode image: {e}")))
    }

    /// Encode an RGBA image as PNG with adaptive filtering
    ///
    /// # Errors
    /// - PNG encoder failures
    pub fn encode_png(image: &RgbaImage, compression: PngCompression) -> Result<Vec<u8>> {
        let compression_type = match compression {
            PngCompression::Fast => CompressionType::Fast,
            PngCompression::Default => CompressionType::Default,
            PngCompression::Best => CompressionType::Best,
        };

        let mut buffer = Vec::new();
        PngEncoder::new_with_quality(&mut buffer, compression_type, FilterType::Adaptive)
            .write_image(
                image.as_raw(),
                image.width(),
                image.height(),
                ExtendedColorType::Rgba8,
            )?;
        Ok(buffer)
    }

    /// Encode and write an RGBA PNG, creating parent directories
    ///
    /// # Errors
    /// - Directory creation or file write failures
    /// - PNG encoder failures
    pub fn save_png<P: AsRef<Path>>(
        image: &RgbaImage,
        path: P,
        compression: PngCompression,
    ) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| BgRemovalError::file_io_error("create output directory", parent, &e))?;
        }

        let bytes = Self::encode_png(image, compression)?;
        std::fs::write(path, &bytes)
            .map_err(|e| BgRemovalError::file_io_error("write output image", path, &e))?;

        log::debug!("Saved {} ({} bytes)", path.display(), bytes.len());
        Ok(())
    }
}
