#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # bgstrip
//!
//! Background removal for still images using the U2-Net family of salient
//! object segmentation models, run through ONNX Runtime or Tract.
//!
//! The pipeline stretches the image to the model's input size, runs the
//! model, scales the saliency map back to the original size and uses it as
//! the alpha channel. Edges can be refined with alpha matting, the mask can
//! be smoothed, and results are written as compressed RGBA PNGs.
//!
//! ## Features
//!
//! - **Models**: `u2net`, `u2netp`, `u2net_human_seg`, `silueta`,
//!   `isnet-general-use`, or any compatible `.onnx` file
//! - **Backends**: ONNX Runtime (CPU, CUDA, `CoreML`) and Tract (pure Rust)
//! - **Inputs**: JPEG, PNG, BMP, TIFF, WebP
//! - **Model cache**: built-in models are downloaded once and reused
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bgstrip::{remove_background_from_bytes, ModelKind, ModelSpec, PngCompression, RemovalConfig};
//!
//! # async fn example(upload: Vec<u8>) -> anyhow::Result<()> {
//! let config = RemovalConfig::builder()
//!     .model_spec(ModelSpec::builtin(ModelKind::U2netp))
//!     .build()?;
//! let result = remove_background_from_bytes(&upload, &config).await?;
//! let png = result.to_png_bytes(PngCompression::Best)?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `onnx` (default): ONNX Runtime backend
//! - `tract` (default): pure Rust backend
//! - `cli` (default): command-line interface, directory discovery and tracing setup
//! - `webp-support` (default): WebP decoding
//! - `tracing-json`, `tracing-files`: extra log outputs for the CLI

pub mod backends;
pub mod cache;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod inference;
pub mod matting;
pub mod models;
pub mod processor;
pub mod services;
pub mod tracing_config;
pub mod types;
pub mod utils;

use tokio::io::AsyncRead;

#[cfg(feature = "onnx")]
pub use backends::OnnxBackend;
#[cfg(feature = "tract")]
pub use backends::TractBackend;
pub use cache::{format_size, CachedModelInfo, ModelCache, CACHE_DIR_ENV};
pub use config::{ExecutionProvider, MattingConfig, PngCompression, RemovalConfig, RemovalConfigBuilder};
pub use download::{verify_model_file, DownloadedModel, FileDigests, ModelDownloader};
pub use error::{BgRemovalError, Result};
pub use inference::InferenceBackend;
pub use models::{ModelInfo, ModelKind, ModelManager, ModelSource, ModelSpec, PreprocessingConfig};
pub use processor::{BackendFactory, BackendType, BackgroundRemovalProcessor, DefaultBackendFactory};
pub use services::{
    BatchStats, ConsoleProgressReporter, ImageIOService, NoOpProgressReporter, ProcessingStage,
    ProgressReporter, ProgressUpdate,
};
pub use tracing_config::{TracingConfig, TracingFormat, TracingGuard, TracingOutput};
pub use types::{ProcessingTimings, RemovalResult, SegmentationMask};
pub use utils::{ExecutionProviderManager, ImagePreprocessor, ProviderInfo};

/// Make sure the model named by `spec` is on disk, downloading built-in
/// models into the default cache when missing
///
/// # Errors
/// - Cache directory cannot be determined or created
/// - Download or checksum failures
pub async fn ensure_model_available(spec: &ModelSpec) -> Result<()> {
    if let ModelSource::Builtin(kind) = &spec.source {
        let cache = ModelCache::new()?;
        if !cache.is_model_cached(*kind) {
            ModelDownloader::new(cache)?.ensure_model(*kind, false).await?;
        }
    }
    Ok(())
}

/// Remove the background from an encoded image held in memory
///
/// Downloads the configured built-in model on first use.
///
/// ```rust,no_run
/// use bgstrip::{remove_background_from_bytes, RemovalConfig};
///
/// # async fn example(image_data: Vec<u8>) -> anyhow::Result<()> {
/// let config = RemovalConfig::builder().alpha_matting(false).build()?;
/// let result = remove_background_from_bytes(&image_data, &config).await?;
/// result.save_png("cutout.png", config.png_compression)?;
/// # Ok(())
/// # }
/// ```
pub async fn remove_background_from_bytes(
    image_bytes: &[u8],
    config: &RemovalConfig,
) -> Result<RemovalResult> {
    let image = ImageIOService::load_from_bytes(image_bytes)?;
    remove_background_from_image(image, config).await
}

/// Remove the background from a decoded image
///
/// Downloads the configured built-in model on first use.
pub async fn remove_background_from_image(
    image: image::DynamicImage,
    config: &RemovalConfig,
) -> Result<RemovalResult> {
    ensure_model_available(&config.model_spec).await?;
    let mut processor = BackgroundRemovalProcessor::new(config.clone())?;
    processor.process_image(&image)
}

/// Remove the background from an image read to the end of `reader`
pub async fn remove_background_from_reader<R: AsyncRead + Unpin>(
    mut reader: R,
    config: &RemovalConfig,
) -> Result<RemovalResult> {
    let mut buffer = Vec::new();
    tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut buffer)
        .await
        .map_err(|e| BgRemovalError::processing(format!("Failed to read from stream: {}", e)))?;

    remove_background_from_bytes(&buffer, config).await
}
