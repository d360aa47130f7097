//! Background removal processor
//!
//! `BackgroundRemovalProcessor` owns the inference backend and runs the full
//! pipeline for one image at a time: preprocess, infer, build the mask,
//! optionally smooth it, cut out the foreground (with alpha matting when
//! enabled) and optionally downsample the result.

use crate::{
    cache::ModelCache,
    config::RemovalConfig,
    error::{BgRemovalError, Result},
    inference::InferenceBackend,
    matting,
    models::ModelManager,
    services::{ImageIOService, NoOpProgressReporter, ProcessingStage, ProgressReporter, ProgressUpdate},
    types::{ProcessingTimings, RemovalResult, SegmentationMask},
    utils::ImagePreprocessor,
};
use image::{DynamicImage, RgbaImage};
use instant::{Duration, Instant};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{instrument, span, Level};

/// Backend type enumeration for runtime selection
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// ONNX Runtime backend (supports GPU acceleration)
    #[default]
    Onnx,
    /// Tract backend (pure Rust, no external dependencies)
    Tract,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Onnx => write!(f, "onnx"),
            Self::Tract => write!(f, "tract"),
        }
    }
}

/// Factory trait for creating inference backends
pub trait BackendFactory: Send + Sync {
    /// Create a backend instance of the specified type with the given model manager
    ///
    /// # Errors
    /// - Backend type not compiled in
    /// - Backend construction failures
    fn create_backend(
        &self,
        backend_type: BackendType,
        model_manager: ModelManager,
    ) -> Result<Box<dyn InferenceBackend>>;

    /// List available backend types
    fn available_backends(&self) -> Vec<BackendType>;
}

/// Creates the backends enabled by cargo features
pub struct DefaultBackendFactory;

impl BackendFactory for DefaultBackendFactory {
    fn create_backend(
        &self,
        backend_type: BackendType,
        model_manager: ModelManager,
    ) -> Result<Box<dyn InferenceBackend>> {
        match backend_type {
            #[cfg(feature = "onnx")]
            BackendType::Onnx => Ok(Box::new(crate::backends::OnnxBackend::with_model_manager(
                model_manager,
            ))),
            #[cfg(feature = "tract")]
            BackendType::Tract => Ok(Box::new(crate::backends::TractBackend::with_model_manager(
                model_manager,
            ))),
            #[allow(unreachable_patterns)]
            other => {
                drop(model_manager);
                Err(BgRemovalError::invalid_config(format!(
                    "Backend '{other}' is not available in this build"
                )))
            },
        }
    }

    fn available_backends(&self) -> Vec<BackendType> {
        let mut backends = Vec::new();
        #[cfg(feature = "onnx")]
        backends.push(BackendType::Onnx);
        #[cfg(feature = "tract")]
        backends.push(BackendType::Tract);
        backends
    }
}

/// Runs background removal with one model and backend
pub struct BackgroundRemovalProcessor {
    config: RemovalConfig,
    backend_factory: Box<dyn BackendFactory>,
    backend: Option<Box<dyn InferenceBackend>>,
    cache_dir: Option<PathBuf>,
    progress_reporter: Box<dyn ProgressReporter>,
    /// Model load time not yet attributed to a result
    pending_model_load: Option<Duration>,
    initialized: bool,
}

impl BackgroundRemovalProcessor {
    /// Create a processor using the backends enabled at compile time
    ///
    /// # Errors
    /// - Invalid configuration
    pub fn new(config: RemovalConfig) -> Result<Self> {
        Self::with_factory(config, Box::new(DefaultBackendFactory))
    }

    /// Create a processor with a custom backend factory
    ///
    /// # Errors
    /// - Invalid configuration
    pub fn with_factory(config: RemovalConfig, backend_factory: Box<dyn BackendFactory>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            backend_factory,
            backend: None,
            cache_dir: None,
            progress_reporter: Box::new(NoOpProgressReporter),
            pending_model_load: None,
            initialized: false,
        })
    }

    /// Look built-in models up in `cache_dir` instead of the default cache
    #[must_use]
    pub fn with_cache_dir<P: Into<PathBuf>>(mut self, cache_dir: P) -> Self {
        self.cache_dir = Some(cache_dir.into());
        self
    }

    #[must_use]
    pub fn with_progress_reporter(mut self, reporter: Box<dyn ProgressReporter>) -> Self {
        self.progress_reporter = reporter;
        self
    }

    /// Resolve the model and load it into the backend
    ///
    /// Called lazily by the processing methods; calling it again is a no-op.
    ///
    /// # Errors
    /// - Model not cached or file missing
    /// - Backend creation or model load failures
    pub fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

        let start = Instant::now();
        self.report(ProcessingStage::Initialization, start);

        info!(
            "Initializing {} backend with model {}",
            self.config.backend_type,
            self.config.model_spec.source.display_name()
        );
        debug!("Execution provider: {}", self.config.execution_provider);

        let cache = ModelCache::from_override(self.cache_dir.as_deref())?;
        let model_manager = ModelManager::from_spec(&self.config.model_spec, &cache)?;
        debug!("Model file: {}", model_manager.model_path().display());

        let mut backend = self
            .backend_factory
            .create_backend(self.config.backend_type, model_manager)?;
        let model_load_time = backend.initialize(&self.config).map_err(|e| {
            self.progress_reporter
                .report_error(ProcessingStage::Initialization, &e.to_string());
            e
        })?;

        if let Some(load_time) = model_load_time {
            info!("Model loaded in {}ms", load_time.as_millis());
        }

        self.pending_model_load = model_load_time;
        self.backend = Some(backend);
        self.initialized = true;
        Ok(())
    }

    /// Validate, decode and process an image file
    ///
    /// # Errors
    /// - File too small, unreadable or not decodable
    /// - Model or inference failures
    #[instrument(skip(self, input_path), fields(input = %input_path.as_ref().display()))]
    pub async fn process_file<P: AsRef<Path>>(&mut self, input_path: P) -> Result<RemovalResult> {
        let input_path = input_path.as_ref();
        let start = Instant::now();
        self.report(ProcessingStage::ImageLoading, start);

        let image = {
            let _span = span!(Level::DEBUG, "image_decode").entered();
            ImageIOService::validate_image(input_path)?;
            ImageIOService::load_image(input_path)?
        };
        let decode_ms = start.elapsed().as_millis() as u64;

        let mut result = self.run_pipeline(&image, start)?;
        result.timings.image_decode_ms = decode_ms;
        Ok(result)
    }

    /// Process a file and write the cutout as a PNG to `output_path`
    ///
    /// # Errors
    /// - Any [`Self::process_file`] error
    /// - Output directory creation, encoding or write failures
    pub async fn process_file_to<P: AsRef<Path>, Q: AsRef<Path>>(
        &mut self,
        input_path: P,
        output_path: Q,
    ) -> Result<RemovalResult> {
        let start = Instant::now();
        let mut result = self.process_file(input_path).await?;

        self.report(ProcessingStage::FileSaving, start);
        let encode_start = Instant::now();
        {
            let _span = span!(Level::DEBUG, "image_encode").entered();
            result.save_png(output_path.as_ref(), self.config.png_compression)?;
        }
        let encode_ms = encode_start.elapsed().as_millis() as u64;
        result.timings.image_encode_ms = Some(encode_ms);
        result.timings.total_ms += encode_ms;

        self.progress_reporter.report_completion(&result.timings);
        debug!("{}: {}", output_path.as_ref().display(), result.timings.summary());
        Ok(result)
    }

    /// Decode and process an encoded image held in memory
    ///
    /// # Errors
    /// - Data cannot be decoded as an image
    /// - Model or inference failures
    pub fn process_bytes(&mut self, image_bytes: &[u8]) -> Result<RemovalResult> {
        let start = Instant::now();
        self.report(ProcessingStage::ImageLoading, start);

        let image = ImageIOService::load_from_bytes(image_bytes)?;
        let decode_ms = start.elapsed().as_millis() as u64;

        let mut result = self.run_pipeline(&image, start)?;
        result.timings.image_decode_ms = decode_ms;
        Ok(result)
    }

    /// Process an already decoded image
    ///
    /// # Errors
    /// - Model or inference failures
    pub fn process_image(&mut self, image: &DynamicImage) -> Result<RemovalResult> {
        self.run_pipeline(image, Instant::now())
    }

    /// Run the model and return the mask at the image's size, without cutting out
    ///
    /// # Errors
    /// - Model or inference failures
    pub fn segment(&mut self, image: &DynamicImage) -> Result<SegmentationMask> {
        let mut timings = ProcessingTimings::default();
        self.segment_with_timings(image, &mut timings, Instant::now())
    }

    #[must_use]
    pub fn config(&self) -> &RemovalConfig {
        &self.config
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    #[must_use]
    pub fn available_backends(&self) -> Vec<BackendType> {
        self.backend_factory.available_backends()
    }

    #[instrument(
        skip(self, image, start),
        fields(
            backend = %self.config.backend_type,
            model = %self.config.model_spec.source.display_name(),
            dimensions = %format!("{}x{}", image.width(), image.height())
        )
    )]
    fn run_pipeline(&mut self, image: &DynamicImage, start: Instant) -> Result<RemovalResult> {
        if image.width() == 0 || image.height() == 0 {
            return Err(BgRemovalError::invalid_image("Image has zero width or height"));
        }

        self.initialize()?;

        let mut timings = ProcessingTimings {
            model_load_ms: self
                .pending_model_load
                .take()
                .map(|load| load.as_millis() as u64),
            ..ProcessingTimings::default()
        };
        let original_dimensions = (image.width(), image.height());

        let mask = self.segment_with_timings(image, &mut timings, start)?;

        let postprocess_start = Instant::now();
        self.report(ProcessingStage::BackgroundRemoval, start);
        let cutout = {
            let _span = span!(
                Level::DEBUG,
                "background_removal",
                matting = self.config.matting.enabled,
                post_process = self.config.post_process_mask
            )
            .entered();
            self.cut_out(image, &mask)?
        };
        timings.postprocessing_ms += postprocess_start.elapsed().as_millis() as u64;

        let mut result = RemovalResult::new(cutout, mask, original_dimensions, timings);
        if let Some(max_dimension) = self.config.max_dimension {
            result = result.downsample(max_dimension);
        }

        result.timings.total_ms = start.elapsed().as_millis() as u64;
        self.report(ProcessingStage::Completed, start);
        Ok(result)
    }

    fn segment_with_timings(
        &mut self,
        image: &DynamicImage,
        timings: &mut ProcessingTimings,
        start: Instant,
    ) -> Result<SegmentationMask> {
        self.initialize()?;

        let original_dimensions = (image.width(), image.height());
        let backend = self
            .backend
            .as_mut()
            .ok_or_else(|| BgRemovalError::internal("Backend not initialized"))?;

        self.progress_reporter
            .report_progress(ProgressUpdate::new(ProcessingStage::Preprocessing, start));
        let preprocess_start = Instant::now();
        let input_tensor = {
            let _span = span!(
                Level::DEBUG,
                "preprocessing",
                width = original_dimensions.0,
                height = original_dimensions.1
            )
            .entered();
            let preprocessing_config = backend.get_preprocessing_config()?;
            ImagePreprocessor::preprocess_image(image, &preprocessing_config)?
        };
        timings.preprocessing_ms = preprocess_start.elapsed().as_millis() as u64;

        self.progress_reporter
            .report_progress(ProgressUpdate::new(ProcessingStage::Inference, start));
        let inference_start = Instant::now();
        let output_tensor = {
            let _span = span!(Level::INFO, "inference").entered();
            backend.infer(&input_tensor).map_err(|e| {
                self.progress_reporter
                    .report_error(ProcessingStage::Inference, &e.to_string());
                e
            })?
        };
        timings.inference_ms = inference_start.elapsed().as_millis() as u64;

        self.progress_reporter
            .report_progress(ProgressUpdate::new(ProcessingStage::MaskGeneration, start));
        let mask_start = Instant::now();
        let mut mask = ImagePreprocessor::tensor_to_mask(&output_tensor, original_dimensions)?;
        if self.config.post_process_mask {
            mask = matting::post_process_mask(&mask)?;
        }
        timings.postprocessing_ms = mask_start.elapsed().as_millis() as u64;

        Ok(mask)
    }

    fn cut_out(&self, image: &DynamicImage, mask: &SegmentationMask) -> Result<RgbaImage> {
        if !self.config.matting.enabled {
            return matting::naive_cutout(image, mask);
        }

        match matting::alpha_matting_cutout(image, mask, &self.config.matting) {
            Ok(cutout) => Ok(cutout),
            Err(e) => {
                warn!("Alpha matting failed, using plain mask cutout: {e}");
                matting::naive_cutout(image, mask)
            },
        }
    }

    fn report(&self, stage: ProcessingStage, start: Instant) {
        self.progress_reporter
            .report_progress(ProgressUpdate::new(stage, start));
    }
}
