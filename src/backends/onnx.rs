//! ONNX Runtime backend
//!
//! Runs U2-Net family models through ONNX Runtime with CPU, CUDA or `CoreML`
//! execution providers. Unavailable accelerators fall back to CPU.

use crate::config::{ExecutionProvider, RemovalConfig};
use crate::error::{BgRemovalError, Result};
use crate::inference::InferenceBackend;
use crate::models::{ModelInfo, ModelManager, PreprocessingConfig};
use instant::{Duration, Instant};
use ndarray::Array4;
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
    ExecutionProviderDispatch,
};
use ort::session::{
    builder::{GraphOptimizationLevel, SessionBuilder},
    Session,
};
use ort::value::Value;

/// ONNX Runtime backend for segmentation models
#[derive(Debug)]
pub struct OnnxBackend {
    session: Option<Session>,
    model_manager: ModelManager,
    initialized: bool,
}

impl OnnxBackend {
    /// List ONNX Runtime execution providers as `(name, available, description)`
    #[must_use]
    pub fn list_providers() -> Vec<(String, bool, String)> {
        log::debug!(
            "Platform: {} {}, {} CPU cores",
            std::env::consts::OS,
            std::env::consts::ARCH,
            available_cores()
        );

        vec![
            (
                "CPU".to_string(),
                true,
                "Always available, uses CPU for inference".to_string(),
            ),
            (
                "CUDA".to_string(),
                cuda_available(),
                "NVIDIA GPU acceleration (requires CUDA toolkit and compatible GPU)".to_string(),
            ),
            (
                "CoreML".to_string(),
                coreml_available(),
                "Apple Silicon acceleration (macOS only)".to_string(),
            ),
        ]
    }

    #[must_use]
    pub fn with_model_manager(model_manager: ModelManager) -> Self {
        Self {
            session: None,
            model_manager,
            initialized: false,
        }
    }

    fn load_model(&mut self, config: &RemovalConfig) -> Result<Duration> {
        let model_load_start = Instant::now();
        let model_data = self.model_manager.load_model()?;

        let session_builder = Session::builder()
            .map_err(|e| BgRemovalError::inference(format!("Failed to create session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| {
                BgRemovalError::inference(format!("Failed to set optimization level: {e}"))
            })?;

        let session_builder = configure_providers(session_builder, config.execution_provider)?;

        let intra_threads = if config.intra_threads > 0 {
            config.intra_threads
        } else {
            available_cores()
        };
        let inter_threads = if config.inter_threads > 0 {
            config.inter_threads
        } else {
            (available_cores() / 4).max(1)
        };

        let session = session_builder
            .with_intra_threads(intra_threads)
            .map_err(|e| BgRemovalError::inference(format!("Failed to set intra threads: {e}")))?
            .with_inter_threads(inter_threads)
            .map_err(|e| BgRemovalError::inference(format!("Failed to set inter threads: {e}")))?
            .commit_from_memory(&model_data)
            .map_err(|e| {
                BgRemovalError::model(format!(
                    "Failed to create ONNX session from {}: {e}",
                    self.model_manager.model_path().display()
                ))
            })?;

        let model_info = self.model_manager.get_info()?;
        log::debug!("ONNX Runtime session created");
        log::debug!("  - Requested provider: {}", config.execution_provider);
        log::debug!("  - Threading: {intra_threads} intra-op, {inter_threads} inter-op");
        log::debug!(
            "  - Model: {} ({:.2} MB)",
            model_info.name,
            model_info.size_bytes as f64 / (1024.0 * 1024.0)
        );

        self.session = Some(session);
        self.initialized = true;

        let model_load_time = model_load_start.elapsed();
        log::info!(
            "Model loading complete: {:.0}ms",
            model_load_time.as_secs_f64() * 1000.0
        );

        Ok(model_load_time)
    }
}

fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZero::get)
        .unwrap_or(4)
}

fn cuda_available() -> bool {
    OrtExecutionProvider::is_available(&CUDAExecutionProvider::default()).unwrap_or(false)
}

fn coreml_available() -> bool {
    OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default()).unwrap_or(false)
}

/// Register the requested execution providers, skipping unavailable ones
fn configure_providers(
    session_builder: SessionBuilder,
    provider: ExecutionProvider,
) -> Result<SessionBuilder> {
    let mut providers: Vec<ExecutionProviderDispatch> = Vec::new();

    match provider {
        ExecutionProvider::Auto => {
            if cuda_available() {
                log::info!("CUDA execution provider is available and will be used");
                providers.push(CUDAExecutionProvider::default().build());
            }
            if coreml_available() {
                log::info!("CoreML execution provider is available and will be used");
                providers.push(CoreMLExecutionProvider::default().with_subgraphs(true).build());
            }
            if providers.is_empty() {
                log::info!("No hardware acceleration available, using CPU");
            }
        },
        ExecutionProvider::Cpu => {
            log::info!("Using CPU execution provider");
        },
        ExecutionProvider::Cuda => {
            if cuda_available() {
                log::info!("Using CUDA execution provider");
                providers.push(CUDAExecutionProvider::default().build());
            } else {
                log::warn!("CUDA execution provider requested but not available, falling back to CPU");
            }
        },
        ExecutionProvider::CoreMl => {
            if coreml_available() {
                log::info!("Using CoreML execution provider");
                providers.push(CoreMLExecutionProvider::default().with_subgraphs(true).build());
            } else {
                log::warn!(
                    "CoreML execution provider requested but not available, falling back to CPU"
                );
            }
        },
    }

    if providers.is_empty() {
        return Ok(session_builder);
    }

    session_builder
        .with_execution_providers(providers)
        .map_err(|e| BgRemovalError::inference(format!("Failed to set execution providers: {e}")))
}

impl InferenceBackend for OnnxBackend {
    fn initialize(&mut self, config: &RemovalConfig) -> Result<Option<Duration>> {
        if self.initialized {
            return Ok(None);
        }

        let model_load_time = self.load_model(config)?;
        Ok(Some(model_load_time))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        if !self.initialized {
            return Err(BgRemovalError::internal("Backend not initialized"));
        }

        let session = self
            .session
            .as_mut()
            .ok_or_else(|| BgRemovalError::internal("ONNX session not initialized"))?;

        let inference_start = Instant::now();
        log::debug!("Starting inference with input shape: {:?}", input.dim());

        let input_value = Value::from_array(input.clone()).map_err(|e| {
            BgRemovalError::inference(format!("Failed to convert input tensor: {e}"))
        })?;

        // Positional input and output; the released models name their tensors differently
        let outputs = session
            .run(ort::inputs![input_value])
            .map_err(|e| BgRemovalError::inference(format!("ONNX inference failed: {e}")))?;

        let keys: Vec<_> = outputs.keys().collect();
        let first_key = keys
            .first()
            .ok_or_else(|| BgRemovalError::inference("No output tensors found"))?;
        let output_tensor = outputs
            .get(first_key)
            .ok_or_else(|| BgRemovalError::inference("First output tensor not found"))?
            .try_extract_array::<f32>()
            .map_err(|e| {
                BgRemovalError::inference(format!("Failed to extract output tensor: {e}"))
            })?;

        let output_shape = output_tensor.shape().to_vec();
        let [batch, channels, height, width] = output_shape[..] else {
            return Err(BgRemovalError::inference(format!(
                "Expected 4D output tensor, got {}D",
                output_shape.len()
            )));
        };

        let data: Vec<f32> = output_tensor.iter().copied().collect();
        let result = Array4::from_shape_vec((batch, channels, height, width), data).map_err(|e| {
            BgRemovalError::inference(format!("Failed to reshape output tensor: {e}"))
        })?;

        log::debug!(
            "Inference complete: {:.2}ms",
            inference_start.elapsed().as_secs_f64() * 1000.0
        );

        Ok(result)
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        Ok(self.model_manager.get_preprocessing_config())
    }

    fn get_model_info(&self) -> Result<ModelInfo> {
        self.model_manager.get_info()
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}
