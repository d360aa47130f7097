//! Tract backend
//!
//! Pure Rust inference via Tract. CPU only; the model input is pinned to the
//! square size the model expects so the graph can be fully optimized.

use crate::config::RemovalConfig;
use crate::error::{BgRemovalError, Result};
use crate::inference::InferenceBackend;
use crate::models::{ModelInfo, ModelManager, PreprocessingConfig};
use instant::{Duration, Instant};
use ndarray::Array4;
use tract_onnx::prelude::*;

type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Tract backend for running segmentation models without native dependencies
#[derive(Debug)]
pub struct TractBackend {
    model: Option<TractModel>,
    model_manager: ModelManager,
    initialized: bool,
}

impl TractBackend {
    /// Tract execution providers as `(name, available, description)`
    #[must_use]
    pub fn list_providers() -> Vec<(String, bool, String)> {
        vec![(
            "CPU".to_string(),
            true,
            "Pure Rust CPU inference with no external dependencies".to_string(),
        )]
    }

    #[must_use]
    pub fn with_model_manager(model_manager: ModelManager) -> Self {
        Self {
            model: None,
            model_manager,
            initialized: false,
        }
    }

    fn load_model(&mut self, config: &RemovalConfig) -> Result<Duration> {
        let model_load_start = Instant::now();

        let model_data = self.model_manager.load_model()?;
        let model_info = self.model_manager.get_info()?;
        let [height, width] = self.model_manager.get_preprocessing_config().target_size;

        log::info!("Initializing Tract backend");
        log::info!(
            "Model: {} ({:.2} MB), input {}x{}",
            model_info.name,
            model_info.size_bytes as f64 / (1024.0 * 1024.0),
            width,
            height
        );
        if config.intra_threads > 0 || config.inter_threads > 0 {
            log::debug!("Thread settings are ignored by the Tract backend");
        }

        let model = onnx()
            .model_for_read(&mut std::io::Cursor::new(model_data))
            .map_err(|e| BgRemovalError::model(format!("Failed to load ONNX model: {e}")))?
            .with_input_fact(
                0,
                f32::fact([1, 3, height as usize, width as usize]).into(),
            )
            .map_err(|e| BgRemovalError::model(format!("Failed to set model input shape: {e}")))?
            .into_optimized()
            .map_err(|e| BgRemovalError::model(format!("Failed to optimize model: {e}")))?
            .into_runnable()
            .map_err(|e| BgRemovalError::model(format!("Failed to create runnable model: {e}")))?;

        self.model = Some(model);
        self.initialized = true;

        let model_load_time = model_load_start.elapsed();
        log::info!(
            "Tract backend initialized in {}ms",
            model_load_time.as_millis()
        );

        Ok(model_load_time)
    }
}

impl InferenceBackend for TractBackend {
    fn initialize(&mut self, config: &RemovalConfig) -> Result<Option<Duration>> {
        if self.initialized {
            return Ok(None);
        }

        let model_load_time = self.load_model(config)?;
        Ok(Some(model_load_time))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| BgRemovalError::internal("Tract model not initialized"))?;

        log::debug!("Running Tract inference on {:?}", input.shape());
        let inference_start = Instant::now();

        let input_tensor = Tensor::from(input.clone());
        let outputs = model
            .run(tvec![input_tensor.into()])
            .map_err(|e| BgRemovalError::inference(format!("Tract inference failed: {e}")))?;

        let output_tensor = outputs
            .into_iter()
            .next()
            .ok_or_else(|| BgRemovalError::inference("No output tensor found"))?
            .into_arc_tensor();

        let output_view = output_tensor.to_array_view::<f32>().map_err(|e| {
            BgRemovalError::inference(format!("Failed to convert output tensor: {e}"))
        })?;

        let output_array = output_view
            .to_owned()
            .into_dimensionality::<ndarray::Ix4>()
            .map_err(|_| {
                BgRemovalError::inference(format!(
                    "Expected 4D output tensor, got {}D",
                    output_view.ndim()
                ))
            })?;

        log::debug!(
            "Tract inference completed in {}ms, output {:?}",
            inference_start.elapsed().as_millis(),
            output_array.shape()
        );

        Ok(output_array)
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_tract_providers_cpu_only() {
        let providers = TractBackend::list_providers();
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].0, "CPU");
        assert!(providers[0].1);
    }

    #[test]
    fn test_invalid_model_fails_initialization() {
        let temp_dir = TempDir::new().unwrap();
        let model_path = temp_dir.path().join("garbage.onnx");
        fs::write(&model_path, b"definitely not protobuf").unwrap();

        let manager = ModelManager::from_file(&model_path).unwrap();
        let mut backend = TractBackend::with_model_manager(manager);

        let result = backend.initialize(&RemovalConfig::default());
        assert!(matches!(result, Err(BgRemovalError::Model(_))));
        assert!(!backend.is_initialized());
    }

    #[test]
    fn test_infer_without_model() {
        let temp_dir = TempDir::new().unwrap();
        let model_path = temp_dir.path().join("model.onnx");
        fs::write(&model_path, b"x").unwrap();

        let manager = ModelManager::from_file(&model_path).unwrap();
        let mut backend = TractBackend::with_model_manager(manager);
        let input = Array4::<f32>::zeros((1, 3, 320, 320));
        assert!(backend.infer(&input).is_err());
    }
}
