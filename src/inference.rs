//! Inference backend abstraction

use crate::{
    config::RemovalConfig,
    error::Result,
    models::{ModelInfo, PreprocessingConfig},
};
use ndarray::Array4;

// Use instant crate for cross-platform time compatibility
use instant::Duration;

/// Trait for segmentation inference backends
///
/// Backends take a normalized NCHW tensor of shape `[1, 3, H, W]` and return
/// the model's saliency output `[1, C, H, W]`; only channel 0 is used.
pub trait InferenceBackend {
    /// Initialize the backend with the given configuration
    ///
    /// Returns the model load time when the backend actually loaded a model,
    /// `None` when it was already initialized.
    ///
    /// # Errors
    /// - Model resolution or loading failures
    /// - Backend session creation errors
    fn initialize(&mut self, config: &RemovalConfig) -> Result<Option<Duration>>;

    /// Run inference on the input tensor
    ///
    /// # Errors
    /// - Backend not initialized
    /// - Model inference failures
    /// - Tensor conversion errors
    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>>;

    /// Preprocessing parameters of the loaded model
    ///
    /// # Errors
    /// - Backend not initialized
    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig>;

    /// Metadata of the loaded model
    ///
    /// # Errors
    /// - Backend not initialized
    /// - Model metadata unavailable
    fn get_model_info(&self) -> Result<ModelInfo>;

    fn is_initialized(&self) -> bool;
}
