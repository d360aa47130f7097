//! Mock backend for exercising the pipeline without model files

use crate::{
    config::RemovalConfig,
    error::{BgRemovalError, Result},
    inference::InferenceBackend,
    models::{ModelInfo, PreprocessingConfig},
};
use instant::Duration;
use ndarray::Array4;
use std::sync::{Arc, Mutex};

/// Mock backend producing a centred disc as the foreground saliency map
#[derive(Debug, Clone)]
pub struct MockBackend {
    initialized: bool,
    input_size: u32,
    /// Call history shared across clones for verification in tests
    call_history: Arc<Mutex<Vec<String>>>,
    should_fail_init: bool,
    should_fail_inference: bool,
    /// Emit a constant map instead of the disc
    constant_output: Option<f32>,
}

impl MockBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            initialized: false,
            input_size: 64,
            call_history: Arc::new(Mutex::new(Vec::new())),
            should_fail_init: false,
            should_fail_inference: false,
            constant_output: None,
        }
    }

    #[must_use]
    pub fn new_failing_init() -> Self {
        Self {
            should_fail_init: true,
            ..Self::new()
        }
    }

    #[must_use]
    pub fn new_failing_inference() -> Self {
        Self {
            should_fail_inference: true,
            ..Self::new()
        }
    }

    /// Backend whose every output value is `value`
    #[must_use]
    pub fn new_constant(value: f32) -> Self {
        Self {
            constant_output: Some(value),
            ..Self::new()
        }
    }

    #[must_use]
    pub fn with_input_size(mut self, input_size: u32) -> Self {
        self.input_size = input_size;
        self
    }

    pub fn get_call_history(&self) -> Vec<String> {
        self.call_history.lock().unwrap().clone()
    }

    /// Handle on the call history that survives moving the backend into a processor
    #[must_use]
    pub fn call_history_handle(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.call_history)
    }

    fn record_call(&self, method: &str) {
        if let Ok(mut history) = self.call_history.lock() {
            history.push(method.to_string());
        }
    }

    fn generate_mock_output(&self, height: usize, width: usize) -> Array4<f32> {
        if let Some(value) = self.constant_output {
            return Array4::from_elem((1, 1, height, width), value);
        }

        let center_x = width as f32 / 2.0;
        let center_y = height as f32 / 2.0;
        let radius = width.min(height) as f32 / 3.0;
        let edge = (radius / 4.0).max(1.0);

        Array4::from_shape_fn((1, 1, height, width), |(_, _, y, x)| {
            let dx = x as f32 + 0.5 - center_x;
            let dy = y as f32 + 0.5 - center_y;
            let distance = (dx * dx + dy * dy).sqrt();
            ((radius + edge - distance) / (2.0 * edge)).clamp(0.0, 1.0)
        })
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceBackend for MockBackend {
    fn initialize(&mut self, _config: &RemovalConfig) -> Result<Option<Duration>> {
        self.record_call("initialize");

        if self.should_fail_init {
            return Err(BgRemovalError::model("Mock backend initialization failed"));
        }

        if self.initialized {
            return Ok(None);
        }
        self.initialized = true;
        Ok(Some(Duration::from_millis(5)))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        self.record_call("infer");

        if !self.initialized {
            return Err(BgRemovalError::internal("Mock backend not initialized"));
        }

        if self.should_fail_inference {
            return Err(BgRemovalError::inference("Mock backend inference failed"));
        }

        let (_, channels, height, width) = input.dim();
        if channels != 3 {
            return Err(BgRemovalError::inference(format!(
                "Expected 3 input channels, got {channels}"
            )));
        }

        Ok(self.generate_mock_output(height, width))
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        self.record_call("get_preprocessing_config");
        Ok(PreprocessingConfig::u2net(self.input_size))
    }

    fn get_model_info(&self) -> Result<ModelInfo> {
        self.record_call("get_model_info");
        let size = self.input_size as usize;
        Ok(ModelInfo {
            name: "mock".to_string(),
            size_bytes: 1024,
            input_shape: (1, 3, size, size),
            output_shape: (1, 1, size, size),
        })
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_lifecycle() {
        let mut backend = MockBackend::new();
        let input = Array4::<f32>::zeros((1, 3, 64, 64));

        assert!(backend.infer(&input).is_err());
        assert!(backend
            .initialize(&RemovalConfig::default())
            .unwrap()
            .is_some());
        assert!(backend
            .initialize(&RemovalConfig::default())
            .unwrap()
            .is_none());

        let output = backend.infer(&input).unwrap();
        assert_eq!(output.dim(), (1, 1, 64, 64));
        assert!(output[[0, 0, 32, 32]] > 0.99);
        assert!(output[[0, 0, 0, 0]] < 0.01);

        assert_eq!(
            backend.get_call_history(),
            vec!["infer", "initialize", "initialize", "infer"]
        );
    }

    #[test]
    fn test_failing_variants() {
        let mut backend = MockBackend::new_failing_init();
        assert!(backend.initialize(&RemovalConfig::default()).is_err());

        let mut backend = MockBackend::new_failing_inference();
        backend.initialize(&RemovalConfig::default()).unwrap();
        let input = Array4::<f32>::zeros((1, 3, 8, 8));
        assert!(matches!(
            backend.infer(&input),
            Err(BgRemovalError::Inference(_))
        ));
    }
}
