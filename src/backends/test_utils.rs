//! Mock backend for exercising the processor without model files

use crate::error::{InferenceFailure, Result, ToolError};
use crate::inference::InferenceBackend;
use crate::models::{ModelInfo, PreprocessingConfig};
use instant::Duration;
use ndarray::Array4;
use std::sync::{Arc, Mutex};

/// Mock backend producing a soft circular mask
#[derive(Debug, Clone)]
pub struct MockBackend {
    initialized: bool,
    size: usize,
    call_history: Arc<Mutex<Vec<String>>>,
    should_fail_init: bool,
    should_fail_inference: bool,
}

impl MockBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            initialized: false,
            size: 32,
            call_history: Arc::new(Mutex::new(Vec::new())),
            should_fail_init: false,
            should_fail_inference: false,
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

    pub fn get_call_history(&self) -> Vec<String> {
        self.call_history.lock().unwrap().clone()
    }

    fn record_call(&self, method: &str) {
        if let Ok(mut history) = self.call_history.lock() {
            history.push(method.to_string());
        }
    }

    /// Mask value for a canvas coordinate: 1 in the center, fading to 0
    fn mask_value(&self, x: usize, y: usize) -> f32 {
        let center = self.size as f32 / 2.0;
        let radius = self.size as f32 / 3.0;
        let distance = ((x as f32 - center).powi(2) + (y as f32 - center).powi(2)).sqrt();
        ((radius - distance) / radius).clamp(0.0, 1.0)
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceBackend for MockBackend {
    fn initialize(&mut self) -> Result<Option<Duration>> {
        self.record_call("initialize");
        if self.should_fail_init {
            return Err(ToolError::model("Mock backend initialization failed"));
        }
        if self.initialized {
            return Ok(None);
        }
        self.initialized = true;
        Ok(Some(Duration::from_millis(1)))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        self.record_call("infer");
        if !self.initialized {
            return Err(ToolError::inference(
                InferenceFailure::Runtime,
                "Mock backend not initialized",
            ));
        }
        if self.should_fail_inference {
            return Err(ToolError::inference(
                InferenceFailure::Other,
                "Mock inference failed",
            ));
        }
        if input.shape() != [1, 3, self.size, self.size] {
            return Err(ToolError::inference(
                InferenceFailure::Other,
                format!("Unexpected input shape {:?}", input.shape()),
            ));
        }

        Ok(Array4::from_shape_fn(
            (1, 1, self.size, self.size),
            |(_, _, y, x)| self.mask_value(x, y),
        ))
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        Ok(PreprocessingConfig {
            target_size: [self.size as u32, self.size as u32],
            normalization_mean: [0.5, 0.5, 0.5],
            normalization_std: [1.0, 1.0, 1.0],
        })
    }

    fn get_model_info(&self) -> Result<ModelInfo> {
        Ok(ModelInfo {
            name: "mock-model".to_string(),
            precision: "fp32".to_string(),
            size_bytes: 1024,
            input_shape: (1, 3, self.size, self.size),
            output_shape: (1, 1, self.size, self.size),
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
    fn test_mock_call_history() {
        let mut backend = MockBackend::new();
        backend.initialize().unwrap();
        backend.infer(&Array4::zeros((1, 3, 32, 32))).unwrap();
        assert_eq!(backend.get_call_history(), vec!["initialize", "infer"]);
    }

    #[test]
    fn test_mock_failures() {
        assert!(MockBackend::new_failing_init().initialize().is_err());

        let mut backend = MockBackend::new_failing_inference();
        backend.initialize().unwrap();
        assert!(backend.infer(&Array4::zeros((1, 3, 32, 32))).is_err());
    }
}
