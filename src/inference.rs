//! Inference backend abstraction

use crate::error::Result;
use crate::models::{ModelInfo, PreprocessingConfig};
use ndarray::Array4;

// Use instant crate for cross-platform time compatibility
use instant::Duration;

/// Trait for segmentation inference backends
///
/// Backends are synchronous; async callers run them on a blocking thread.
pub trait InferenceBackend: Send {
    /// Load the model; returns the load time on first initialization
    ///
    /// # Errors
    /// - Model file missing or unreadable
    /// - Graph parsing or optimization failures
    fn initialize(&mut self) -> Result<Option<Duration>>;

    /// Run inference on an NCHW input tensor, returning a `[1, 1, H, W]` mask tensor
    ///
    /// # Errors
    /// - Backend not initialized
    /// - Model inference failures
    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>>;

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig>;

    fn get_model_info(&self) -> Result<ModelInfo>;

    fn is_initialized(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::test_utils::MockBackend;

    #[test]
    fn test_backend_as_trait_object() {
        let mut backend: Box<dyn InferenceBackend> = Box::new(MockBackend::new());
        assert!(!backend.is_initialized());
        assert!(backend.initialize().unwrap().is_some());
        assert!(backend.is_initialized());
        assert!(backend.initialize().unwrap().is_none());

        let config = backend.get_preprocessing_config().unwrap();
        let size = config.target_size[0] as usize;
        let output = backend.infer(&Array4::zeros((1, 3, size, size))).unwrap();
        assert_eq!(output.shape(), &[1, 1, size, size]);
    }
}
