//! Tract backend for segmentation models
//!
//! Tract is a pure Rust ONNX runtime, so the service has no native
//! dependency to install next to the binary.

use crate::error::{InferenceFailure, Result, ToolError};
use crate::inference::InferenceBackend;
use crate::models::{ModelInfo, ModelManager, PreprocessingConfig};
use ndarray::Array4;
use tract_onnx::prelude::*;

// Use instant crate for cross-platform time compatibility
use instant::{Duration, Instant};

/// Type alias for the complex Tract model type to reduce complexity warnings
type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Tract backend for running background removal models
#[derive(Debug)]
pub struct TractBackend {
    model: Option<TractModel>,
    model_manager: ModelManager,
}

impl TractBackend {
    #[must_use]
    pub fn new(model_manager: ModelManager) -> Self {
        Self {
            model: None,
            model_manager,
        }
    }

    fn load_model(&mut self) -> Result<Duration> {
        let model_load_start = Instant::now();

        let model_data = self.model_manager.load_model()?;
        let model_info = self.model_manager.get_info()?;

        log::info!("🚀 Initializing Tract Backend");
        log::info!("🧠 Model: {} ({})", model_info.name, model_info.precision);
        let size_mb = model_info.size_bytes as f64 / (1024.0 * 1024.0);
        log::info!("📏 Model size: {size_mb:.2} MB");

        let model = onnx()
            .model_for_read(&mut std::io::Cursor::new(model_data))
            .map_err(|e| ToolError::model(format!("Failed to load ONNX model: {e}")))?
            .into_optimized()
            .map_err(|e| ToolError::model(format!("Failed to optimize model: {e}")))?
            .into_runnable()
            .map_err(|e| ToolError::model(format!("Failed to create runnable model: {e}")))?;

        self.model = Some(model);

        let model_load_time = model_load_start.elapsed();
        log::info!(
            "✅ Tract backend initialized in {}ms",
            model_load_time.as_millis()
        );
        Ok(model_load_time)
    }
}

impl InferenceBackend for TractBackend {
    fn initialize(&mut self) -> Result<Option<Duration>> {
        if self.model.is_some() {
            return Ok(None);
        }
        self.load_model().map(Some)
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let model = self.model.as_ref().ok_or_else(|| {
            ToolError::inference(InferenceFailure::Runtime, "Tract model not initialized")
        })?;

        log::debug!("🔮 Running Tract inference on {:?}", input.shape());
        let inference_start = Instant::now();

        let outputs = model
            .run(tvec![Tensor::from(input.clone()).into()])
            .map_err(|e| {
                ToolError::inference(InferenceFailure::Other, format!("Tract inference failed: {e}"))
            })?;

        let output_tensor = outputs
            .into_iter()
            .next()
            .ok_or_else(|| ToolError::inference(InferenceFailure::Other, "No output tensor found"))?
            .into_arc_tensor();

        let output_view = output_tensor.to_array_view::<f32>().map_err(|e| {
            ToolError::inference(
                InferenceFailure::Other,
                format!("Failed to convert output tensor: {e}"),
            )
        })?;

        let output = output_view
            .to_owned()
            .into_dimensionality::<ndarray::Ix4>()
            .map_err(|e| {
                ToolError::inference(
                    InferenceFailure::Other,
                    format!("Expected 4D output tensor: {e}"),
                )
            })?;

        log::debug!(
            "✅ Tract inference completed in {}ms, output {:?}",
            inference_start.elapsed().as_millis(),
            output.shape()
        );
        Ok(output)
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        self.model_manager.get_preprocessing_config()
    }

    fn get_model_info(&self) -> Result<ModelInfo> {
        self.model_manager.get_info()
    }

    fn is_initialized(&self) -> bool {
        self.model.is_some()
    }
}
