//! Background removal engines
//!
//! An engine turns an input image into an image with a transparent
//! background. The local engine runs the segmentation model with Tract; the
//! remove.bg engine delegates to the hosted API.

use crate::config::OutputFormat;
use crate::error::{InferenceFailure, Result, ToolError};
use crate::services::ProgressCallback;
use crate::types::ImageBlob;
use async_trait::async_trait;

/// Model labels accepted in `EngineOptions::model`
pub const KNOWN_MODELS: &[&str] = &["isnet", "isnet_fp16", "isnet_quint8"];

/// Options passed to an engine call
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOptions {
    /// Model label, `isnet` by default
    pub model: String,
    pub output_format: OutputFormat,
    /// Encoder quality between 0 and 1
    pub quality: f32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            model: "isnet".to_string(),
            output_format: OutputFormat::Png,
            quality: 0.8,
        }
    }
}

impl EngineOptions {
    #[must_use]
    pub fn model<S: Into<String>>(mut self, model: S) -> Self {
        self.model = model.into();
        self
    }

    #[must_use]
    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    #[must_use]
    pub fn quality(mut self, quality: f32) -> Self {
        self.quality = quality;
        self
    }

    /// Reject option sets the engines cannot honour
    ///
    /// Failures are reported as configuration incompatibilities so callers can
    /// retry without options.
    pub fn check(&self) -> Result<()> {
        if !KNOWN_MODELS.contains(&self.model.as_str()) {
            return Err(ToolError::inference(
                InferenceFailure::ConfigIncompatible,
                format!("Unknown model '{}'. Known models: {KNOWN_MODELS:?}", self.model),
            ));
        }
        if !(0.0..=1.0).contains(&self.quality) {
            return Err(ToolError::inference(
                InferenceFailure::ConfigIncompatible,
                format!("Output quality {} is outside 0-1", self.quality),
            ));
        }
        Ok(())
    }

    /// Encoder quality as a 1-100 percentage
    #[must_use]
    pub fn quality_percent(&self) -> u8 {
        (self.quality.clamp(0.01, 1.0) * 100.0).round() as u8
    }
}

/// A background removal engine
#[async_trait]
pub trait RemovalEngine: Send + Sync {
    /// Short engine name for logs and status output
    fn name(&self) -> &'static str;

    /// Remove the background of `input`
    ///
    /// `options = None` runs the engine with its built-in defaults.
    async fn remove_background(
        &self,
        input: &ImageBlob,
        options: Option<&EngineOptions>,
        progress: Option<ProgressCallback>,
    ) -> Result<ImageBlob>;

    /// Load everything the first real call needs
    async fn preload(&self) -> Result<()>;
}

#[cfg(feature = "tract")]
pub use local::LocalEngine;

#[cfg(feature = "tract")]
mod local {
    use super::{EngineOptions, RemovalEngine};
    use crate::backends::TractBackend;
    use crate::config::OutputFormat;
    use crate::error::{InferenceFailure, Result, ToolError};
    use crate::models::ModelManager;
    use crate::processor::BackgroundRemovalProcessor;
    use crate::runtime::RuntimeLoader;
    use crate::services::{EncodeOptions, OutputFormatHandler, ProgressCallback};
    use crate::types::ImageBlob;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use tokio::sync::OnceCell;

    /// Progress key reported while the model runs
    const INFERENCE_PROGRESS_KEY: &str = "compute:inference";

    /// Local segmentation engine backed by Tract
    ///
    /// The model is loaded once per engine and shared by every call.
    pub struct LocalEngine {
        runtime: Arc<RuntimeLoader>,
        variant: Option<String>,
        processor: OnceCell<Arc<Mutex<BackgroundRemovalProcessor>>>,
    }

    impl std::fmt::Debug for LocalEngine {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("LocalEngine")
                .field("variant", &self.variant)
                .field("loaded", &self.processor.initialized())
                .finish()
        }
    }

    impl LocalEngine {
        #[must_use]
        pub fn new(runtime: Arc<RuntimeLoader>, variant: Option<String>) -> Self {
            Self {
                runtime,
                variant,
                processor: OnceCell::new(),
            }
        }

        #[must_use]
        pub fn is_loaded(&self) -> bool {
            self.processor.initialized()
        }

        async fn processor(&self) -> Result<Arc<Mutex<BackgroundRemovalProcessor>>> {
            self.processor
                .get_or_try_init(|| async {
                    let model_dir = self.runtime.resolve_model_dir().await?;
                    let variant = self.variant.clone();

                    tokio::task::spawn_blocking(move || {
                        let manager = ModelManager::from_directory(&model_dir, variant)?;
                        let mut processor =
                            BackgroundRemovalProcessor::new(Box::new(TractBackend::new(manager)));
                        processor.initialize()?;
                        Ok::<_, ToolError>(Arc::new(Mutex::new(processor)))
                    })
                    .await
                    .map_err(|e| ToolError::internal(format!("Model loading task failed: {e}")))?
                })
                .await
                .cloned()
        }
    }

    #[async_trait]
    impl RemovalEngine for LocalEngine {
        fn name(&self) -> &'static str {
            "local"
        }

        #[tracing::instrument(skip_all, fields(engine = "local", bytes = input.len()))]
        async fn remove_background(
            &self,
            input: &ImageBlob,
            options: Option<&EngineOptions>,
            progress: Option<ProgressCallback>,
        ) -> Result<ImageBlob> {
            if let Some(options) = options {
                options.check()?;
            }
            let format = options.map_or(OutputFormat::Png, |o| o.output_format);
            let encode_options = EncodeOptions::default()
                .jpeg_quality(options.map_or(80, EngineOptions::quality_percent));

            let processor = self.processor().await.map_err(|e| {
                ToolError::inference(InferenceFailure::Runtime, format!("Model unavailable: {e}"))
            })?;
            let bytes = input.bytes.clone();

            let encoded = tokio::task::spawn_blocking(move || {
                let mut processor = processor
                    .lock()
                    .map_err(|_| ToolError::internal("Processor lock poisoned"))?;
                let report = |current: u64, total: u64| {
                    if let Some(progress) = &progress {
                        progress(INFERENCE_PROGRESS_KEY, current, total);
                    }
                };
                let png = processor.process_bytes(&bytes, &report)?;
                if format == OutputFormat::Png {
                    return Ok(png);
                }
                let image = OutputFormatHandler::decode(&png)?;
                OutputFormatHandler::encode(&image, format, encode_options)
            })
            .await
            .map_err(|e| ToolError::internal(format!("Inference task failed: {e}")))??;

            Ok(ImageBlob::new(encoded, format.mime_type()))
        }

        async fn preload(&self) -> Result<()> {
            self.processor().await.map(|_| ())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = EngineOptions::default();
        assert_eq!(options.model, "isnet");
        assert_eq!(options.output_format, OutputFormat::Png);
        assert_eq!(options.quality_percent(), 80);
        assert!(options.check().is_ok());
    }

    #[test]
    fn test_incompatible_options() {
        let err = EngineOptions::default().model("u2net").check().unwrap_err();
        assert!(err.is_config_incompatibility());

        let err = EngineOptions::default().quality(1.5).check().unwrap_err();
        assert!(err.is_config_incompatibility());
    }
}
