//! remove.bg hosted engine

use crate::config::OutputFormat;
use crate::engine::{EngineOptions, RemovalEngine};
use crate::error::{InferenceFailure, Result, ToolError};
use crate::services::{EncodeOptions, OutputFormatHandler, ProgressCallback};
use crate::types::ImageBlob;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};

pub const REMOVEBG_ENDPOINT: &str = "https://api.remove.bg/v1.0/removebg";

const PROGRESS_KEY: &str = "fetch:removebg";

/// Engine that calls the remove.bg API
#[derive(Clone)]
pub struct RemoveBgEngine {
    client: Client,
    api_key: Option<String>,
    endpoint: String,
}

impl std::fmt::Debug for RemoveBgEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoveBgEngine")
            .field("endpoint", &self.endpoint)
            .field("has_api_key", &self.api_key.is_some())
            .finish_non_exhaustive()
    }
}

impl RemoveBgEngine {
    pub fn new(api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| ToolError::network_error("Failed to create HTTP client", e))?;
        Ok(Self {
            client,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            endpoint: REMOVEBG_ENDPOINT.to_string(),
        })
    }

    #[must_use]
    pub fn with_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            ToolError::invalid_config(format!(
                "remove.bg API key is not configured. Set {}.",
                crate::config::REMOVEBG_API_KEY_ENV
            ))
        })
    }

    /// Value of the API `format` field; everything but JPEG is fetched as PNG
    fn api_format(format: OutputFormat) -> &'static str {
        match format {
            OutputFormat::Jpeg => "jpg",
            _ => "png",
        }
    }
}

#[async_trait]
impl RemovalEngine for RemoveBgEngine {
    fn name(&self) -> &'static str {
        "remove.bg"
    }

    #[tracing::instrument(skip_all, fields(engine = "remove.bg", bytes = input.len()))]
    async fn remove_background(
        &self,
        input: &ImageBlob,
        options: Option<&EngineOptions>,
        progress: Option<ProgressCallback>,
    ) -> Result<ImageBlob> {
        let api_key = self.api_key()?;
        let format = options.map_or(OutputFormat::Png, |o| o.output_format);

        let mut part = Part::bytes(input.bytes.clone())
            .mime_str(&input.mime_type)
            .map_err(|e| ToolError::validation(format!("Invalid content type: {e}")))?;
        part = part.file_name(input.file_name.clone().unwrap_or_else(|| "image".to_string()));
        let form = Form::new()
            .part("image_file", part)
            .text("size", "auto")
            .text("format", Self::api_format(format));

        if let Some(progress) = &progress {
            progress(PROGRESS_KEY, 0, 1);
        }
        let response = self
            .client
            .post(&self.endpoint)
            .header("X-Api-Key", api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ToolError::network_error("remove.bg request failed", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let kind = if status == StatusCode::BAD_REQUEST {
                InferenceFailure::ConfigIncompatible
            } else {
                InferenceFailure::Other
            };
            return Err(ToolError::inference(
                kind,
                format!("remove.bg returned {status}: {body}"),
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ToolError::network_error("Failed to read remove.bg response", e))?
            .to_vec();
        if let Some(progress) = &progress {
            progress(PROGRESS_KEY, 1, 1);
        }

        if matches!(format, OutputFormat::Png | OutputFormat::Jpeg) {
            return Ok(ImageBlob::new(bytes, format.mime_type()));
        }

        let quality = options.map_or(80, EngineOptions::quality_percent);
        let image = OutputFormatHandler::decode(&bytes)?;
        let encoded = OutputFormatHandler::encode(
            &image,
            format,
            EncodeOptions::default().jpeg_quality(quality),
        )?;
        Ok(ImageBlob::new(encoded, format.mime_type()))
    }

    async fn preload(&self) -> Result<()> {
        self.api_key().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_api_key_fails_without_network() {
        let engine = RemoveBgEngine::new(None)
            .unwrap()
            .with_endpoint("http://127.0.0.1:9/unreachable");
        let input = ImageBlob::new(vec![1, 2, 3], "image/png");

        let err = engine.remove_background(&input, None, None).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidConfig(_)));
        assert!(err.to_string().contains("REMOVEBG_API_KEY"));
        assert!(engine.preload().await.is_err());
    }

    #[test]
    fn test_blank_key_counts_as_missing() {
        let engine = RemoveBgEngine::new(Some("  ".to_string())).unwrap();
        assert!(engine.api_key().is_err());
    }

    #[test]
    fn test_api_format() {
        assert_eq!(RemoveBgEngine::api_format(OutputFormat::Jpeg), "jpg");
        assert_eq!(RemoveBgEngine::api_format(OutputFormat::WebP), "png");
    }
}
