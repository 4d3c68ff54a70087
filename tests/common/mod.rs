//! Shared helpers for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use image::{DynamicImage, Rgba, RgbaImage};
use std::sync::{Arc, Mutex};
use studio_tools::services::{EncodeOptions, OutputFormatHandler, ProgressCallback};
use studio_tools::{
    EngineOptions, ImageBlob, InferenceFailure, OutputFormat, RemovalEngine, Result, ToolError,
};

/// How the scripted engine answers `remove_background`
#[derive(Debug, Clone)]
pub enum RemovalScript {
    /// Return a transparent PNG of the given size
    Succeed(u32, u32),
    /// Reject calls with options as incompatible, succeed without them
    RejectOptions { width: u32, height: u32 },
    /// Fail every call with this inference failure
    Fail(InferenceFailure, String),
    /// Return a non-image payload
    ReturnJson,
}

/// How the scripted engine answers `preload`
#[derive(Debug, Clone, Copy)]
pub enum PreloadScript {
    Succeed,
    Fail,
    /// Never finish
    Hang,
}

/// Mock engine with call history, in the spirit of the backend mocks
#[derive(Debug)]
pub struct ScriptedEngine {
    removal: RemovalScript,
    preload: PreloadScript,
    call_history: Arc<Mutex<Vec<String>>>,
}

impl ScriptedEngine {
    pub fn new(removal: RemovalScript) -> Self {
        Self {
            removal,
            preload: PreloadScript::Succeed,
            call_history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_preload(mut self, preload: PreloadScript) -> Self {
        self.preload = preload;
        self
    }

    pub fn get_call_history(&self) -> Vec<String> {
        self.call_history.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.get_call_history().iter().filter(|c| *c == call).count()
    }

    fn record_call(&self, call: &str) {
        self.call_history.lock().unwrap().push(call.to_string());
    }
}

#[async_trait]
impl RemovalEngine for ScriptedEngine {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn remove_background(
        &self,
        _input: &ImageBlob,
        options: Option<&EngineOptions>,
        progress: Option<ProgressCallback>,
    ) -> Result<ImageBlob> {
        self.record_call(if options.is_some() {
            "remove_background(options)"
        } else {
            "remove_background(none)"
        });
        if let Some(progress) = &progress {
            progress("compute:inference", 1, 2);
            progress("compute:inference", 2, 2);
        }

        match &self.removal {
            RemovalScript::Succeed(width, height) => Ok(transparent_png(*width, *height)),
            RemovalScript::RejectOptions { width, height } => match options {
                Some(_) => Err(ToolError::inference(
                    InferenceFailure::ConfigIncompatible,
                    "engine rejected its configuration",
                )),
                None => Ok(transparent_png(*width, *height)),
            },
            RemovalScript::Fail(kind, message) => Err(ToolError::inference(*kind, message.clone())),
            RemovalScript::ReturnJson => Ok(ImageBlob::new(b"{}".to_vec(), "application/json")),
        }
    }

    async fn preload(&self) -> Result<()> {
        self.record_call("preload");
        match self.preload {
            PreloadScript::Succeed => Ok(()),
            PreloadScript::Fail => Err(ToolError::network_error("fetch model", "connection refused")),
            PreloadScript::Hang => std::future::pending().await,
        }
    }
}

/// PNG with a transparent left half and an opaque red right half
pub fn transparent_png(width: u32, height: u32) -> ImageBlob {
    let image = RgbaImage::from_fn(width, height, |x, _| {
        if x < width / 2 {
            Rgba([0, 0, 0, 0])
        } else {
            Rgba([255, 0, 0, 255])
        }
    });
    let bytes = OutputFormatHandler::encode(
        &DynamicImage::ImageRgba8(image),
        OutputFormat::Png,
        EncodeOptions::default(),
    )
    .unwrap();
    ImageBlob::new(bytes, "image/png")
}

/// Opaque JPEG upload
pub fn jpeg_upload(width: u32, height: u32) -> ImageBlob {
    let image = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
        width,
        height,
        image::Rgb([40, 120, 200]),
    ));
    let bytes =
        OutputFormatHandler::encode(&image, OutputFormat::Jpeg, EncodeOptions::default()).unwrap();
    ImageBlob::new(bytes, "image/jpeg").with_file_name("holiday.jpg")
}
