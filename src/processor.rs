//! Local background removal pipeline
//!
//! decode → letterbox tensor → backend inference → mask → RGBA with alpha → PNG

use crate::config::OutputFormat;
use crate::error::{Result, ToolError};
use crate::inference::InferenceBackend;
use crate::services::{EncodeOptions, OutputFormatHandler};
use crate::types::SegmentationMask;
use crate::utils::preprocessing::{ImagePreprocessor, LetterboxGeometry};
use image::{DynamicImage, ImageBuffer, RgbaImage};
use instant::Instant;
use ndarray::Array4;
use tracing::{debug, info};

/// Steps reported through the progress hook
pub const PROCESSOR_STEPS: u64 = 4;

/// Runs a segmentation backend over encoded images
pub struct BackgroundRemovalProcessor {
    backend: Box<dyn InferenceBackend>,
}

impl std::fmt::Debug for BackgroundRemovalProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundRemovalProcessor")
            .field("initialized", &self.backend.is_initialized())
            .finish()
    }
}

impl BackgroundRemovalProcessor {
    #[must_use]
    pub fn new(backend: Box<dyn InferenceBackend>) -> Self {
        Self { backend }
    }

    /// Load the model if that has not happened yet
    pub fn initialize(&mut self) -> Result<()> {
        if let Some(load_time) = self.backend.initialize()? {
            info!(load_ms = load_time.as_millis() as u64, "Segmentation model loaded");
        }
        Ok(())
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.backend.is_initialized()
    }

    /// Remove the background from encoded image bytes and return a transparent PNG
    ///
    /// `progress` receives `(step, PROCESSOR_STEPS)` after each stage.
    pub fn process_bytes(
        &mut self,
        image_bytes: &[u8],
        progress: &dyn Fn(u64, u64),
    ) -> Result<Vec<u8>> {
        let start = Instant::now();
        let image = OutputFormatHandler::decode(image_bytes)?;
        progress(1, PROCESSOR_STEPS);

        let result = self.process_image(&image, progress)?;
        let encoded = OutputFormatHandler::encode(
            &DynamicImage::ImageRgba8(result),
            OutputFormat::Png,
            EncodeOptions::default(),
        )?;
        progress(PROCESSOR_STEPS, PROCESSOR_STEPS);

        debug!(
            total_ms = start.elapsed().as_millis() as u64,
            bytes = encoded.len(),
            "Local removal finished"
        );
        Ok(encoded)
    }

    /// Remove the background from a decoded image
    pub fn process_image(
        &mut self,
        image: &DynamicImage,
        progress: &dyn Fn(u64, u64),
    ) -> Result<RgbaImage> {
        self.initialize()?;

        let config = self.backend.get_preprocessing_config()?;
        let (tensor, _) = ImagePreprocessor::preprocess_for_inference(image, &config)?;

        let output = self.backend.infer(&tensor)?;
        progress(2, PROCESSOR_STEPS);

        let mask = Self::tensor_to_mask(&output, (image.width(), image.height()))?;
        let result = Self::apply_background_removal(image, &mask);
        progress(3, PROCESSOR_STEPS);

        debug!(
            foreground = mask.foreground_ratio(),
            "Segmentation mask generated"
        );
        Ok(result)
    }

    /// Map a `[1, 1, H, W]` model output back onto the source dimensions
    pub fn tensor_to_mask(
        tensor: &Array4<f32>,
        original_dimensions: (u32, u32),
    ) -> Result<SegmentationMask> {
        let shape = tensor.shape();
        let &[1, 1, height, width] = shape else {
            return Err(ToolError::invalid_result(format!(
                "Invalid output tensor shape {shape:?}"
            )));
        };
        if height != width {
            return Err(ToolError::invalid_result(format!(
                "Expected a square mask tensor, got {width}x{height}"
            )));
        }

        let (orig_width, orig_height) = original_dimensions;
        let geometry = LetterboxGeometry::fit(orig_width, orig_height, width as u32)?;

        let mut data = Vec::with_capacity(orig_width as usize * orig_height as usize);
        for y in 0..orig_height {
            for x in 0..orig_width {
                let (tx, ty) = geometry.source_to_canvas(x, y);
                let value = tensor.get([0, 0, ty, tx]).copied().unwrap_or(0.0);
                data.push((value.clamp(0.0, 1.0) * 255.0) as u8);
            }
        }

        Ok(SegmentationMask::new(data, original_dimensions))
    }

    /// Use the mask as alpha; fully transparent pixels are zeroed
    #[must_use]
    pub fn apply_background_removal(image: &DynamicImage, mask: &SegmentationMask) -> RgbaImage {
        let rgba_image = image.to_rgba8();
        let (width, _) = rgba_image.dimensions();

        ImageBuffer::from_fn(rgba_image.width(), rgba_image.height(), |x, y| {
            let pixel = rgba_image.get_pixel(x, y);
            let alpha = mask
                .data
                .get((y * width + x) as usize)
                .copied()
                .unwrap_or(0);
            if alpha > 0 {
                image::Rgba([pixel[0], pixel[1], pixel[2], alpha])
            } else {
                image::Rgba([0, 0, 0, 0])
            }
        })
    }
}
