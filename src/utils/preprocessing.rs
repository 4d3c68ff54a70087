//! Letterbox preprocessing for segmentation models
//!
//! The source image is scaled to fit a square canvas, centered on white
//! padding and normalized into an NCHW tensor. The same geometry maps the
//! model output back onto the source pixels.

use crate::error::{Result, ToolError};
use crate::models::PreprocessingConfig;
use image::{DynamicImage, ImageBuffer, RgbImage};
use ndarray::Array4;

/// Padding around the scaled image
pub const PADDING_COLOR: [u8; 3] = [255, 255, 255];

/// Placement of the scaled source inside the square model canvas
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxGeometry {
    /// Canvas side length
    pub target: u32,
    pub scale: f32,
    pub scaled_width: u32,
    pub scaled_height: u32,
    pub offset_x: u32,
    pub offset_y: u32,
}

impl LetterboxGeometry {
    /// Fit `width` x `height` into a `target` square, preserving aspect ratio
    pub fn fit(width: u32, height: u32, target: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(ToolError::decode("Image has zero width or height"));
        }
        if target == 0 {
            return Err(ToolError::model("Model input size must be non-zero"));
        }

        let target_f32 = target as f32;
        let scale = (target_f32 / width as f32).min(target_f32 / height as f32);

        // Rounding may overshoot by one pixel on extreme aspect ratios
        let scaled_width = ((width as f32 * scale).round() as u32).clamp(1, target);
        let scaled_height = ((height as f32 * scale).round() as u32).clamp(1, target);

        Ok(Self {
            target,
            scale,
            scaled_width,
            scaled_height,
            offset_x: (target - scaled_width) / 2,
            offset_y: (target - scaled_height) / 2,
        })
    }

    /// Canvas coordinates for a source pixel, clamped to the canvas
    #[must_use]
    pub fn source_to_canvas(&self, x: u32, y: u32) -> (usize, usize) {
        let max = self.target.saturating_sub(1) as f32;
        let cx = ((x as f32 * self.scale).round() + self.offset_x as f32).clamp(0.0, max);
        let cy = ((y as f32 * self.scale).round() + self.offset_y as f32).clamp(0.0, max);
        (cx as usize, cy as usize)
    }
}

/// Image to tensor conversion
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Letterbox and normalize an image for inference
    ///
    /// Returns the tensor together with the geometry needed to map the output mask back.
    pub fn preprocess_for_inference(
        image: &DynamicImage,
        config: &PreprocessingConfig,
    ) -> Result<(Array4<f32>, LetterboxGeometry)> {
        let (canvas, geometry) = Self::letterbox(image, config.target_size[0])?;
        let tensor = Self::canvas_to_tensor(&canvas, config);
        Ok((tensor, geometry))
    }

    /// Scale and center an image on a white square canvas
    pub fn letterbox(image: &DynamicImage, target: u32) -> Result<(RgbImage, LetterboxGeometry)> {
        let rgb_image = image.to_rgb8();
        let (width, height) = rgb_image.dimensions();
        let geometry = LetterboxGeometry::fit(width, height, target)?;

        let resized = image::imageops::resize(
            &rgb_image,
            geometry.scaled_width,
            geometry.scaled_height,
            image::imageops::FilterType::Triangle,
        );

        let mut canvas = ImageBuffer::from_pixel(target, target, image::Rgb(PADDING_COLOR));
        image::imageops::replace(
            &mut canvas,
            &resized,
            i64::from(geometry.offset_x),
            i64::from(geometry.offset_y),
        );

        Ok((canvas, geometry))
    }

    #[allow(clippy::indexing_slicing)]
    // Channel index comes from the 3-channel tensor shape
    fn canvas_to_tensor(canvas: &RgbImage, config: &PreprocessingConfig) -> Array4<f32> {
        let (width, height) = canvas.dimensions();
        let mean = config.normalization_mean;
        let std = config.normalization_std;

        Array4::from_shape_fn(
            (1, 3, height as usize, width as usize),
            |(_, channel, y, x)| {
                let value = canvas.get_pixel(x as u32, y as u32)[channel];
                (f32::from(value) / 255.0 - mean[channel]) / std[channel]
            },
        )
    }
}
