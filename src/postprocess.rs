//! Output post-processing for background removal results
//!
//! Decodes the engine output, optionally downsizes it to a maximum width and
//! re-encodes it in the requested format.

use crate::config::{MaxWidth, OutputFormat};
use crate::error::Result;
use crate::services::{EncodeOptions, OutputFormatHandler};
use crate::types::ImageBlob;
use image::imageops::FilterType;
use image::DynamicImage;

/// JPEG quality used for removal results
pub const RESULT_JPEG_QUALITY: u8 = 95;

/// Target size after applying a width limit
///
/// Height keeps the aspect ratio and is rounded to the nearest pixel.
#[must_use]
pub fn scaled_dimensions(width: u32, height: u32, max_width: MaxWidth) -> (u32, u32) {
    match max_width.limit() {
        Some(limit) if width > limit => {
            let new_height = (f64::from(height) * f64::from(limit) / f64::from(width)).round();
            (limit, (new_height as u32).max(1))
        },
        _ => (width, height),
    }
}

/// Resize and re-encode a removal result
#[tracing::instrument(skip(bytes), fields(input_bytes = bytes.len()))]
pub fn process_output_image(
    bytes: &[u8],
    max_width: MaxWidth,
    format: OutputFormat,
) -> Result<ImageBlob> {
    let image = OutputFormatHandler::decode(bytes)?;
    let image = resize_to_width(image, max_width);

    let options = EncodeOptions::default().jpeg_quality(RESULT_JPEG_QUALITY);
    let encoded = OutputFormatHandler::encode(&image, format, options)?;

    log::debug!(
        "Post-processed result: {}x{} {} ({} bytes)",
        image.width(),
        image.height(),
        format,
        encoded.len()
    );
    Ok(ImageBlob::new(encoded, format.mime_type()))
}

fn resize_to_width(image: DynamicImage, max_width: MaxWidth) -> DynamicImage {
    let (width, height) = (image.width(), image.height());
    let (new_width, new_height) = scaled_dimensions(width, height, max_width);
    if (new_width, new_height) == (width, height) {
        return image;
    }
    image.resize_exact(new_width, new_height, FilterType::Triangle)
}
