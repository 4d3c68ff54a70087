//! Image format conversion

use crate::config::{ImageToolDefaults, OutputFormat};
use crate::error::{Result, ToolError};
use crate::services::{EncodeOptions, OutputFormatHandler};
use crate::types::{file_stem, ImageBlob};
use crate::utils::validation::{UploadValidator, MAX_UPLOAD_BYTES};

/// Converts uploads between raster formats
#[derive(Debug, Clone, Copy)]
pub struct ImageConverter {
    quality: u8,
}

impl Default for ImageConverter {
    fn default() -> Self {
        Self {
            quality: ImageToolDefaults::default().convert_quality,
        }
    }
}

impl ImageConverter {
    /// Converter with a JPEG quality between 1 and 100
    pub fn new(quality: u8) -> Result<Self> {
        if !(1..=100).contains(&quality) {
            return Err(ToolError::validation(format!(
                "Invalid quality: {quality} (valid range: 1-100)"
            )));
        }
        Ok(Self { quality })
    }

    /// Convert `input` to `target`
    ///
    /// PNG and WebP keep transparency, every other target is composited on white.
    #[tracing::instrument(skip(self, input), fields(input_bytes = input.len(), target = %target))]
    pub fn convert(&self, input: &ImageBlob, target: OutputFormat) -> Result<ImageBlob> {
        UploadValidator::validate_raster_input(input, MAX_UPLOAD_BYTES)?;

        let image = OutputFormatHandler::decode(&input.bytes)?;
        let options = EncodeOptions::default().jpeg_quality(self.quality);
        let encoded = OutputFormatHandler::encode(&image, target, options)?;

        log::info!(
            "🔄 Converted {} ({} bytes) to {} ({} bytes)",
            input.mime_type,
            input.len(),
            target,
            encoded.len()
        );
        Ok(ImageBlob::new(encoded, target.mime_type())
            .with_file_name(converted_name(input.file_name.as_deref(), target)))
    }
}

/// `{base}.{ext}`, with `converted` standing in for a missing name
#[must_use]
pub fn converted_name(original: Option<&str>, target: OutputFormat) -> String {
    let base = original
        .map(file_stem)
        .filter(|s| !s.is_empty())
        .unwrap_or("converted");
    format!("{base}.{}", target.extension())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgba, RgbaImage};

    fn transparent_png() -> ImageBlob {
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 8, Rgba([0, 0, 255, 0])));
        let bytes =
            OutputFormatHandler::encode(&image, OutputFormat::Png, EncodeOptions::default())
                .unwrap();
        ImageBlob::new(bytes, "image/png").with_file_name("logo.png")
    }

    #[test]
    fn test_converted_name() {
        assert_eq!(converted_name(Some("logo.png"), OutputFormat::Jpeg), "logo.jpg");
        assert_eq!(converted_name(None, OutputFormat::Ico), "converted.ico");
    }

    #[test]
    fn test_png_to_jpeg_fills_white() {
        let blob = ImageConverter::default()
            .convert(&transparent_png(), OutputFormat::Jpeg)
            .unwrap();
        assert_eq!(blob.mime_type, "image/jpeg");
        assert_eq!(blob.file_name.as_deref(), Some("logo.jpg"));

        let decoded = OutputFormatHandler::decode(&blob.bytes).unwrap().to_rgb8();
        assert!(decoded.get_pixel(3, 3).0.iter().all(|&c| c > 240));
    }

    #[test]
    fn test_png_to_bmp_and_ico() {
        let converter = ImageConverter::default();
        for target in [OutputFormat::Bmp, OutputFormat::Ico, OutputFormat::Gif] {
            let blob = converter.convert(&transparent_png(), target).unwrap();
            assert_eq!(blob.mime_type, target.mime_type());
            assert_eq!(
                OutputFormatHandler::detect_format(&blob.bytes),
                Some(target.image_format())
            );
        }
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(ImageConverter::new(0).is_err());
        let svg = ImageBlob::new(b"<svg/>".to_vec(), "image/svg+xml");
        assert!(ImageConverter::default()
            .convert(&svg, OutputFormat::Png)
            .unwrap_err()
            .is_validation());
    }
}
