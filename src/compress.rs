//! Image compression
//!
//! Re-encodes an upload in its own format family after capping the longest
//! side. JPEG output steps its quality down until it fits the size budget.

use crate::config::{ImageToolDefaults, OutputFormat};
use crate::error::{Result, ToolError};
use crate::services::{EncodeOptions, OutputFormatHandler};
use crate::types::{file_stem, ImageBlob};
use crate::utils::validation::UploadValidator;
use image::imageops::FilterType;
use image::DynamicImage;
use serde::Serialize;

/// Lowest JPEG quality tried while shrinking towards the size budget
const MIN_JPEG_QUALITY: u8 = 10;
const QUALITY_STEP: u8 = 10;

/// Compression settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionOptions {
    /// JPEG quality, 1-100
    pub quality: u8,
    /// Longest side after resizing
    pub max_dimension: u32,
    /// Output size budget in megabytes
    pub max_size_mb: u32,
}

impl Default for CompressionOptions {
    fn default() -> Self {
        Self::from(&ImageToolDefaults::default())
    }
}

impl From<&ImageToolDefaults> for CompressionOptions {
    fn from(defaults: &ImageToolDefaults) -> Self {
        Self {
            quality: defaults.compress_quality,
            max_dimension: defaults.compress_max_dimension,
            max_size_mb: defaults.compress_max_size_mb,
        }
    }
}

impl CompressionOptions {
    #[must_use]
    pub fn quality(mut self, quality: u8) -> Self {
        self.quality = quality;
        self
    }

    #[must_use]
    pub fn max_dimension(mut self, max_dimension: u32) -> Self {
        self.max_dimension = max_dimension;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.quality) {
            return Err(ToolError::validation(format!(
                "Invalid quality: {} (valid range: 1-100)",
                self.quality
            )));
        }
        if self.max_dimension == 0 {
            return Err(ToolError::validation("Maximum dimension must be at least 1 pixel"));
        }
        Ok(())
    }

    fn max_size_bytes(&self) -> usize {
        self.max_size_mb as usize * 1024 * 1024
    }
}

/// Outcome of a compression run
#[derive(Debug, Clone, Serialize)]
pub struct CompressionResult {
    #[serde(skip)]
    pub result: ImageBlob,
    pub original_size: usize,
    pub compressed_size: usize,
    /// Size reduction in percent; 0 when the original was kept
    pub ratio: f64,
    pub download_name: String,
}

/// Percentage saved going from `original` to `compressed` bytes
#[must_use]
pub fn compression_ratio(original: usize, compressed: usize) -> f64 {
    if original == 0 {
        return 0.0;
    }
    (original as f64 - compressed as f64) / original as f64 * 100.0
}

/// Output format for a compressed upload
///
/// TIFF has no lossy encoder here and is written as PNG.
#[must_use]
pub fn compression_format(mime_type: &str) -> OutputFormat {
    OutputFormat::from_mime_type(mime_type).unwrap_or(OutputFormat::Png)
}

/// Image compressor
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCompressor {
    options: CompressionOptions,
}

impl ImageCompressor {
    pub fn new(options: CompressionOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self { options })
    }

    #[must_use]
    pub fn options(&self) -> CompressionOptions {
        self.options
    }

    /// Compress an upload
    ///
    /// Returns the original bytes when re-encoding does not make the file smaller.
    #[tracing::instrument(skip(self, input), fields(input_bytes = input.len(), mime = %input.mime_type))]
    pub fn compress(&self, input: &ImageBlob) -> Result<CompressionResult> {
        UploadValidator::validate_raster_input(input, self.options.max_size_bytes())?;

        let format = compression_format(&input.mime_type);
        let image = OutputFormatHandler::decode(&input.bytes)?;
        let image = fit_within(image, self.options.max_dimension);
        let encoded = self.encode_within_budget(&image, format)?;

        let original_name = input.file_name.as_deref().unwrap_or("image");
        let (result, download_name) = if encoded.len() < input.len() {
            (
                ImageBlob::new(encoded, format.mime_type()),
                format!("compressed-{}", rename_extension(original_name, format)),
            )
        } else {
            log::info!("Compressed output is not smaller, keeping the original");
            (input.clone(), format!("compressed-{original_name}"))
        };

        let ratio = compression_ratio(input.len(), result.len());
        log::info!(
            "🗜️  Compressed {} -> {} bytes ({:.1}% saved)",
            input.len(),
            result.len(),
            ratio
        );

        Ok(CompressionResult {
            original_size: input.len(),
            compressed_size: result.len(),
            ratio,
            download_name,
            result: result.with_file_name(original_name),
        })
    }

    fn encode_within_budget(&self, image: &DynamicImage, format: OutputFormat) -> Result<Vec<u8>> {
        let budget = self.options.max_size_bytes();
        let mut quality = self.options.quality;

        loop {
            let options = EncodeOptions::default()
                .jpeg_quality(quality)
                .best_png_compression(true);
            let encoded = OutputFormatHandler::encode(image, format, options)?;

            if encoded.len() <= budget || format != OutputFormat::Jpeg || quality <= MIN_JPEG_QUALITY
            {
                return Ok(encoded);
            }
            quality = quality.saturating_sub(QUALITY_STEP).max(MIN_JPEG_QUALITY);
            log::debug!("Output above {} bytes, retrying at quality {}", budget, quality);
        }
    }
}

/// Downscale so the longest side is at most `max_dimension`
fn fit_within(image: DynamicImage, max_dimension: u32) -> DynamicImage {
    if image.width() <= max_dimension && image.height() <= max_dimension {
        return image;
    }
    image.resize(max_dimension, max_dimension, FilterType::Lanczos3)
}

fn rename_extension(name: &str, format: OutputFormat) -> String {
    let current = name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
    let matches = match (current.as_deref(), format) {
        (Some("jpg" | "jpeg"), OutputFormat::Jpeg) => true,
        (Some(ext), _) => ext == format.extension(),
        (None, _) => false,
    };
    if matches {
        name.to_string()
    } else {
        format!("{}.{}", file_stem(name), format.extension())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn noisy_jpeg(width: u32, height: u32, quality: u8) -> ImageBlob {
        let image = DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x ^ y) % 256) as u8])
        }));
        let bytes = OutputFormatHandler::encode(
            &image,
            OutputFormat::Jpeg,
            EncodeOptions::default().jpeg_quality(quality),
        )
        .unwrap();
        ImageBlob::new(bytes, "image/jpeg").with_file_name("photo.jpeg")
    }

    #[test]
    fn test_compression_ratio() {
        assert!((compression_ratio(1000, 250) - 75.0).abs() < f64::EPSILON);
        assert!(compression_ratio(1000, 1000).abs() < f64::EPSILON);
        assert!(compression_ratio(0, 0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_compress_resizes_and_shrinks() {
        let compressor =
            ImageCompressor::new(CompressionOptions::default().quality(40).max_dimension(64))
                .unwrap();
        let input = noisy_jpeg(256, 128, 100);
        let result = compressor.compress(&input).unwrap();

        assert!(result.compressed_size < result.original_size);
        assert!(result.ratio > 0.0);
        assert_eq!(result.download_name, "compressed-photo.jpeg");

        let decoded = OutputFormatHandler::decode(&result.result.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 32));
    }

    #[test]
    fn test_keeps_original_when_not_smaller() {
        let compressor = ImageCompressor::new(CompressionOptions::default().quality(100)).unwrap();
        let input = noisy_jpeg(16, 16, 5);
        let result = compressor.compress(&input).unwrap();

        assert_eq!(result.result.bytes, input.bytes);
        assert!(result.ratio.abs() < f64::EPSILON);
    }

    #[test]
    fn test_rejects_svg_and_bad_options() {
        let compressor = ImageCompressor::default();
        let svg = ImageBlob::new(b"<svg/>".to_vec(), "image/svg+xml");
        assert!(compressor.compress(&svg).unwrap_err().is_validation());

        assert!(ImageCompressor::new(CompressionOptions::default().quality(0)).is_err());
        assert!(ImageCompressor::new(CompressionOptions::default().max_dimension(0)).is_err());
    }

    #[test]
    fn test_tiff_is_written_as_png() {
        assert_eq!(compression_format("image/tiff"), OutputFormat::Png);
        assert_eq!(compression_format("image/jpg"), OutputFormat::Jpeg);
        assert_eq!(rename_extension("scan.tiff", OutputFormat::Png), "scan.png");
        assert_eq!(rename_extension("a.JPG", OutputFormat::Jpeg), "a.JPG");
    }
}
