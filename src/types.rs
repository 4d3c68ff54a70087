//! Core types shared by the studio tools

use crate::config::{MaxWidth, OutputFormat};
use crate::error::{Result, ToolError};
use image::{ImageBuffer, Luma, Rgba};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Encoded image bytes tagged with their MIME type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBlob {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    /// Original file name, when known
    pub file_name: Option<String>,
}

impl ImageBlob {
    #[must_use]
    pub fn new<S: Into<String>>(bytes: Vec<u8>, mime_type: S) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
            file_name: None,
        }
    }

    #[must_use]
    pub fn with_file_name<S: Into<String>>(mut self, name: S) -> Self {
        self.file_name = Some(name.into());
        self
    }

    /// Read a file, guessing the MIME type from its extension
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            std::fs::read(path).map_err(|e| ToolError::file_io_error("read image", path, &e))?;
        let mime_type = mime_from_extension(path).unwrap_or("application/octet-stream");
        let mut blob = Self::new(bytes, mime_type);
        blob.file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(ToString::to_string);
        Ok(blob)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Whether the MIME type names an image
    #[must_use]
    pub fn is_image(&self) -> bool {
        self.mime_type.trim().to_ascii_lowercase().starts_with("image/")
    }
}

/// Guess a MIME type from a file extension
#[must_use]
pub fn mime_from_extension(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "bmp" => Some("image/bmp"),
        "tif" | "tiff" => Some("image/tiff"),
        "ico" => Some("image/x-icon"),
        "svg" => Some("image/svg+xml"),
        _ => None,
    }
}

/// File name without its last extension
#[must_use]
pub fn file_stem(name: &str) -> &str {
    match name.rfind('.') {
        Some(0) | None => name,
        Some(idx) => name.get(..idx).unwrap_or(name),
    }
}

/// One background removal request
#[derive(Debug, Clone)]
pub struct RemovalJob {
    pub input: ImageBlob,
    pub output_format: OutputFormat,
    pub max_width: MaxWidth,
}

impl RemovalJob {
    #[must_use]
    pub fn new(input: ImageBlob) -> Self {
        Self {
            input,
            output_format: OutputFormat::Png,
            max_width: MaxWidth::Original,
        }
    }

    #[must_use]
    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    #[must_use]
    pub fn max_width(mut self, max_width: MaxWidth) -> Self {
        self.max_width = max_width;
        self
    }

    /// Suggested download name: `{base}-transparent.png` or `{base}-no-bg.{ext}`
    #[must_use]
    pub fn download_name(&self) -> String {
        removal_download_name(self.input.file_name.as_deref(), self.output_format)
    }
}

/// Download name for a background removal result
#[must_use]
pub fn removal_download_name(original: Option<&str>, format: OutputFormat) -> String {
    let base = original.map(file_stem).filter(|s| !s.is_empty()).unwrap_or("image");
    let suffix = if format == OutputFormat::Png {
        "transparent"
    } else {
        "no-bg"
    };
    format!("{base}-{suffix}.{}", format.extension())
}

/// Outcome of a completed background removal job
#[derive(Debug, Clone)]
pub struct RemovalResult {
    pub result: ImageBlob,
    pub original_size: usize,
    pub result_size: usize,
    pub download_name: String,
}

/// Wall-clock breakdown of one removal job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessingTimings {
    /// Engine calls, including a fallback retry
    pub engine_ms: u64,
    pub postprocessing_ms: u64,
    pub total_ms: u64,
    pub used_fallback: bool,
}

/// Single-channel alpha mask (0 = background, 255 = foreground)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentationMask {
    /// Mask data as grayscale values (0-255)
    pub data: Vec<u8>,

    /// Mask dimensions (width, height)
    pub dimensions: (u32, u32),
}

impl SegmentationMask {
    #[must_use]
    pub fn new(data: Vec<u8>, dimensions: (u32, u32)) -> Self {
        Self { data, dimensions }
    }

    /// Convert mask to a grayscale image
    pub fn to_image(&self) -> Result<ImageBuffer<Luma<u8>, Vec<u8>>> {
        let (width, height) = self.dimensions;
        ImageBuffer::from_raw(width, height, self.data.clone())
            .ok_or_else(|| ToolError::internal("Failed to create image from mask data"))
    }

    /// Write the mask into the alpha channel of an RGBA image
    pub fn apply_to_image(&self, image: &mut ImageBuffer<Rgba<u8>, Vec<u8>>) -> Result<()> {
        if image.dimensions() != self.dimensions {
            return Err(ToolError::internal(
                "Image and mask dimensions do not match",
            ));
        }

        for (pixel, &alpha) in image.pixels_mut().zip(self.data.iter()) {
            pixel[3] = alpha;
        }

        Ok(())
    }

    /// Share of pixels considered foreground
    #[must_use]
    pub fn foreground_ratio(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let foreground = self.data.iter().filter(|&&x| x > 127).count();
        foreground as f32 / self.data.len() as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_names() {
        assert_eq!(
            removal_download_name(Some("photo.jpg"), OutputFormat::Png),
            "photo-transparent.png"
        );
        assert_eq!(
            removal_download_name(Some("photo.final.jpeg"), OutputFormat::Jpeg),
            "photo.final-no-bg.jpg"
        );
        assert_eq!(
            removal_download_name(None, OutputFormat::Png),
            "image-transparent.png"
        );
        assert_eq!(removal_download_name(Some(""), OutputFormat::Jpeg), "image-no-bg.jpg");
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("a.png"), "a");
        assert_eq!(file_stem("archive.tar.gz"), "archive.tar");
        assert_eq!(file_stem("noext"), "noext");
        assert_eq!(file_stem(".hidden"), ".hidden");
    }

    #[test]
    fn test_blob_is_image() {
        assert!(ImageBlob::new(vec![1], "image/png").is_image());
        assert!(ImageBlob::new(vec![1], "IMAGE/JPEG").is_image());
        assert!(!ImageBlob::new(vec![1], "application/json").is_image());
    }

    #[test]
    fn test_mask_apply() {
        let mut image = ImageBuffer::from_pixel(2, 1, Rgba([10, 20, 30, 255]));
        let mask = SegmentationMask::new(vec![0, 200], (2, 1));
        mask.apply_to_image(&mut image).unwrap();
        assert_eq!(image.get_pixel(0, 0)[3], 0);
        assert_eq!(image.get_pixel(1, 0)[3], 200);
        assert!((mask.foreground_ratio() - 0.5).abs() < f32::EPSILON);

        let wrong = SegmentationMask::new(vec![0], (1, 1));
        assert!(wrong.apply_to_image(&mut image).is_err());
    }
}
