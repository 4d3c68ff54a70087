//! Output format handling service
//!
//! Shared by the post-processor, compressor and converter: flattening onto
//! white for formats without alpha and encoding with per-format settings.

use crate::config::OutputFormat;
use crate::error::{Result, ToolError};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilterType, PngEncoder};
use image::{DynamicImage, ImageFormat, RgbImage};
use std::io::Cursor;

/// Largest side accepted by the ICO container
pub const ICO_MAX_DIMENSION: u32 = 256;

/// Encoder settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOptions {
    /// JPEG quality, 1-100
    pub jpeg_quality: u8,
    /// Spend more time on smaller PNG output
    pub best_png_compression: bool,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            jpeg_quality: 90,
            best_png_compression: false,
        }
    }
}

impl EncodeOptions {
    #[must_use]
    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    #[must_use]
    pub fn best_png_compression(mut self, enabled: bool) -> Self {
        self.best_png_compression = enabled;
        self
    }
}

/// Service for handling output format conversions
pub struct OutputFormatHandler;

impl OutputFormatHandler {
    /// Composite an image over opaque white
    #[must_use]
    pub fn flatten_on_white(image: &DynamicImage) -> RgbImage {
        let rgba = image.to_rgba8();
        let (width, height) = rgba.dimensions();
        RgbImage::from_fn(width, height, |x, y| {
            let pixel = rgba.get_pixel(x, y);
            let alpha = u16::from(pixel[3]);
            let blend =
                |channel: u8| ((u16::from(channel) * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
            image::Rgb([blend(pixel[0]), blend(pixel[1]), blend(pixel[2])])
        })
    }

    /// Pixel layout the encoder for `format` should receive
    ///
    /// Formats without transparency are flattened onto white first.
    #[must_use]
    pub fn prepare_for_format(image: &DynamicImage, format: OutputFormat) -> DynamicImage {
        match format {
            OutputFormat::Png | OutputFormat::WebP => DynamicImage::ImageRgba8(image.to_rgba8()),
            OutputFormat::Jpeg | OutputFormat::Bmp => {
                DynamicImage::ImageRgb8(Self::flatten_on_white(image))
            },
            // GIF and ICO encoders want RGBA input; the flattened pixels stay opaque
            OutputFormat::Gif | OutputFormat::Ico => DynamicImage::ImageRgba8(
                DynamicImage::ImageRgb8(Self::flatten_on_white(image)).to_rgba8(),
            ),
        }
    }

    /// Flatten if needed and encode
    pub fn encode(
        image: &DynamicImage,
        format: OutputFormat,
        options: EncodeOptions,
    ) -> Result<Vec<u8>> {
        if format == OutputFormat::Ico
            && (image.width() > ICO_MAX_DIMENSION || image.height() > ICO_MAX_DIMENSION)
        {
            return Err(ToolError::encode(format!(
                "ICO images are limited to {ICO_MAX_DIMENSION}x{ICO_MAX_DIMENSION} pixels, got {}x{}",
                image.width(),
                image.height()
            )));
        }

        let prepared = Self::prepare_for_format(image, format);
        let mut buffer = Vec::new();

        let result = match format {
            OutputFormat::Jpeg => {
                let encoder = JpegEncoder::new_with_quality(&mut buffer, options.jpeg_quality);
                prepared.write_with_encoder(encoder)
            },
            OutputFormat::Png => {
                let compression = if options.best_png_compression {
                    CompressionType::Best
                } else {
                    CompressionType::Default
                };
                let encoder =
                    PngEncoder::new_with_quality(&mut buffer, compression, PngFilterType::Adaptive);
                prepared.write_with_encoder(encoder)
            },
            OutputFormat::WebP => return Self::encode_webp(&prepared),
            OutputFormat::Bmp | OutputFormat::Gif | OutputFormat::Ico => {
                let mut cursor = Cursor::new(&mut buffer);
                prepared.write_to(&mut cursor, format.image_format())
            },
        };

        result.map_err(|e| ToolError::encode(format!("{format}: {e}")))?;
        Ok(buffer)
    }

    #[cfg(feature = "webp-support")]
    fn encode_webp(image: &DynamicImage) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        let encoder = image::codecs::webp::WebPEncoder::new_lossless(&mut buffer);
        image
            .write_with_encoder(encoder)
            .map_err(|e| ToolError::encode(format!("webp: {e}")))?;
        Ok(buffer)
    }

    #[cfg(not(feature = "webp-support"))]
    fn encode_webp(_image: &DynamicImage) -> Result<Vec<u8>> {
        Err(ToolError::encode(
            "WebP output requires the webp-support feature",
        ))
    }

    /// Decode bytes, guessing the container from its signature
    pub fn decode(bytes: &[u8]) -> Result<DynamicImage> {
        let reader = image::ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| ToolError::decode(e.to_string()))?;
        if reader.format().is_none() {
            return Err(ToolError::decode("Unrecognized image format"));
        }
        reader.decode().map_err(|e| ToolError::decode(e.to_string()))
    }

    /// Container format detected from the leading bytes
    #[must_use]
    pub fn detect_format(bytes: &[u8]) -> Option<ImageFormat> {
        image::guess_format(bytes).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn half_transparent(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_fn(width, height, |x, _| {
            if x % 2 == 0 {
                Rgba([0, 0, 0, 0])
            } else {
                Rgba([200, 10, 10, 255])
            }
        }))
    }

    #[test]
    fn test_flatten_on_white() {
        let image = DynamicImage::ImageRgba8(RgbaImage::from_fn(3, 1, |x, _| match x {
            0 => Rgba([0, 0, 0, 0]),
            1 => Rgba([0, 0, 0, 255]),
            _ => Rgba([0, 0, 0, 128]),
        }));
        let flat = OutputFormatHandler::flatten_on_white(&image);
        assert_eq!(flat.get_pixel(0, 0).0, [255, 255, 255]);
        assert_eq!(flat.get_pixel(1, 0).0, [0, 0, 0]);
        assert_eq!(flat.get_pixel(2, 0).0, [127, 127, 127]);
    }

    #[test]
    fn test_png_keeps_alpha() {
        let bytes =
            OutputFormatHandler::encode(&half_transparent(4, 2), OutputFormat::Png, EncodeOptions::default())
                .unwrap();
        let decoded = OutputFormatHandler::decode(&bytes).unwrap().to_rgba8();
        assert_eq!(decoded.get_pixel(0, 0)[3], 0);
        assert_eq!(decoded.get_pixel(1, 0)[3], 255);
    }

    #[test]
    fn test_jpeg_and_bmp_are_opaque() {
        for format in [OutputFormat::Jpeg, OutputFormat::Bmp] {
            let bytes = OutputFormatHandler::encode(
                &half_transparent(8, 8),
                format,
                EncodeOptions::default(),
            )
            .unwrap();
            assert_eq!(
                OutputFormatHandler::detect_format(&bytes),
                Some(format.image_format())
            );
            let decoded = OutputFormatHandler::decode(&bytes).unwrap();
            assert!(!decoded.color().has_alpha());
        }
    }

    #[test]
    fn test_gif_encoding() {
        let bytes = OutputFormatHandler::encode(
            &half_transparent(4, 4),
            OutputFormat::Gif,
            EncodeOptions::default(),
        )
        .unwrap();
        assert_eq!(OutputFormatHandler::detect_format(&bytes), Some(ImageFormat::Gif));
    }

    #[test]
    fn test_ico_size_limit() {
        let ok = OutputFormatHandler::encode(
            &half_transparent(64, 64),
            OutputFormat::Ico,
            EncodeOptions::default(),
        );
        assert!(ok.is_ok());

        let err = OutputFormatHandler::encode(
            &half_transparent(300, 10),
            OutputFormat::Ico,
            EncodeOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ToolError::Encode(_)));
    }

    #[test]
    fn test_decode_garbage() {
        let err = OutputFormatHandler::decode(b"definitely not an image").unwrap_err();
        assert!(matches!(err, ToolError::Decode(_)));
    }

    #[test]
    fn test_jpeg_quality_clamped() {
        assert_eq!(EncodeOptions::default().jpeg_quality(0).jpeg_quality, 1);
        assert_eq!(EncodeOptions::default().jpeg_quality(200).jpeg_quality, 100);
    }
}
