//! QR code generation
//!
//! URLs are encoded at the highest error correction level and rendered as a
//! black-on-white PNG, returned as a `data:` URL.

use crate::config::OutputFormat;
use crate::error::{Result, ToolError};
use crate::services::{EncodeOptions, OutputFormatHandler};
use base64::Engine as _;
use image::{DynamicImage, GrayImage, Luma};
use qrcode::{Color, EcLevel, QrCode};
use serde::Serialize;

/// Rendered image width in pixels
pub const QR_TARGET_WIDTH: u32 = 512;

/// Quiet zone around the symbol, in modules
pub const QR_MARGIN_MODULES: u32 = 2;

const DARK: Luma<u8> = Luma([0]);
const LIGHT: Luma<u8> = Luma([255]);

/// Successful QR response body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QrCodeResponse {
    pub success: bool,
    pub qr_code: String,
    pub url: String,
}

/// QR renderer settings
#[derive(Debug, Clone, Copy)]
pub struct QrGenerator {
    width: u32,
    margin: u32,
}

impl Default for QrGenerator {
    fn default() -> Self {
        Self {
            width: QR_TARGET_WIDTH,
            margin: QR_MARGIN_MODULES,
        }
    }
}

impl QrGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn width(mut self, width: u32) -> Self {
        self.width = width;
        self
    }

    #[must_use]
    pub fn margin(mut self, margin: u32) -> Self {
        self.margin = margin;
        self
    }

    /// Render `data` into a grayscale bitmap
    ///
    /// The image is `width` pixels square unless the symbol plus margin needs
    /// more, in which case every module gets one pixel.
    pub fn render(&self, data: &str) -> Result<GrayImage> {
        let code = QrCode::with_error_correction_level(data.as_bytes(), EcLevel::H)
            .map_err(|e| ToolError::internal(format!("QR encoding failed: {e}")))?;

        let symbol = code.width() as u32;
        let modules = symbol + 2 * self.margin;
        let size = self.width.max(modules);
        let scale = f64::from(size) / f64::from(modules);
        let margin = self.margin;

        Ok(GrayImage::from_fn(size, size, |px, py| {
            let mx = (f64::from(px) / scale).floor() as u32;
            let my = (f64::from(py) / scale).floor() as u32;
            let inside = |m: u32| m >= margin && m < margin + symbol;
            if inside(mx) && inside(my) {
                match code[((mx - margin) as usize, (my - margin) as usize)] {
                    Color::Dark => DARK,
                    Color::Light => LIGHT,
                }
            } else {
                LIGHT
            }
        }))
    }

    /// Render `data` as a PNG `data:` URL
    pub fn to_data_url(&self, data: &str) -> Result<String> {
        let bitmap = self.render(data)?;
        let png = OutputFormatHandler::encode(
            &DynamicImage::ImageLuma8(bitmap),
            OutputFormat::Png,
            EncodeOptions::default(),
        )?;
        Ok(format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(png)
        ))
    }
}

/// Build the QR response for an already validated URL
#[tracing::instrument(skip(url), fields(url_len = url.len()))]
pub fn generate_qr_code(url: &str) -> Result<QrCodeResponse> {
    let qr_code = QrGenerator::default().to_data_url(url)?;
    Ok(QrCodeResponse {
        success: true,
        qr_code,
        url: url.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_dimensions_and_quiet_zone() {
        let bitmap = QrGenerator::new().render("https://example.com").unwrap();
        assert_eq!(bitmap.dimensions(), (QR_TARGET_WIDTH, QR_TARGET_WIDTH));

        // Corners are quiet zone, the finder pattern starts right after it
        assert_eq!(*bitmap.get_pixel(0, 0), LIGHT);
        assert_eq!(*bitmap.get_pixel(QR_TARGET_WIDTH - 1, QR_TARGET_WIDTH - 1), LIGHT);

        let code = QrCode::with_error_correction_level("https://example.com", EcLevel::H).unwrap();
        let modules = code.width() as f64 + 4.0;
        let first_module_px = (2.0 * f64::from(QR_TARGET_WIDTH) / modules).ceil() as u32;
        assert_eq!(*bitmap.get_pixel(first_module_px + 1, first_module_px + 1), DARK);
    }

    #[test]
    fn test_tiny_width_grows_to_fit() {
        let bitmap = QrGenerator::new().width(10).margin(0).render("hi").unwrap();
        let code = QrCode::with_error_correction_level("hi", EcLevel::H).unwrap();
        assert_eq!(bitmap.width(), code.width() as u32);
    }

    #[test]
    fn test_data_url() {
        let response = generate_qr_code("https://example.com").unwrap();
        assert!(response.success);
        assert_eq!(response.url, "https://example.com");
        assert!(response.qr_code.starts_with("data:image/png;base64,"));

        let encoded = response.qr_code.trim_start_matches("data:image/png;base64,");
        let png = base64::engine::general_purpose::STANDARD.decode(encoded).unwrap();
        let decoded = OutputFormatHandler::decode(&png).unwrap();
        assert_eq!(decoded.width(), QR_TARGET_WIDTH);
    }

    #[test]
    fn test_response_field_names() {
        let json = serde_json::to_value(generate_qr_code("https://example.com").unwrap()).unwrap();
        assert!(json.get("qrCode").is_some());
        assert_eq!(json["success"], true);
    }
}
