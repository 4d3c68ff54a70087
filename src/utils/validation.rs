//! Input validation for uploads and QR payloads
//!
//! Every check here runs before any engine call or encoder work.

use crate::error::{Result, ToolError};
use crate::types::ImageBlob;

/// Upload limit for background removal and the image tools (10 MiB)
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Longest URL accepted by the QR generator
pub const MAX_QR_URL_CHARS: usize = 2048;

/// MIME types accepted by background removal
pub const REMOVAL_MIME_TYPES: &[&str] = &["image/jpeg", "image/jpg", "image/png", "image/webp"];

/// MIME types accepted by the compressor and converter
pub const RASTER_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/webp",
    "image/gif",
    "image/bmp",
    "image/tiff",
];

/// Validator for user-supplied images
pub struct UploadValidator;

impl UploadValidator {
    /// Check MIME type and size of a background removal upload
    pub fn validate_removal_input(input: &ImageBlob) -> Result<()> {
        Self::validate_non_empty(input)?;
        Self::validate_mime(input, REMOVAL_MIME_TYPES, "Supported formats: JPG, PNG, WEBP")?;
        Self::validate_size(input.len(), MAX_UPLOAD_BYTES)
    }

    /// Check MIME type and size of a compressor or converter upload
    pub fn validate_raster_input(input: &ImageBlob, max_bytes: usize) -> Result<()> {
        Self::validate_non_empty(input)?;
        Self::validate_mime(
            input,
            RASTER_MIME_TYPES,
            "Supported formats: JPG, PNG, WEBP, GIF, BMP, TIFF",
        )?;
        Self::validate_size(input.len(), max_bytes)
    }

    fn validate_non_empty(input: &ImageBlob) -> Result<()> {
        if input.is_empty() {
            return Err(ToolError::validation("The provided file is not valid"));
        }
        Ok(())
    }

    fn validate_mime(input: &ImageBlob, accepted: &[&str], hint: &str) -> Result<()> {
        let mime = input.mime_type.trim().to_ascii_lowercase();
        if accepted.contains(&mime.as_str()) {
            Ok(())
        } else {
            Err(ToolError::validation(format!(
                "Unsupported format '{}'. {hint}",
                input.mime_type
            )))
        }
    }

    /// Reject payloads above `max_bytes`; exactly `max_bytes` passes
    pub fn validate_size(len: usize, max_bytes: usize) -> Result<()> {
        if len > max_bytes {
            return Err(ToolError::validation(format!(
                "Image too large. Maximum size: {} MB",
                max_bytes / (1024 * 1024)
            )));
        }
        Ok(())
    }
}

/// Validate the `url` field of a QR request
///
/// Checks run in order: presence and type, absolute URL syntax, length.
pub fn validate_qr_url(value: Option<&serde_json::Value>) -> Result<String> {
    let url = match value {
        Some(serde_json::Value::String(s)) if !s.is_empty() => s,
        _ => return Err(ToolError::validation("Missing or invalid URL")),
    };

    if reqwest::Url::parse(url).is_err() {
        return Err(ToolError::validation("Invalid URL format"));
    }

    if url.chars().count() > MAX_QR_URL_CHARS {
        return Err(ToolError::validation(format!(
            "URL too long (maximum {MAX_QR_URL_CHARS} characters)"
        )));
    }

    Ok(url.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn blob(len: usize, mime: &str) -> ImageBlob {
        ImageBlob::new(vec![0u8; len], mime)
    }

    #[test]
    fn test_removal_mime_types() {
        for mime in ["image/jpeg", "image/jpg", "image/png", "image/webp", "IMAGE/PNG"] {
            assert!(UploadValidator::validate_removal_input(&blob(10, mime)).is_ok());
        }
        for mime in ["image/gif", "image/svg+xml", "application/pdf", ""] {
            let err = UploadValidator::validate_removal_input(&blob(10, mime)).unwrap_err();
            assert!(err.is_validation());
        }
    }

    #[test]
    fn test_size_boundary() {
        assert!(UploadValidator::validate_removal_input(&blob(MAX_UPLOAD_BYTES, "image/png")).is_ok());
        let err = UploadValidator::validate_removal_input(&blob(MAX_UPLOAD_BYTES + 1, "image/png"))
            .unwrap_err();
        assert!(err.to_string().contains("10 MB"));
    }

    #[test]
    fn test_empty_upload() {
        assert!(UploadValidator::validate_removal_input(&blob(0, "image/png")).is_err());
    }

    #[test]
    fn test_raster_types() {
        assert!(UploadValidator::validate_raster_input(&blob(5, "image/tiff"), 100).is_ok());
        assert!(UploadValidator::validate_raster_input(&blob(5, "image/svg+xml"), 100).is_err());
        assert!(UploadValidator::validate_raster_input(&blob(101, "image/png"), 100).is_err());
    }

    #[test]
    fn test_qr_url_validation_order() {
        assert_eq!(
            validate_qr_url(None).unwrap_err().to_string(),
            "Missing or invalid URL"
        );
        assert_eq!(
            validate_qr_url(Some(&json!(42))).unwrap_err().to_string(),
            "Missing or invalid URL"
        );
        assert_eq!(
            validate_qr_url(Some(&json!(""))).unwrap_err().to_string(),
            "Missing or invalid URL"
        );
        assert_eq!(
            validate_qr_url(Some(&json!("not a url"))).unwrap_err().to_string(),
            "Invalid URL format"
        );

        let long = format!("https://example.com/{}", "a".repeat(MAX_QR_URL_CHARS));
        assert!(validate_qr_url(Some(&json!(long)))
            .unwrap_err()
            .to_string()
            .contains("too long"));

        let ok = validate_qr_url(Some(&json!("https://example.com"))).unwrap();
        assert_eq!(ok, "https://example.com");
    }

    #[test]
    fn test_qr_url_exact_limit() {
        let prefix = "https://example.com/";
        let url = format!("{prefix}{}", "a".repeat(MAX_QR_URL_CHARS - prefix.len()));
        assert_eq!(url.len(), MAX_QR_URL_CHARS);
        assert!(validate_qr_url(Some(&json!(url))).is_ok());
    }
}
