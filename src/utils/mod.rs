//! Utility modules

pub mod preprocessing;
pub mod validation;

pub use preprocessing::{ImagePreprocessor, LetterboxGeometry};
pub use validation::{validate_qr_url, UploadValidator, MAX_QR_URL_CHARS, MAX_UPLOAD_BYTES};
