//! Inference backend implementations
//!
//! Tract is the only production backend: pure Rust, CPU only, no native
//! runtime to install.

#[cfg(feature = "tract")]
pub mod tract;

// Test utilities for backend testing
#[cfg(test)]
pub mod test_utils;

#[cfg(feature = "tract")]
pub use self::tract::TractBackend;
