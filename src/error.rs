//! Error types for the studio tools

use thiserror::Error;

/// Result type alias for studio tool operations
pub type Result<T> = std::result::Result<T, ToolError>;

/// Message shown when the inference runtime or its environment misbehaves
pub const TECHNICAL_ERROR_MESSAGE: &str = "The background removal system encountered a technical error. Please reload and try again with another image.";

/// Message shown when both the configured and the unconfigured engine calls fail
pub const FALLBACK_FAILED_MESSAGE: &str =
    "Unable to process the image. The AI library is having difficulties.";

/// Words that identify runtime, WASM or environment failures
///
/// Matched as whole words, so `env` hits `process.env` but not `event` or `prevent`.
const RUNTIME_MARKERS: &[&str] = &["wasm", "env", "undefined", "url.replace"];

/// Message substring reported by engines that reject their options object
pub(crate) const CONFIG_INCOMPATIBILITY_MARKER: &str = "url.replace";

/// Structured classification of an engine failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferenceFailure {
    /// The engine rejected the supplied options; retrying without options may work
    ConfigIncompatible,
    /// The inference runtime itself is missing or broken
    Runtime,
    /// Any other inference failure
    Other,
}

/// Error types for studio tool operations
#[derive(Error, Debug)]
pub enum ToolError {
    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image codec errors surfaced directly by the image crate
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// User input rejected before any processing started
    #[error("{0}")]
    Validation(String),

    /// Source bytes could not be interpreted as an image
    #[error("Failed to decode image: {0}")]
    Decode(String),

    /// Target surface could not be serialized
    #[error("Failed to encode image: {0}")]
    Encode(String),

    /// Engine inference errors
    #[error("{message}")]
    Inference {
        kind: InferenceFailure,
        message: String,
    },

    /// Engine returned something that is not an image blob
    #[error("The background removal result is not valid: {0}")]
    InvalidResult(String),

    /// Inference runtime unavailable
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Model loading or initialization errors
    #[error("Model error: {0}")]
    Model(String),

    /// Network errors while talking to remote services
    #[error("Network error: {0}")]
    Network(String),

    /// Operation exceeded its deadline
    #[error("Timed out after {0}s")]
    Timeout(u64),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A job is already running on this tool instance
    #[error("A background removal is already in progress")]
    Busy,

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ToolError {
    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new decode error
    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a new encode error
    pub fn encode<S: Into<String>>(msg: S) -> Self {
        Self::Encode(msg.into())
    }

    /// Create an inference error of the given kind
    pub fn inference<S: Into<String>>(kind: InferenceFailure, msg: S) -> Self {
        Self::Inference {
            kind,
            message: msg.into(),
        }
    }

    /// Create a new invalid result error
    pub fn invalid_result<S: Into<String>>(msg: S) -> Self {
        Self::InvalidResult(msg.into())
    }

    /// Create a new runtime error
    pub fn runtime<S: Into<String>>(msg: S) -> Self {
        Self::Runtime(msg.into())
    }

    /// Create a new model error
    pub fn model<S: Into<String>>(msg: S) -> Self {
        Self::Model(msg.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a network error with operation context
    pub fn network_error<S: Into<String>, E: std::fmt::Display>(context: S, error: E) -> Self {
        Self::Network(format!("{}: {}", context.into(), error))
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        let path_display = path.as_ref().display();
        Self::Io(std::io::Error::new(
            error.kind(),
            format!("Failed to {} '{}': {}", operation, path_display, error),
        ))
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
    ) -> Self {
        Self::InvalidConfig(format!(
            "Invalid {}: {} (valid range: {})",
            parameter, value, valid_range
        ))
    }

    /// Whether the engine failure indicates that the options object itself is the problem
    ///
    /// The structured kind is authoritative. Engines that only report free text are
    /// matched on the known substring.
    #[must_use]
    pub fn is_config_incompatibility(&self) -> bool {
        match self {
            Self::Inference {
                kind: InferenceFailure::ConfigIncompatible,
                ..
            } => true,
            Self::Inference { message, .. } | Self::Runtime(message) => {
                message.contains(CONFIG_INCOMPATIBILITY_MARKER)
            },
            _ => false,
        }
    }

    /// Whether this error comes from the runtime, WASM or environment subsystem
    #[must_use]
    pub fn is_runtime_related(&self) -> bool {
        match self {
            Self::Runtime(_)
            | Self::Inference {
                kind: InferenceFailure::Runtime | InferenceFailure::ConfigIncompatible,
                ..
            } => true,
            Self::Inference { message, .. } | Self::Model(message) => {
                let lower = message.to_lowercase();
                RUNTIME_MARKERS
                    .iter()
                    .any(|marker| contains_word(&lower, marker))
            },
            _ => false,
        }
    }

    /// Rewrite runtime failures into the generic user-facing message
    ///
    /// All other errors keep their original message.
    #[must_use]
    pub fn classify_for_user(self) -> Self {
        if self.is_runtime_related() {
            Self::inference(InferenceFailure::Runtime, TECHNICAL_ERROR_MESSAGE)
        } else {
            self
        }
    }

    /// Whether this error was produced by input validation
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

/// `word` occurs in `text` with no letter, digit or underscore on either side
fn contains_word(text: &str, word: &str) -> bool {
    let is_word_char = |c: char| c.is_alphanumeric() || c == '_';
    text.match_indices(word).any(|(start, _)| {
        let before = text.get(..start).and_then(|s| s.chars().next_back());
        let after = text.get(start + word.len()..).and_then(|s| s.chars().next());
        !before.is_some_and(is_word_char) && !after.is_some_and(is_word_char)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_error_creation() {
        let err = ToolError::invalid_config("test config error");
        assert!(matches!(err, ToolError::InvalidConfig(_)));

        let err = ToolError::validation("Unsupported format");
        assert!(err.is_validation());
    }

    #[test]
    fn test_error_display() {
        let err = ToolError::invalid_config("Missing API key");
        assert_eq!(err.to_string(), "Invalid configuration: Missing API key");

        let err = ToolError::validation("Image too large");
        assert_eq!(err.to_string(), "Image too large");
    }

    #[test]
    fn test_config_incompatibility_structured_and_heuristic() {
        let structured = ToolError::inference(InferenceFailure::ConfigIncompatible, "bad options");
        assert!(structured.is_config_incompatibility());

        let heuristic = ToolError::inference(
            InferenceFailure::Other,
            "TypeError: url.replace is not a function",
        );
        assert!(heuristic.is_config_incompatibility());

        let unrelated = ToolError::inference(InferenceFailure::Other, "tensor shape mismatch");
        assert!(!unrelated.is_config_incompatibility());
        assert!(!ToolError::decode("url.replace").is_config_incompatibility());
    }

    #[test]
    fn test_runtime_errors_are_rewritten() {
        let err = ToolError::runtime("runtime assets missing").classify_for_user();
        assert_eq!(err.to_string(), TECHNICAL_ERROR_MESSAGE);

        let err = ToolError::inference(InferenceFailure::Other, "WASM backend crashed")
            .classify_for_user();
        assert_eq!(err.to_string(), TECHNICAL_ERROR_MESSAGE);

        let err = ToolError::model("failed to read env configuration").classify_for_user();
        assert_eq!(err.to_string(), TECHNICAL_ERROR_MESSAGE);
    }

    #[test]
    fn test_runtime_markers_match_whole_words() {
        for message in [
            "failed to prevent overflow",
            "event loop stalled",
            "inventory of tensors is empty",
            "wasmtime missing",
        ] {
            let err = ToolError::inference(InferenceFailure::Other, message);
            assert!(!err.is_runtime_related(), "{message}");
            assert_eq!(err.classify_for_user().to_string(), message);
        }

        for message in [
            "process.env is not defined",
            "missing ENV variable",
            "Cannot read properties of undefined",
        ] {
            let err = ToolError::model(message);
            assert!(err.is_runtime_related(), "{message}");
        }
    }

    #[test]
    fn test_other_errors_keep_message() {
        let err = ToolError::decode("not a PNG").classify_for_user();
        assert_eq!(err.to_string(), "Failed to decode image: not a PNG");

        let err = ToolError::inference(InferenceFailure::Other, "tensor shape mismatch")
            .classify_for_user();
        assert_eq!(err.to_string(), "tensor shape mismatch");
    }

    #[test]
    fn test_enhanced_error_context() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = ToolError::file_io_error("read config file", Path::new("/etc/tools.json"), &io_error);
        let error_string = err.to_string();
        assert!(error_string.contains("read config file"));
        assert!(error_string.contains("/etc/tools.json"));

        let err = ToolError::config_value_error("quality", 150, "0-100");
        let error_string = err.to_string();
        assert!(error_string.contains("quality"));
        assert!(error_string.contains("150"));
        assert!(error_string.contains("0-100"));
    }
}
