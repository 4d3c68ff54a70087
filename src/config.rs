//! Configuration types for the studio tools
//!
//! Values are layered: built-in defaults, then an optional JSON file, then
//! environment variables, then whatever the caller (usually the CLI) sets on
//! the builder.

use crate::error::{Result, ToolError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Environment variable holding the remove.bg API key
pub const REMOVEBG_API_KEY_ENV: &str = "REMOVEBG_API_KEY";

/// Environment variable overriding the model cache location
pub const CACHE_DIR_ENV: &str = "STUDIO_TOOLS_CACHE_DIR";

/// Versioned repository of the background removal model
pub const DEFAULT_MODEL_URL: &str = "https://huggingface.co/imgly/isnet-general-onnx";

/// Image output formats understood by the post-processor, compressor and converter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// PNG with alpha channel transparency
    #[default]
    Png,
    /// JPEG, composited on white
    #[serde(alias = "jpg")]
    Jpeg,
    /// WebP with alpha channel transparency
    WebP,
    /// Windows bitmap
    Bmp,
    /// GIF
    Gif,
    /// Windows icon (at most 256x256)
    Ico,
}

impl OutputFormat {
    /// All formats in the order they are offered to users
    pub const ALL: [OutputFormat; 6] = [
        Self::Png,
        Self::Jpeg,
        Self::WebP,
        Self::Bmp,
        Self::Gif,
        Self::Ico,
    ];

    /// MIME type of encoded output
    #[must_use]
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::WebP => "image/webp",
            Self::Bmp => "image/bmp",
            Self::Gif => "image/gif",
            Self::Ico => "image/x-icon",
        }
    }

    /// File extension without the dot
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::WebP => "webp",
            Self::Bmp => "bmp",
            Self::Gif => "gif",
            Self::Ico => "ico",
        }
    }

    /// Whether the output keeps an alpha channel
    #[must_use]
    pub fn supports_transparency(self) -> bool {
        matches!(self, Self::Png | Self::WebP)
    }

    /// Map a MIME type back to a format
    #[must_use]
    pub fn from_mime_type(mime: &str) -> Option<Self> {
        match mime.trim().to_ascii_lowercase().as_str() {
            "image/png" => Some(Self::Png),
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            "image/webp" => Some(Self::WebP),
            "image/bmp" => Some(Self::Bmp),
            "image/gif" => Some(Self::Gif),
            "image/x-icon" | "image/vnd.microsoft.icon" => Some(Self::Ico),
            _ => None,
        }
    }

    /// Corresponding `image` crate format
    #[must_use]
    pub fn image_format(self) -> image::ImageFormat {
        match self {
            Self::Png => image::ImageFormat::Png,
            Self::Jpeg => image::ImageFormat::Jpeg,
            Self::WebP => image::ImageFormat::WebP,
            Self::Bmp => image::ImageFormat::Bmp,
            Self::Gif => image::ImageFormat::Gif,
            Self::Ico => image::ImageFormat::Ico,
        }
    }
}

impl FromStr for OutputFormat {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpg" | "jpeg" => Ok(Self::Jpeg),
            "webp" => Ok(Self::WebP),
            "bmp" => Ok(Self::Bmp),
            "gif" => Ok(Self::Gif),
            "ico" => Ok(Self::Ico),
            other => Err(ToolError::validation(format!(
                "Unsupported output format: {other}. Use png, jpg, webp, bmp, gif or ico"
            ))),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Width limit applied to background removal output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MaxWidth {
    /// Keep the engine output size
    #[default]
    Original,
    /// Downscale wider images to this many pixels
    Pixels(u32),
}

impl MaxWidth {
    /// Pixel limit, if any
    #[must_use]
    pub fn limit(self) -> Option<u32> {
        match self {
            Self::Original => None,
            Self::Pixels(px) => Some(px),
        }
    }
}

impl From<Option<u32>> for MaxWidth {
    fn from(value: Option<u32>) -> Self {
        value.map_or(Self::Original, Self::Pixels)
    }
}

impl FromStr for MaxWidth {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("original") || trimmed.is_empty() {
            return Ok(Self::Original);
        }
        match trimmed.parse::<u32>() {
            Ok(0) | Err(_) => Err(ToolError::validation(format!(
                "Invalid max width: {trimmed}. Use a positive pixel count or 'original'"
            ))),
            Ok(px) => Ok(Self::Pixels(px)),
        }
    }
}

/// Engine used for background removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EngineKind {
    /// Local ONNX model executed by Tract
    #[default]
    Local,
    /// remove.bg HTTP API
    RemoveBg,
}

impl FromStr for EngineKind {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "remove-bg" | "removebg" => Ok(Self::RemoveBg),
            other => Err(ToolError::invalid_config(format!(
                "Unknown engine: {other}. Use local or remove-bg"
            ))),
        }
    }
}

/// HTTP listener settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Request body cap; a little above the 10 MiB upload limit so oversize uploads get a 400
    pub body_limit_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            body_limit_bytes: 16 * 1024 * 1024,
        }
    }
}

/// Inference runtime discovery settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Directory with runtime assets shipped next to the binary
    pub bundled_dir: Option<PathBuf>,
    /// Model repository fetched when the bundled assets are missing
    pub model_url: String,
    /// Pinned repository revision
    pub revision: String,
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            bundled_dir: None,
            model_url: DEFAULT_MODEL_URL.to_string(),
            revision: "main".to_string(),
            timeout_ms: 5_000,
            poll_interval_ms: 100,
        }
    }
}

impl RuntimeConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Model warm-up schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreloadConfig {
    pub enabled: bool,
    pub start_delay_ms: u64,
    pub attempt_timeout_ms: u64,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            start_delay_ms: 2_000,
            attempt_timeout_ms: 90_000,
            max_attempts: 3,
            retry_delay_ms: 5_000,
        }
    }
}

impl PreloadConfig {
    #[must_use]
    pub fn start_delay(&self) -> Duration {
        Duration::from_millis(self.start_delay_ms)
    }

    #[must_use]
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Defaults for background removal requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RemovalDefaults {
    pub engine: EngineKind,
    pub output_format: OutputFormat,
    /// `None` keeps the original width
    pub max_width: Option<u32>,
    /// Preferred model variant (fp16, fp32)
    pub variant: Option<String>,
}

/// Defaults for the compressor and converter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageToolDefaults {
    pub compress_quality: u8,
    pub compress_max_dimension: u32,
    pub compress_max_size_mb: u32,
    pub convert_quality: u8,
}

impl Default for ImageToolDefaults {
    fn default() -> Self {
        Self {
            compress_quality: 80,
            compress_max_dimension: 1920,
            compress_max_size_mb: 10,
            convert_quality: 92,
        }
    }
}

/// Complete configuration for the service and CLI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ToolsConfig {
    pub server: ServerConfig,
    pub runtime: RuntimeConfig,
    pub preload: PreloadConfig,
    pub removal: RemovalDefaults,
    pub image_tools: ImageToolDefaults,
    /// Overrides the platform cache directory
    pub cache_dir: Option<PathBuf>,
    /// Never written back out
    #[serde(skip_serializing)]
    pub remove_bg_api_key: Option<String>,
}

impl ToolsConfig {
    /// Create a new configuration builder
    #[must_use]
    pub fn builder() -> ToolsConfigBuilder {
        ToolsConfigBuilder::default()
    }

    /// Load a JSON configuration file
    ///
    /// Missing keys fall back to their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ToolError::file_io_error("read config file", path, &e))?;
        serde_json::from_str(&content).map_err(|e| {
            ToolError::invalid_config(format!("Failed to parse {}: {e}", path.display()))
        })
    }

    /// Overlay values from the process environment
    #[must_use]
    pub fn with_env(self) -> Self {
        self.with_env_from(|key| std::env::var(key).ok())
    }

    /// Overlay values from an arbitrary variable lookup
    #[must_use]
    pub fn with_env_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(REMOVEBG_API_KEY_ENV).filter(|k| !k.trim().is_empty()) {
            self.remove_bg_api_key = Some(key);
        }
        if let Some(dir) = lookup(CACHE_DIR_ENV).filter(|d| !d.trim().is_empty()) {
            self.cache_dir = Some(PathBuf::from(dir));
        }
        self
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<()> {
        let tools = &self.image_tools;
        if !(1..=100).contains(&tools.compress_quality) {
            return Err(ToolError::config_value_error(
                "compression quality",
                tools.compress_quality,
                "1-100",
            ));
        }
        if !(1..=100).contains(&tools.convert_quality) {
            return Err(ToolError::config_value_error(
                "conversion quality",
                tools.convert_quality,
                "1-100",
            ));
        }
        if tools.compress_max_dimension == 0 {
            return Err(ToolError::config_value_error(
                "max dimension",
                0,
                "1 or more pixels",
            ));
        }
        if self.removal.max_width == Some(0) {
            return Err(ToolError::config_value_error("max width", 0, "1 or more pixels"));
        }
        if self.runtime.timeout_ms == 0 || self.runtime.poll_interval_ms == 0 {
            return Err(ToolError::invalid_config(
                "Runtime timeout and poll interval must be non-zero",
            ));
        }
        if self.preload.attempt_timeout_ms == 0 {
            return Err(ToolError::invalid_config(
                "Preload attempt timeout must be non-zero",
            ));
        }
        if self.preload.max_attempts == 0 {
            return Err(ToolError::config_value_error(
                "preload attempts",
                0,
                "1 or more",
            ));
        }
        Ok(())
    }
}

/// Builder for `ToolsConfig`
#[derive(Debug, Default)]
pub struct ToolsConfigBuilder {
    config: ToolsConfig,
}

impl ToolsConfigBuilder {
    /// Start from an already loaded configuration
    #[must_use]
    pub fn from_config(config: ToolsConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn host<S: Into<String>>(mut self, host: S) -> Self {
        self.config.server.host = host.into();
        self
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.server.port = port;
        self
    }

    #[must_use]
    pub fn bundled_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.runtime.bundled_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn model_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.runtime.model_url = url.into();
        self
    }

    #[must_use]
    pub fn runtime_timeout(mut self, timeout: Duration) -> Self {
        self.config.runtime.timeout_ms = duration_ms(timeout);
        self
    }

    #[must_use]
    pub fn preload_enabled(mut self, enabled: bool) -> Self {
        self.config.preload.enabled = enabled;
        self
    }

    #[must_use]
    pub fn preload_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.config.preload.attempt_timeout_ms = duration_ms(timeout);
        self
    }

    #[must_use]
    pub fn engine(mut self, engine: EngineKind) -> Self {
        self.config.removal.engine = engine;
        self
    }

    #[must_use]
    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.config.removal.output_format = format;
        self
    }

    #[must_use]
    pub fn max_width(mut self, max_width: MaxWidth) -> Self {
        self.config.removal.max_width = max_width.limit();
        self
    }

    #[must_use]
    pub fn variant<S: Into<String>>(mut self, variant: S) -> Self {
        self.config.removal.variant = Some(variant.into());
        self
    }

    #[must_use]
    pub fn compress_quality(mut self, quality: u8) -> Self {
        self.config.image_tools.compress_quality = quality;
        self
    }

    #[must_use]
    pub fn convert_quality(mut self, quality: u8) -> Self {
        self.config.image_tools.convert_quality = quality;
        self
    }

    #[must_use]
    pub fn cache_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.cache_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn remove_bg_api_key<S: Into<String>>(mut self, key: S) -> Self {
        self.config.remove_bg_api_key = Some(key.into());
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<ToolsConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = ToolsConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.runtime.timeout(), Duration::from_secs(5));
        assert_eq!(config.runtime.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.preload.start_delay(), Duration::from_secs(2));
        assert_eq!(config.preload.attempt_timeout(), Duration::from_secs(90));
        assert_eq!(config.preload.retry_delay(), Duration::from_secs(5));
        assert_eq!(config.preload.max_attempts, 3);
        assert_eq!(config.image_tools.compress_quality, 80);
        assert_eq!(config.image_tools.convert_quality, 92);
        assert!(config.remove_bg_api_key.is_none());
    }

    #[test]
    fn test_output_format_parsing() {
        assert_eq!("png".parse::<OutputFormat>().unwrap(), OutputFormat::Png);
        assert_eq!("JPG".parse::<OutputFormat>().unwrap(), OutputFormat::Jpeg);
        assert_eq!("jpeg".parse::<OutputFormat>().unwrap(), OutputFormat::Jpeg);
        assert_eq!("ico".parse::<OutputFormat>().unwrap(), OutputFormat::Ico);
        assert!("svg".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_output_format_properties() {
        assert!(OutputFormat::Png.supports_transparency());
        assert!(OutputFormat::WebP.supports_transparency());
        assert!(!OutputFormat::Jpeg.supports_transparency());
        assert!(!OutputFormat::Bmp.supports_transparency());
        assert_eq!(OutputFormat::Jpeg.extension(), "jpg");
        assert_eq!(OutputFormat::Jpeg.mime_type(), "image/jpeg");
        assert_eq!(
            OutputFormat::from_mime_type("image/jpg"),
            Some(OutputFormat::Jpeg)
        );
        assert_eq!(OutputFormat::from_mime_type("image/svg+xml"), None);
    }

    #[test]
    fn test_max_width_parsing() {
        assert_eq!("original".parse::<MaxWidth>().unwrap(), MaxWidth::Original);
        assert_eq!("1000".parse::<MaxWidth>().unwrap(), MaxWidth::Pixels(1000));
        assert!("0".parse::<MaxWidth>().is_err());
        assert!("wide".parse::<MaxWidth>().is_err());
        assert_eq!(MaxWidth::from(Some(800)).limit(), Some(800));
        assert_eq!(MaxWidth::from(None).limit(), None);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ToolsConfig =
            serde_json::from_str(r#"{"server": {"port": 8080}, "removal": {"output_format": "jpg"}}"#)
                .unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.removal.output_format, OutputFormat::Jpeg);
        assert_eq!(config.preload.max_attempts, 3);
    }

    #[test]
    fn test_env_overlay() {
        let vars: HashMap<&str, &str> = [
            (REMOVEBG_API_KEY_ENV, "secret"),
            (CACHE_DIR_ENV, "/tmp/studio-cache"),
        ]
        .into_iter()
        .collect();

        let config = ToolsConfig::default()
            .with_env_from(|key| vars.get(key).map(|v| (*v).to_string()));
        assert_eq!(config.remove_bg_api_key.as_deref(), Some("secret"));
        assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/studio-cache")));

        let blank = ToolsConfig::default().with_env_from(|_| Some("  ".to_string()));
        assert!(blank.remove_bg_api_key.is_none());
    }

    #[test]
    fn test_api_key_is_not_serialized() {
        let config = ToolsConfig::builder()
            .remove_bg_api_key("secret")
            .build()
            .unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
    }

    #[test]
    fn test_builder_validation() {
        assert!(ToolsConfig::builder().compress_quality(0).build().is_err());
        assert!(ToolsConfig::builder().convert_quality(101).build().is_err());
        assert!(ToolsConfig::builder()
            .runtime_timeout(Duration::ZERO)
            .build()
            .is_err());

        let config = ToolsConfig::builder()
            .port(9000)
            .engine(EngineKind::RemoveBg)
            .max_width(MaxWidth::Pixels(1200))
            .build()
            .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.removal.engine, EngineKind::RemoveBg);
        assert_eq!(config.removal.max_width, Some(1200));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tools.json");
        std::fs::write(&path, r#"{"preload": {"enabled": false}}"#).unwrap();

        let config = ToolsConfig::from_file(&path).unwrap();
        assert!(!config.preload.enabled);

        std::fs::write(&path, "not json").unwrap();
        assert!(ToolsConfig::from_file(&path).is_err());
    }
}
