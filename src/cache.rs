//! Model cache management for downloaded models
//!
//! Models live under `<cache>/studio-tools/models/<model-id>/`, where the
//! model ID is derived from the repository URL.

use crate::config::{CACHE_DIR_ENV, DEFAULT_MODEL_URL};
use crate::error::{Result, ToolError};
use crate::models::ModelManager;
use std::fs;
use std::path::{Path, PathBuf};

/// Information about a cached model
#[derive(Debug, Clone)]
pub struct CachedModelInfo {
    /// Model identifier (derived from URL)
    pub model_id: String,
    /// Path to the cached model directory
    pub path: PathBuf,
    /// Available ONNX model variants (fp16, fp32)
    pub variants: Vec<String>,
    /// Size of the model directory in bytes
    pub size_bytes: u64,
}

/// Model cache manager
#[derive(Debug, Clone)]
pub struct ModelCache {
    cache_dir: PathBuf,
}

impl ModelCache {
    /// Create a cache in the platform cache directory
    ///
    /// `STUDIO_TOOLS_CACHE_DIR` overrides the location.
    pub fn new() -> Result<Self> {
        if let Some(dir) = std::env::var_os(CACHE_DIR_ENV) {
            return Self::with_custom_cache_dir(Path::new(&dir));
        }

        let base = dirs::cache_dir().ok_or_else(|| {
            ToolError::invalid_config(format!(
                "Failed to determine cache directory. Set {CACHE_DIR_ENV}."
            ))
        })?;
        Self::with_custom_cache_dir(&base.join("studio-tools"))
    }

    /// Create a cache rooted at `cache_dir` (models go in `cache_dir/models`)
    pub fn with_custom_cache_dir(cache_dir: &Path) -> Result<Self> {
        let models_dir = cache_dir.join("models");
        if !models_dir.exists() {
            fs::create_dir_all(&models_dir).map_err(|e| {
                ToolError::file_io_error("create cache directory", &models_dir, &e)
            })?;
        }
        Ok(Self {
            cache_dir: models_dir,
        })
    }

    /// Use the configured directory when present, else the platform default
    pub fn from_override(cache_dir: Option<&Path>) -> Result<Self> {
        match cache_dir {
            Some(dir) => Self::with_custom_cache_dir(dir),
            None => Self::new(),
        }
    }

    /// Generate a model ID from a URL
    ///
    /// ```
    /// use studio_tools::cache::ModelCache;
    ///
    /// let id = ModelCache::url_to_model_id("https://huggingface.co/imgly/isnet-general-onnx");
    /// assert_eq!(id, "imgly--isnet-general-onnx");
    /// ```
    #[must_use]
    pub fn url_to_model_id(url: &str) -> String {
        let prefix = "https://huggingface.co/";
        if let Some(repo) = url.strip_prefix(prefix) {
            repo.trim_end_matches('/').replace('/', "--")
        } else {
            use sha2::{Digest, Sha256};
            let mut hasher = Sha256::new();
            hasher.update(url.as_bytes());
            let hash_string = format!("url-{:x}", hasher.finalize());
            hash_string.get(..16).unwrap_or(&hash_string).to_string()
        }
    }

    #[must_use]
    pub fn get_default_model_id() -> String {
        Self::url_to_model_id(DEFAULT_MODEL_URL)
    }

    /// Whether the model directory exists and holds a complete model
    #[must_use]
    pub fn is_model_cached(&self, model_id: &str) -> bool {
        Self::is_valid_model_dir(&self.get_model_path(model_id))
    }

    /// Whether a directory has both configs and at least one ONNX variant
    #[must_use]
    pub fn is_valid_model_dir(model_path: &Path) -> bool {
        model_path.join("config.json").is_file()
            && model_path.join("preprocessor_config.json").is_file()
            && !ModelManager::scan_variants(model_path).is_empty()
    }

    /// Path to a cached model directory (may not exist)
    #[must_use]
    pub fn get_model_path(&self, model_id: &str) -> PathBuf {
        self.cache_dir.join(model_id)
    }

    #[must_use]
    pub fn get_current_cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// List valid models in the cache, sorted by ID
    pub fn scan_cached_models(&self) -> Result<Vec<CachedModelInfo>> {
        let mut models = Vec::new();
        if !self.cache_dir.exists() {
            return Ok(models);
        }

        let entries = fs::read_dir(&self.cache_dir)
            .map_err(|e| ToolError::file_io_error("read cache directory", &self.cache_dir, &e))?;

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            if !Self::is_valid_model_dir(&path) {
                log::debug!("Skipping invalid model directory: {}", path.display());
                continue;
            }
            let Some(model_id) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            models.push(CachedModelInfo {
                model_id: model_id.to_string(),
                variants: ModelManager::scan_variants(&path),
                size_bytes: directory_size(&path).unwrap_or(0),
                path: path.clone(),
            });
        }

        models.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        Ok(models)
    }

    /// Remove one cached model; `false` if it was not cached
    pub fn clear_specific_model(&self, model_id: &str) -> Result<bool> {
        let model_path = self.get_model_path(model_id);
        if !model_path.exists() {
            return Ok(false);
        }

        log::info!("Removing cached model: {}", model_id);
        fs::remove_dir_all(&model_path)
            .map_err(|e| ToolError::file_io_error("remove cached model", &model_path, &e))?;
        Ok(true)
    }
}

fn directory_size(dir: &Path) -> std::io::Result<u64> {
    let mut total = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            total += directory_size(&path)?;
        } else {
            total += entry.metadata()?.len();
        }
    }
    Ok(total)
}

/// Format file size in human-readable format
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    let unit = UNITS.get(unit_index).unwrap_or(&"B");
    if unit_index == 0 {
        format!("{bytes} {unit}")
    } else {
        format!("{size:.1} {unit}")
    }
}
