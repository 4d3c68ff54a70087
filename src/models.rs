//! Model assets: location, variant selection and preprocessing metadata
//!
//! A model directory follows the `HuggingFace` layout:
//! `config.json`, `preprocessor_config.json` and `onnx/model*.onnx`.

use crate::error::{Result, ToolError};
use std::fs;
use std::path::{Path, PathBuf};

/// Model information and metadata
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub name: String,
    pub precision: String,
    pub size_bytes: u64,
    pub input_shape: (usize, usize, usize, usize), // NCHW
    pub output_shape: (usize, usize, usize, usize),
}

/// Preprocessing parameters read from `preprocessor_config.json`
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessingConfig {
    /// [height, width]
    pub target_size: [u32; 2],
    /// Per-channel mean in the 0-1 range
    pub normalization_mean: [f32; 3],
    /// Per-channel std in the 0-1 range
    pub normalization_std: [f32; 3],
}

/// Resolved model directory with parsed configuration
#[derive(Debug, Clone)]
pub struct ModelManager {
    model_path: PathBuf,
    model_config: serde_json::Value,
    preprocessor_config: serde_json::Value,
    variant: String,
}

impl ModelManager {
    /// Load a model directory
    pub fn from_directory(model_path: &Path, variant: Option<String>) -> Result<Self> {
        if !model_path.is_dir() {
            return Err(ToolError::model(format!(
                "Model directory not found: {}",
                model_path.display()
            )));
        }

        let model_config = read_json(&model_path.join("config.json"))?;
        let preprocessor_config = read_json(&model_path.join("preprocessor_config.json"))?;
        let variant = Self::resolve_variant(model_path, variant)?;

        Ok(Self {
            model_path: model_path.to_path_buf(),
            model_config,
            preprocessor_config,
            variant,
        })
    }

    /// Available ONNX variants in a model directory
    #[must_use]
    pub fn scan_variants(model_path: &Path) -> Vec<String> {
        let mut variants = Vec::new();
        let Ok(entries) = fs::read_dir(model_path.join("onnx")) else {
            return variants;
        };

        for entry in entries.flatten() {
            let Some(file_name) = entry.file_name().to_str().map(ToString::to_string) else {
                continue;
            };
            match file_name.as_str() {
                "model.onnx" => variants.push("fp32".to_string()),
                "model_fp16.onnx" => variants.push("fp16".to_string()),
                other => {
                    if let Some(variant) = other
                        .strip_prefix("model_")
                        .and_then(|s| s.strip_suffix(".onnx"))
                    {
                        variants.push(variant.to_string());
                    }
                },
            }
        }
        variants.sort();
        variants
    }

    fn resolve_variant(model_path: &Path, requested: Option<String>) -> Result<String> {
        let available = Self::scan_variants(model_path);
        if available.is_empty() {
            return Err(ToolError::model(format!(
                "No ONNX model files found in {}",
                model_path.join("onnx").display()
            )));
        }

        if let Some(variant) = requested {
            if available.contains(&variant) {
                return Ok(variant);
            }
            return Err(ToolError::model(format!(
                "Requested variant '{variant}' not available. Available: {available:?}"
            )));
        }

        // Tract runs fp32 graphs natively
        for preferred in ["fp32", "fp16"] {
            if available.iter().any(|v| v == preferred) {
                return Ok(preferred.to_string());
            }
        }

        available
            .into_iter()
            .next()
            .ok_or_else(|| ToolError::model("No model variant available"))
    }

    /// Path to the ONNX file of the selected variant
    #[must_use]
    pub fn model_file_path(&self) -> PathBuf {
        let onnx_dir = self.model_path.join("onnx");
        match self.variant.as_str() {
            "fp32" => onnx_dir.join("model.onnx"),
            "fp16" => onnx_dir.join("model_fp16.onnx"),
            variant => onnx_dir.join(format!("model_{variant}.onnx")),
        }
    }

    /// Read the ONNX graph bytes
    pub fn load_model(&self) -> Result<Vec<u8>> {
        let path = self.model_file_path();
        fs::read(&path).map_err(|e| ToolError::file_io_error("read model file", &path, &e))
    }

    #[must_use]
    pub fn variant(&self) -> &str {
        &self.variant
    }

    pub fn get_info(&self) -> Result<ModelInfo> {
        let size_bytes = fs::metadata(self.model_file_path())
            .map(|m| m.len())
            .unwrap_or(0);
        let model_type = self
            .model_config
            .get("model_type")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("unknown");
        let [height, width] = parse_image_size(&self.preprocessor_config)?;

        Ok(ModelInfo {
            name: format!("{model_type}-{}", self.variant),
            precision: self.variant.clone(),
            size_bytes,
            input_shape: (1, 3, height as usize, width as usize),
            output_shape: (1, 1, height as usize, width as usize),
        })
    }

    pub fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        Ok(PreprocessingConfig {
            target_size: parse_image_size(&self.preprocessor_config)?,
            normalization_mean: parse_channel_triplet(
                &self.preprocessor_config,
                "image_mean",
                128.0,
            )?,
            normalization_std: parse_channel_triplet(
                &self.preprocessor_config,
                "image_std",
                255.0,
            )?,
        })
    }
}

fn read_json(path: &Path) -> Result<serde_json::Value> {
    let content = fs::read_to_string(path)
        .map_err(|e| ToolError::file_io_error("read model configuration", path, &e))?;
    serde_json::from_str(&content)
        .map_err(|e| ToolError::model(format!("Failed to parse {}: {e}", path.display())))
}

fn parse_image_size(preprocessor: &serde_json::Value) -> Result<[u32; 2]> {
    let size = preprocessor
        .get("size")
        .ok_or_else(|| ToolError::model("Missing size in preprocessor config"))?;

    let dimension = |key: &str| -> Result<u32> {
        size.get(key)
            .and_then(serde_json::Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .filter(|v| *v > 0)
            .ok_or_else(|| ToolError::model(format!("Missing or invalid {key} in size config")))
    };

    Ok([dimension("height")?, dimension("width")?])
}

/// Parse a 0-255 channel triplet and rescale it to 0-1
fn parse_channel_triplet(
    preprocessor: &serde_json::Value,
    key: &str,
    fallback: f64,
) -> Result<[f32; 3]> {
    let values = preprocessor
        .get(key)
        .and_then(serde_json::Value::as_array)
        .filter(|values| values.len() >= 3)
        .ok_or_else(|| ToolError::model(format!("Missing or invalid {key} in preprocessor config")))?;

    let channel = |idx: usize| -> f32 {
        (values
            .get(idx)
            .and_then(serde_json::Value::as_f64)
            .unwrap_or(fallback)
            / 255.0) as f32
    };

    Ok([channel(0), channel(1), channel(2)])
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Write a minimal model directory with the given ONNX file names
    pub(crate) fn write_model_dir(root: &Path, onnx_files: &[&str]) {
        fs::create_dir_all(root.join("onnx")).unwrap();
        fs::write(root.join("config.json"), r#"{"model_type": "isnet"}"#).unwrap();
        fs::write(
            root.join("preprocessor_config.json"),
            r#"{"size": {"height": 1024, "width": 1024}, "image_mean": [128, 128, 128], "image_std": [256, 256, 256]}"#,
        )
        .unwrap();
        for file in onnx_files {
            fs::write(root.join("onnx").join(file), b"onnx").unwrap();
        }
    }

    #[test]
    fn test_from_directory_parses_configs() {
        let dir = TempDir::new().unwrap();
        write_model_dir(dir.path(), &["model.onnx", "model_fp16.onnx"]);

        let manager = ModelManager::from_directory(dir.path(), None).unwrap();
        assert_eq!(manager.variant(), "fp32");
        assert!(manager.model_file_path().ends_with("onnx/model.onnx"));

        let config = manager.get_preprocessing_config().unwrap();
        assert_eq!(config.target_size, [1024, 1024]);
        assert!((config.normalization_mean[0] - 128.0 / 255.0).abs() < 1e-6);
        assert!((config.normalization_std[2] - 256.0 / 255.0).abs() < 1e-6);

        let info = manager.get_info().unwrap();
        assert_eq!(info.name, "isnet-fp32");
        assert_eq!(info.input_shape, (1, 3, 1024, 1024));
        assert_eq!(info.output_shape, (1, 1, 1024, 1024));
    }

    #[test]
    fn test_variant_selection() {
        let dir = TempDir::new().unwrap();
        write_model_dir(dir.path(), &["model_fp16.onnx", "model_quantized.onnx"]);

        assert_eq!(
            ModelManager::scan_variants(dir.path()),
            vec!["fp16".to_string(), "quantized".to_string()]
        );
        let manager = ModelManager::from_directory(dir.path(), None).unwrap();
        assert_eq!(manager.variant(), "fp16");

        let manager =
            ModelManager::from_directory(dir.path(), Some("quantized".to_string())).unwrap();
        assert!(manager.model_file_path().ends_with("model_quantized.onnx"));

        assert!(ModelManager::from_directory(dir.path(), Some("fp32".to_string())).is_err());
    }

    #[test]
    fn test_missing_assets() {
        let dir = TempDir::new().unwrap();
        assert!(ModelManager::from_directory(&dir.path().join("nope"), None).is_err());

        write_model_dir(dir.path(), &[]);
        let err = ModelManager::from_directory(dir.path(), None).unwrap_err();
        assert!(err.to_string().contains("No ONNX model files"));
    }

    #[test]
    fn test_invalid_preprocessor_config() {
        let dir = TempDir::new().unwrap();
        write_model_dir(dir.path(), &["model.onnx"]);
        fs::write(dir.path().join("preprocessor_config.json"), r#"{"size": {}}"#).unwrap();

        let manager = ModelManager::from_directory(dir.path(), None).unwrap();
        assert!(manager.get_preprocessing_config().is_err());
    }
}
