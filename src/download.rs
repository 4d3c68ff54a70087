//! Model downloading from `HuggingFace` repositories
//!
//! Files are streamed into a staging directory next to the cache and moved
//! into place only after every required file arrived.

use crate::cache::ModelCache;
use crate::error::{Result, ToolError};
use futures_util::stream::TryStreamExt;
#[cfg(feature = "cli")]
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;

const HUGGINGFACE_PREFIX: &str = "https://huggingface.co/";

/// Files that need to be downloaded for a `HuggingFace` model
const REQUIRED_FILES: &[&str] = &["config.json", "preprocessor_config.json"];

/// ONNX model files to attempt downloading
const ONNX_FILES: &[(&str, &str)] = &[
    ("onnx/model.onnx", "fp32"),
    ("onnx/model_fp16.onnx", "fp16"),
];

/// Model downloader with optional progress reporting
#[derive(Debug, Clone)]
pub struct ModelDownloader {
    client: Client,
    cache: ModelCache,
}

/// Progress bar abstraction that works with and without CLI features
#[derive(Debug)]
pub enum ProgressIndicator {
    #[cfg(feature = "cli")]
    Indicatif(ProgressBar),
    NoOp,
}

impl ProgressIndicator {
    fn set_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_message(msg),
            Self::NoOp => drop(msg),
        }
    }

    fn set_length(&self, len: u64) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_length(len),
            Self::NoOp => {},
        }
    }

    fn set_position(&self, pos: u64) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_position(pos),
            Self::NoOp => {},
        }
    }

    fn finish_with_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.finish_with_message(msg),
            Self::NoOp => drop(msg),
        }
    }
}

impl ModelDownloader {
    /// Create a downloader writing into `cache`
    pub fn new(cache: ModelCache) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(|e| ToolError::network_error("Failed to create HTTP client", e))?;

        Ok(Self { client, cache })
    }

    #[must_use]
    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    /// Download a model repository at `revision` into the cache
    ///
    /// Returns the model ID. An already cached model is not downloaded again.
    #[tracing::instrument(skip(self), fields(model_id))]
    pub async fn download_model(
        &self,
        url: &str,
        revision: &str,
        show_progress: bool,
    ) -> Result<String> {
        validate_model_url(url)?;
        let model_id = ModelCache::url_to_model_id(url);
        tracing::Span::current().record("model_id", model_id.as_str());

        if self.cache.is_model_cached(&model_id) {
            log::info!("Model already cached: {}", model_id);
            return Ok(model_id);
        }

        log::info!("Downloading model from: {} ({})", url, revision);
        let staging = self.create_staging_dir(&model_id)?;
        let staging_dir = staging.path().to_path_buf();
        let final_dir = self.cache.get_model_path(&model_id);

        let progress = if show_progress {
            Some(Self::create_progress_indicator())
        } else {
            None
        };

        match self
            .download_model_files(url, revision, &staging_dir, progress.as_ref())
            .await
        {
            Ok(()) => {
                if ModelCache::is_valid_model_dir(&final_dir) {
                    log::info!("Model {} was installed concurrently, keeping it", model_id);
                    return Ok(model_id);
                }
                if final_dir.exists() {
                    fs::remove_dir_all(&final_dir).map_err(|e| {
                        ToolError::file_io_error("remove stale model directory", &final_dir, &e)
                    })?;
                }
                fs::rename(&staging_dir, &final_dir).map_err(|e| {
                    ToolError::file_io_error("move downloaded model into cache", &final_dir, &e)
                })?;

                if let Some(pb) = progress {
                    pb.finish_with_message(format!("Downloaded {model_id}"));
                }
                log::info!("Successfully downloaded model: {}", model_id);
                Ok(model_id)
            },
            Err(e) => {
                if let Err(cleanup_err) = staging.close() {
                    log::warn!("Failed to clean up staging directory: {}", cleanup_err);
                }
                if let Some(pb) = progress {
                    pb.finish_with_message("Download failed".to_string());
                }
                Err(e)
            },
        }
    }

    /// Fresh staging directory inside the cache, removed again on drop
    fn create_staging_dir(&self, model_id: &str) -> Result<TempDir> {
        let cache_dir = self.cache.get_current_cache_dir();
        fs::create_dir_all(cache_dir)
            .map_err(|e| ToolError::file_io_error("create cache directory", cache_dir, &e))?;
        tempfile::Builder::new()
            .prefix(&format!(".download-{model_id}-"))
            .tempdir_in(cache_dir)
            .map_err(|e| ToolError::file_io_error("create staging directory", cache_dir, &e))
    }

    fn create_progress_indicator() -> ProgressIndicator {
        #[cfg(feature = "cli")]
        {
            let pb = ProgressBar::new(100);
            if let Ok(style) = ProgressStyle::default_bar().template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
            ) {
                pb.set_style(style.progress_chars("#>-"));
            }
            ProgressIndicator::Indicatif(pb)
        }
        #[cfg(not(feature = "cli"))]
        {
            ProgressIndicator::NoOp
        }
    }

    async fn download_model_files(
        &self,
        base_url: &str,
        revision: &str,
        download_dir: &Path,
        progress: Option<&ProgressIndicator>,
    ) -> Result<()> {
        let raw_base = format!("{}/resolve/{revision}/", base_url.trim_end_matches('/'));

        for file_name in REQUIRED_FILES {
            if let Some(pb) = progress {
                pb.set_message(format!("Downloading {file_name}"));
            }
            self.download_file(
                &format!("{raw_base}{file_name}"),
                &download_dir.join(file_name),
                progress,
            )
            .await?;
        }

        let mut downloaded_models = 0;
        for (file_path, variant) in ONNX_FILES {
            if let Some(pb) = progress {
                pb.set_message(format!("Downloading {variant} model"));
            }
            match self
                .download_file(
                    &format!("{raw_base}{file_path}"),
                    &download_dir.join(file_path),
                    progress,
                )
                .await
            {
                Ok(()) => {
                    downloaded_models += 1;
                    log::info!("Downloaded {} model variant", variant);
                },
                Err(e) => log::warn!("Failed to download {} variant: {}", variant, e),
            }
        }

        if downloaded_models == 0 {
            return Err(ToolError::network_error(
                "Failed to download any ONNX model variants",
                "no model files found",
            ));
        }
        Ok(())
    }

    async fn download_file(
        &self,
        url: &str,
        local_path: &Path,
        progress: Option<&ProgressIndicator>,
    ) -> Result<()> {
        log::debug!("Downloading: {} -> {}", url, local_path.display());

        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ToolError::file_io_error("create directory", parent, &e))?;
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ToolError::network_error(format!("Failed to download {url}"), e))?;

        if !response.status().is_success() {
            return Err(ToolError::network_error(
                format!("HTTP error {} for {url}", response.status()),
                "unexpected status",
            ));
        }

        let total_size = response.content_length();
        let mut file = tokio::fs::File::create(local_path)
            .await
            .map_err(|e| ToolError::file_io_error("create file", local_path, &e))?;

        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        let mut downloaded = 0u64;
        let mut buffer = vec![0; 8192];
        loop {
            let bytes_read = stream
                .read(&mut buffer)
                .await
                .map_err(|e| ToolError::network_error("Failed to read download stream", e))?;
            if bytes_read == 0 {
                break;
            }

            file.write_all(buffer.get(..bytes_read).unwrap_or(&[]))
                .await
                .map_err(|e| ToolError::file_io_error("write to file", local_path, &e))?;
            downloaded += bytes_read as u64;

            if let Some(pb) = progress {
                if let Some(total) = total_size {
                    pb.set_length(total);
                    pb.set_position(downloaded);
                }
            }
        }

        file.flush()
            .await
            .map_err(|e| ToolError::file_io_error("flush file", local_path, &e))?;
        log::debug!("Downloaded {} bytes to {}", downloaded, local_path.display());
        Ok(())
    }
}

/// Validate that a URL points at a `HuggingFace` repository (`user/repo`)
pub fn validate_model_url(url: &str) -> Result<()> {
    if url.is_empty() {
        return Err(ToolError::invalid_config("Model URL cannot be empty"));
    }

    let Some(repo_path) = url.strip_prefix(HUGGINGFACE_PREFIX) else {
        return Err(ToolError::invalid_config(format!(
            "Unsupported URL format: {url}. Only HuggingFace repositories are supported (https://huggingface.co/...)"
        )));
    };

    let mut parts = repo_path.trim_end_matches('/').split('/');
    match (parts.next(), parts.next()) {
        (Some(user), Some(repo)) if !user.is_empty() && !repo.is_empty() => Ok(()),
        _ => Err(ToolError::invalid_config(format!(
            "Invalid HuggingFace repository URL: {url}. Expected format: https://huggingface.co/username/repo-name"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_model_url() {
        assert!(validate_model_url("https://huggingface.co/imgly/isnet-general-onnx").is_ok());
        assert!(validate_model_url("https://huggingface.co/ZhengPeng7/BiRefNet/").is_ok());

        let err = validate_model_url("").unwrap_err();
        assert!(err.to_string().contains("cannot be empty"));

        for url in [
            "http://huggingface.co/user/repo",
            "https://github.com/user/repo",
            "https://huggingface.co/",
            "https://huggingface.co/onlyuser",
            "https://subdomain.huggingface.co/user/repo",
        ] {
            assert!(validate_model_url(url).is_err(), "{url} should be rejected");
        }
    }

    #[tokio::test]
    async fn test_cached_model_skips_download() {
        let temp = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp.path()).unwrap();
        let model_id = ModelCache::get_default_model_id();
        crate::models::tests::write_model_dir(&cache.get_model_path(&model_id), &["model.onnx"]);

        let downloader = ModelDownloader::new(cache).unwrap();
        let id = downloader
            .download_model(crate::config::DEFAULT_MODEL_URL, "main", false)
            .await
            .unwrap();
        assert_eq!(id, model_id);
    }

    #[tokio::test]
    async fn test_invalid_url_rejected_before_network() {
        let temp = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp.path()).unwrap();
        let downloader = ModelDownloader::new(cache).unwrap();
        assert!(downloader
            .download_model("https://example.com/model", "main", false)
            .await
            .is_err());
    }

    #[test]
    fn test_staging_dirs_are_unique_per_download() {
        let temp = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp.path()).unwrap();
        let downloader = ModelDownloader::new(cache.clone()).unwrap();

        let first = downloader.create_staging_dir("imgly--isnet-general-onnx").unwrap();
        let second = downloader.create_staging_dir("imgly--isnet-general-onnx").unwrap();
        assert_ne!(first.path(), second.path());
        assert!(first.path().starts_with(cache.get_current_cache_dir()));

        fs::write(first.path().join("config.json"), b"{}").unwrap();
        let first_path = first.path().to_path_buf();
        drop(first);
        assert!(!first_path.exists());
        assert!(second.path().is_dir());
    }
}
