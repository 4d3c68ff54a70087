#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # Studio Tools
//!
//! Image tools behind a small HTTP service and CLI: background removal with
//! background model preloading, QR code generation, image compression and
//! format conversion.
//!
//! ## Background removal
//!
//! A [`BackgroundRemover`] drives any [`RemovalEngine`]. The local engine runs
//! an ISNet segmentation model with Tract; the remove.bg engine calls the
//! hosted API.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use studio_tools::{
//!     BackgroundRemover, ImageBlob, LocalEngine, ModelCache, RemovalJob, RuntimeLoader,
//!     ToolsConfig,
//! };
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ToolsConfig::default();
//! let runtime = Arc::new(RuntimeLoader::new(config.runtime.clone(), ModelCache::new()?)?);
//! let remover = BackgroundRemover::new(Arc::new(LocalEngine::new(runtime, None)));
//!
//! let job = RemovalJob::new(ImageBlob::from_path("photo.jpg")?);
//! let result = remover.process(&job).await?;
//! std::fs::write(&result.download_name, &result.result.bytes)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Other tools
//!
//! ```rust,no_run
//! use studio_tools::{generate_qr_code, ImageBlob, ImageConverter, OutputFormat};
//!
//! # fn example() -> anyhow::Result<()> {
//! let qr = generate_qr_code("https://example.com")?;
//! assert!(qr.qr_code.starts_with("data:image/png;base64,"));
//!
//! let webp = ImageConverter::default()
//!     .convert(&ImageBlob::from_path("photo.png")?, OutputFormat::WebP)?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `tract` (default): local inference engine
//! - `server` (default): axum HTTP service
//! - `cli` (default): command-line interface and progress bars
//! - `webp-support` (default): WebP encoding and decoding
//! - `tracing-json`, `tracing-files`: extra log outputs for the CLI

pub mod backends;
pub mod cache;
#[cfg(feature = "cli")]
pub mod cli;
pub mod compress;
pub mod config;
pub mod convert;
pub mod download;
pub mod engine;
pub mod error;
pub mod inference;
pub mod models;
pub mod postprocess;
pub mod preload;
pub mod processor;
pub mod qr;
pub mod removebg;
pub mod remover;
pub mod runtime;
#[cfg(feature = "server")]
pub mod server;
pub mod services;
pub mod tracing_config;
pub mod types;
pub mod utils;

pub use backends::*;
pub use cache::{format_size, CachedModelInfo, ModelCache};
pub use compress::{CompressionOptions, CompressionResult, ImageCompressor};
pub use config::{EngineKind, MaxWidth, OutputFormat, ToolsConfig};
pub use convert::ImageConverter;
pub use download::{validate_model_url, ModelDownloader};
#[cfg(feature = "tract")]
pub use engine::LocalEngine;
pub use engine::{EngineOptions, RemovalEngine};
pub use error::{InferenceFailure, Result, ToolError};
pub use inference::InferenceBackend;
pub use models::ModelManager;
pub use postprocess::process_output_image;
pub use preload::{ModelPreloadState, ModelPreloader, PreloadOutcome, PreloadStatus};
pub use processor::BackgroundRemovalProcessor;
pub use qr::{generate_qr_code, QrCodeResponse, QrGenerator};
pub use removebg::RemoveBgEngine;
pub use remover::BackgroundRemover;
pub use runtime::{
    DownloadState, RuntimeFetcher, RuntimeInfo, RuntimeLoader, RuntimeState, RuntimeStatus,
};
pub use services::{
    ConsoleProgressReporter, NoOpProgressReporter, OutputFormatHandler, ProcessingStage,
    ProgressReporter, ProgressUpdate,
};
pub use types::{ImageBlob, ProcessingTimings, RemovalJob, RemovalResult, SegmentationMask};

#[cfg(feature = "cli")]
pub use tracing_config::init_cli_tracing;
pub use tracing_config::{spans, TracingConfig, TracingFormat, TracingOutput};

/// Read an upload from an async stream into an [`ImageBlob`]
///
/// ```rust,no_run
/// use studio_tools::read_upload;
///
/// # async fn example() -> anyhow::Result<()> {
/// let file = tokio::fs::File::open("photo.png").await?;
/// let blob = read_upload(file, "image/png", 10 * 1024 * 1024).await?;
/// # Ok(())
/// # }
/// ```
///
/// Reading stops one byte past `max_bytes` so oversized streams are rejected
/// without buffering them completely.
pub async fn read_upload<R: tokio::io::AsyncRead + Unpin>(
    reader: R,
    mime_type: &str,
    max_bytes: usize,
) -> Result<ImageBlob> {
    use tokio::io::AsyncReadExt;

    let mut buffer = Vec::new();
    reader
        .take(max_bytes as u64 + 1)
        .read_to_end(&mut buffer)
        .await
        .map_err(|e| ToolError::file_io_error("read upload", "<stream>", &e))?;
    utils::UploadValidator::validate_size(buffer.len(), max_bytes)?;
    Ok(ImageBlob::new(buffer, mime_type))
}
