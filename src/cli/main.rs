//! Studio tools command-line interface

use super::backend_factory::EngineFactory;
use super::config::CliConfigBuilder;
use crate::cache::format_size;
use crate::compress::{CompressionOptions, ImageCompressor};
use crate::config::{EngineKind, MaxWidth, OutputFormat, ToolsConfig};
use crate::convert::ImageConverter;
use crate::download::ModelDownloader;
use crate::preload::{ModelPreloader, PreloadOutcome};
use crate::qr::{generate_qr_code, QrGenerator};
use crate::remover::BackgroundRemover;
use crate::runtime::RuntimeStatus;
use crate::server::{self, AppState};
use crate::services::{ConsoleProgressReporter, EncodeOptions, OutputFormatHandler};
use crate::tracing_config::{init_cli_tracing, spans};
use crate::types::{ImageBlob, RemovalJob};
use crate::utils::validate_qr_url;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use image::DynamicImage;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::Instrument;

/// Creative tools: background removal, QR codes, compression and conversion
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "studio-tools")]
pub struct Cli {
    /// Verbose logging (-v: debug, -vv: trace for this crate, -vvv: everything)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// JSON configuration file
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Model cache directory [env: STUDIO_TOOLS_CACHE_DIR]
    #[arg(long, value_name = "PATH", global = true)]
    pub cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP service
    Serve(ServeArgs),
    /// Remove the background from an image
    Remove(RemoveArgs),
    /// Generate a QR code for a URL
    Qr(QrArgs),
    /// Compress an image
    Compress(CompressArgs),
    /// Convert an image to another format
    Convert(ConvertArgs),
    /// Load the background removal model once and report the outcome
    Preload(PreloadArgs),
    /// Download the model into the cache
    DownloadModel(DownloadArgs),
    /// List cached models
    ListModels,
    /// Remove a model from the cache
    ClearCache(ClearCacheArgs),
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    #[arg(long)]
    pub host: Option<String>,
    #[arg(short, long)]
    pub port: Option<u16>,
    /// Background removal engine (local, remove-bg)
    #[arg(long)]
    pub engine: Option<EngineKind>,
    /// Directory holding a bundled model
    #[arg(long, value_name = "PATH")]
    pub bundled_dir: Option<PathBuf>,
    /// Skip the background model preload
    #[arg(long)]
    pub no_preload: bool,
}

#[derive(Args, Debug)]
pub struct RemoveArgs {
    pub input: PathBuf,
    /// Output file ("-" for stdout) [default: next to the input]
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Output format (png, jpg, webp, bmp, gif, ico)
    #[arg(short, long)]
    pub format: Option<OutputFormat>,
    /// Downscale wider results to this width
    #[arg(long)]
    pub max_width: Option<u32>,
    #[arg(long)]
    pub engine: Option<EngineKind>,
    /// Model variant (fp16, fp32)
    #[arg(long)]
    pub variant: Option<String>,
}

#[derive(Args, Debug)]
pub struct QrArgs {
    pub url: String,
    /// Write the PNG here instead of printing the JSON response
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct CompressArgs {
    pub input: PathBuf,
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// JPEG quality (1-100)
    #[arg(short, long)]
    pub quality: Option<u8>,
    /// Longest side after resizing
    #[arg(long)]
    pub max_dimension: Option<u32>,
}

#[derive(Args, Debug)]
pub struct ConvertArgs {
    pub input: PathBuf,
    /// Target format (png, jpg, webp, bmp, gif, ico)
    #[arg(short, long)]
    pub format: OutputFormat,
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// JPEG quality (1-100)
    #[arg(short, long)]
    pub quality: Option<u8>,
}

#[derive(Args, Debug)]
pub struct PreloadArgs {
    #[arg(long)]
    pub engine: Option<EngineKind>,
}

#[derive(Args, Debug)]
pub struct DownloadArgs {
    /// Model repository URL [default: the pinned isnet model]
    #[arg(long)]
    pub url: Option<String>,
}

#[derive(Args, Debug)]
pub struct ClearCacheArgs {
    pub model_id: String,
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _tracing = init_cli_tracing(cli.verbose).context("Failed to initialize tracing")?;
    let config = CliConfigBuilder::from_cli(&cli)?;

    match &cli.command {
        Command::Serve(_) => serve(&config).await,
        Command::Remove(args) => remove(&config, args, cli.verbose).await,
        Command::Qr(args) => qr(args),
        Command::Compress(args) => compress(&config, args),
        Command::Convert(args) => convert(&config, args),
        Command::Preload(_) => preload(&config).await,
        Command::DownloadModel(_) => download_model(&config).await,
        Command::ListModels => list_models(&config),
        Command::ClearCache(args) => clear_cache(&config, &args.model_id),
    }
}

async fn serve(config: &ToolsConfig) -> Result<()> {
    let setup = EngineFactory::create(config)?;
    log::info!("🚀 Starting studio tools with the {} engine", setup.engine.name());

    let remover = BackgroundRemover::new(Arc::clone(&setup.engine))
        .with_reporter(Arc::new(ConsoleProgressReporter::new(false)));
    let mut state = AppState::new(Arc::new(remover))
        .with_defaults(config.removal.clone(), config.image_tools.clone());

    if let Some(runtime) = &setup.runtime {
        state = state.with_runtime(Arc::clone(runtime));
        let runtime = Arc::clone(runtime);
        let timeout = config.runtime.timeout();
        tokio::spawn(async move {
            runtime.ensure_runtime(timeout).await;
        });
    }

    if config.preload.enabled {
        let preloader = Arc::new(ModelPreloader::new(
            config.preload.clone(),
            Arc::clone(&setup.engine),
        ));
        state = state.with_preloader(Arc::clone(&preloader));
        // Detached; the outcome is visible through /api/status
        let _preload = preloader.spawn();
    }

    server::serve(&config.server, state)
        .await
        .context("HTTP server failed")
}

async fn remove(config: &ToolsConfig, args: &RemoveArgs, verbose: u8) -> Result<()> {
    let setup = EngineFactory::create(config)?;
    let remover = BackgroundRemover::new(setup.engine)
        .with_reporter(Arc::new(ConsoleProgressReporter::new(verbose > 0)));

    let input = ImageBlob::from_path(&args.input)
        .with_context(|| format!("Failed to read {}", args.input.display()))?;
    let job = RemovalJob::new(input)
        .output_format(config.removal.output_format)
        .max_width(MaxWidth::from(config.removal.max_width));

    let result = remover
        .process(&job)
        .instrument(spans::file_processing(&args.input, "remove"))
        .await
        .with_context(|| format!("Failed to process {}", args.input.display()))?;

    let output = output_path(&args.input, args.output.as_deref(), &result.download_name);
    write_output(&output, &result.result.bytes)?;
    if output != Path::new("-") {
        println!(
            "✅ {} → {} ({} → {})",
            args.input.display(),
            output.display(),
            format_size(result.original_size as u64),
            format_size(result.result_size as u64)
        );
    }
    Ok(())
}

fn qr(args: &QrArgs) -> Result<()> {
    let url = validate_qr_url(Some(&serde_json::Value::String(args.url.clone())))?;

    match &args.output {
        Some(output) => {
            let bitmap = QrGenerator::new().render(&url)?;
            let png = OutputFormatHandler::encode(
                &DynamicImage::ImageLuma8(bitmap),
                OutputFormat::Png,
                EncodeOptions::default(),
            )?;
            write_output(output, &png)?;
            if output != Path::new("-") {
                println!("✅ QR code written to {}", output.display());
            }
        },
        None => {
            let response = generate_qr_code(&url)?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        },
    }
    Ok(())
}

fn compress(config: &ToolsConfig, args: &CompressArgs) -> Result<()> {
    let mut options = CompressionOptions::from(&config.image_tools);
    if let Some(max_dimension) = args.max_dimension {
        options = options.max_dimension(max_dimension);
    }
    let compressor = ImageCompressor::new(options)?;

    let input = ImageBlob::from_path(&args.input)
        .with_context(|| format!("Failed to read {}", args.input.display()))?;
    let _span = spans::file_processing(&args.input, "compress").entered();
    let result = compressor.compress(&input)?;

    let output = output_path(&args.input, args.output.as_deref(), &result.download_name);
    write_output(&output, &result.result.bytes)?;
    if output != Path::new("-") {
        println!(
            "✅ {} → {} ({} → {}, {:.1}% smaller)",
            args.input.display(),
            output.display(),
            format_size(result.original_size as u64),
            format_size(result.compressed_size as u64),
            result.ratio
        );
    }
    Ok(())
}

fn convert(config: &ToolsConfig, args: &ConvertArgs) -> Result<()> {
    let converter = ImageConverter::new(config.image_tools.convert_quality)?;
    let input = ImageBlob::from_path(&args.input)
        .with_context(|| format!("Failed to read {}", args.input.display()))?;
    let _span = spans::file_processing(&args.input, "convert").entered();
    let result = converter.convert(&input, args.format)?;

    let name = result
        .file_name
        .clone()
        .unwrap_or_else(|| format!("converted.{}", args.format.extension()));
    let output = output_path(&args.input, args.output.as_deref(), &name);
    write_output(&output, &result.bytes)?;
    if output != Path::new("-") {
        println!("✅ {} → {}", args.input.display(), output.display());
    }
    Ok(())
}

async fn preload(config: &ToolsConfig) -> Result<()> {
    let setup = EngineFactory::create(config)?;

    if let Some(runtime) = &setup.runtime {
        match runtime.ensure_runtime(config.runtime.timeout()).await {
            RuntimeStatus::Ready(info) => {
                println!("📦 Runtime ready ({:?}): {}", info.source, info.model_dir.display());
            },
            RuntimeStatus::Degraded { reason } => {
                println!("⚠️ Runtime degraded: {reason}");
            },
        }
    }

    let preloader = ModelPreloader::new(config.preload.clone(), setup.engine);
    match preloader.run().await {
        PreloadOutcome::Ready => println!("✅ Model preloaded"),
        PreloadOutcome::Degraded { warning } => println!("⚠️ {warning}"),
    }
    Ok(())
}

async fn download_model(config: &ToolsConfig) -> Result<()> {
    let cache = EngineFactory::cache(config)?;
    let downloader = ModelDownloader::new(cache).context("Failed to create model downloader")?;

    println!("📦 Downloading model from: {}", config.runtime.model_url);
    let model_id = downloader
        .download_model(&config.runtime.model_url, &config.runtime.revision, true)
        .await
        .context("Failed to download model")?;

    println!("✅ Model ID: {model_id}");
    println!(
        "   Cache location: {}",
        downloader.cache().get_model_path(&model_id).display()
    );
    Ok(())
}

fn list_models(config: &ToolsConfig) -> Result<()> {
    let cache = EngineFactory::cache(config)?;
    let models = cache
        .scan_cached_models()
        .context("Failed to list cached models")?;

    println!("📦 Cached models in {}", cache.get_current_cache_dir().display());
    if models.is_empty() {
        println!("No cached models found.");
        println!("\n💡 To download the default model: studio-tools download-model");
        return Ok(());
    }

    for model in models {
        println!("📁 {}", model.model_id);
        println!("  └─ Variants: {}", model.variants.join(", "));
        println!("  └─ Size: {}", format_size(model.size_bytes));
    }
    Ok(())
}

fn clear_cache(config: &ToolsConfig, model_id: &str) -> Result<()> {
    let cache = EngineFactory::cache(config)?;
    if cache.clear_specific_model(model_id)? {
        println!("✅ Removed model: {model_id}");
    } else {
        println!("⚠️ Model '{model_id}' not found in cache");
    }
    Ok(())
}

/// Explicit output, else `name` next to the input
fn output_path(input: &Path, output: Option<&Path>, name: &str) -> PathBuf {
    match output {
        Some(output) => output.to_path_buf(),
        None => input.with_file_name(name),
    }
}

fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    if path == Path::new("-") {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(bytes).context("Failed to write to stdout")?;
        return stdout.flush().context("Failed to flush stdout");
    }
    std::fs::write(path, bytes).with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_path() {
        let input = Path::new("/photos/cat.jpg");
        assert_eq!(
            output_path(input, None, "cat-transparent.png"),
            PathBuf::from("/photos/cat-transparent.png")
        );
        assert_eq!(
            output_path(input, Some(Path::new("out.png")), "ignored"),
            PathBuf::from("out.png")
        );
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["studio-tools", "-v", "convert", "a.png", "-f", "webp"]).unwrap();
        assert_eq!(cli.verbose, 1);
        assert!(matches!(
            cli.command,
            Command::Convert(ConvertArgs {
                format: OutputFormat::WebP,
                ..
            })
        ));

        assert!(Cli::try_parse_from(["studio-tools", "convert", "a.png", "-f", "tiff"]).is_err());
    }
}
