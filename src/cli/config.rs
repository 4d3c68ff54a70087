//! Resolve the effective configuration for a CLI invocation
//!
//! Precedence, lowest first: built-in defaults, `--config` JSON file,
//! environment variables, command-line flags.

use super::main_impl::{Cli, Command};
use crate::config::{MaxWidth, ToolsConfig, ToolsConfigBuilder};
use anyhow::{Context, Result};

pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    pub(crate) fn from_cli(cli: &Cli) -> Result<ToolsConfig> {
        Self::resolve(cli, |key| std::env::var(key).ok())
    }

    /// Same as `from_cli` with an injectable environment
    pub(crate) fn resolve<F>(cli: &Cli, env: F) -> Result<ToolsConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base = match &cli.config {
            Some(path) => ToolsConfig::from_file(path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            None => ToolsConfig::default(),
        };
        let base = base.with_env_from(env);

        let mut builder = ToolsConfigBuilder::from_config(base);
        if let Some(dir) = &cli.cache_dir {
            builder = builder.cache_dir(dir);
        }

        match &cli.command {
            Command::Serve(args) => {
                if let Some(host) = &args.host {
                    builder = builder.host(host);
                }
                if let Some(port) = args.port {
                    builder = builder.port(port);
                }
                if let Some(engine) = args.engine {
                    builder = builder.engine(engine);
                }
                if let Some(dir) = &args.bundled_dir {
                    builder = builder.bundled_dir(dir);
                }
                if args.no_preload {
                    builder = builder.preload_enabled(false);
                }
            },
            Command::Remove(args) => {
                if let Some(engine) = args.engine {
                    builder = builder.engine(engine);
                }
                if let Some(format) = args.format {
                    builder = builder.output_format(format);
                }
                if let Some(max_width) = args.max_width {
                    builder = builder.max_width(MaxWidth::Pixels(max_width));
                }
                if let Some(variant) = &args.variant {
                    builder = builder.variant(variant);
                }
            },
            Command::Compress(args) => {
                if let Some(quality) = args.quality {
                    builder = builder.compress_quality(quality);
                }
            },
            Command::Convert(args) => {
                if let Some(quality) = args.quality {
                    builder = builder.convert_quality(quality);
                }
            },
            Command::Preload(args) => {
                if let Some(engine) = args.engine {
                    builder = builder.engine(engine);
                }
            },
            Command::DownloadModel(args) => {
                if let Some(url) = &args.url {
                    builder = builder.model_url(url);
                }
            },
            Command::Qr(_) | Command::ListModels | Command::ClearCache(_) => {},
        }

        builder.build().context("Invalid configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineKind, OutputFormat, REMOVEBG_API_KEY_ENV};
    use clap::Parser;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("studio-tools").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_flags_override_file_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tools.json");
        std::fs::write(
            &path,
            r#"{"server": {"port": 8080, "host": "0.0.0.0"}, "cache_dir": "/from/file"}"#,
        )
        .unwrap();

        let cli = parse(&[
            "--config",
            path.to_str().unwrap(),
            "serve",
            "--port",
            "9090",
            "--no-preload",
        ]);
        let config = CliConfigBuilder::resolve(&cli, |key| match key {
            "STUDIO_TOOLS_CACHE_DIR" => Some("/from/env".to_string()),
            _ => None,
        })
        .unwrap();

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.cache_dir.unwrap().to_str(), Some("/from/env"));
        assert!(!config.preload.enabled);
    }

    #[test]
    fn test_remove_flags() {
        let cli = parse(&[
            "remove",
            "photo.jpg",
            "--format",
            "jpg",
            "--max-width",
            "1000",
            "--engine",
            "remove-bg",
        ]);
        let config = CliConfigBuilder::resolve(&cli, |key| {
            (key == REMOVEBG_API_KEY_ENV).then(|| "secret".to_string())
        })
        .unwrap();

        assert_eq!(config.removal.output_format, OutputFormat::Jpeg);
        assert_eq!(config.removal.max_width, Some(1000));
        assert_eq!(config.removal.engine, EngineKind::RemoveBg);
        assert_eq!(config.remove_bg_api_key.as_deref(), Some("secret"));
    }

    #[test]
    fn test_invalid_quality_is_rejected() {
        let cli = parse(&["compress", "photo.jpg", "--quality", "0"]);
        assert!(CliConfigBuilder::resolve(&cli, |_| None).is_err());
    }
}
