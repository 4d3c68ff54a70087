//! Tracing subscriber configuration
//!
//! Library code only emits events; the binary decides where they go by
//! building a [`TracingConfig`] and calling `init` once at start-up.

#[cfg(feature = "cli")]
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable output with colors (default for the CLI)
    Console,
    /// Plain compact output for CI and containers
    Compact,
    #[cfg(feature = "tracing-json")]
    Json,
}

/// Where log lines are written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TracingOutput {
    Console,
    #[cfg(feature = "tracing-files")]
    File(std::path::PathBuf),
    /// Console plus a daily rolling file
    #[cfg(feature = "tracing-files")]
    Both(std::path::PathBuf),
}

/// Keeps the non-blocking file writer alive; flushes on drop
#[derive(Debug, Default)]
#[must_use = "dropping the guard stops file logging"]
pub struct TracingGuard {
    #[cfg(feature = "tracing-files")]
    _file: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Tracing configuration builder
#[derive(Debug)]
pub struct TracingConfig {
    pub verbosity: u8,
    pub format: TracingFormat,
    pub output: TracingOutput,
    /// Overrides `verbosity` when set (same syntax as `RUST_LOG`)
    pub env_filter: Option<String>,
    pub session_id: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            verbosity: 0,
            format: TracingFormat::Console,
            output: TracingOutput::Console,
            env_filter: None,
            session_id: None,
        }
    }
}

impl TracingConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_output(mut self, output: TracingOutput) -> Self {
        self.output = output;
        self
    }

    #[must_use]
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    #[must_use]
    pub fn with_session_id<S: Into<String>>(mut self, session_id: S) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Filter directive for the verbosity level
    ///
    /// Dependencies stay at `warn` until `-vvv` so HTTP client and model
    /// loader chatter does not drown the service's own events.
    #[must_use]
    pub fn verbosity_to_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "warn,studio_tools=info",
            1 => "warn,studio_tools=debug,tower_http=debug",
            2 => "warn,studio_tools=trace,tower_http=trace",
            _ => "trace",
        }
    }

    /// Install the global subscriber
    #[cfg(feature = "cli")]
    pub fn init(self) -> anyhow::Result<TracingGuard> {
        use tracing_subscriber::fmt;

        let filter = match &self.env_filter {
            Some(env_filter) => EnvFilter::try_new(env_filter)?,
            None => EnvFilter::try_new(self.verbosity_to_filter())?,
        };
        let registry = Registry::default().with(filter);
        #[allow(unused_mut)]
        let mut guard = TracingGuard::default();

        match (&self.format, &self.output) {
            (TracingFormat::Console, TracingOutput::Console) => {
                let fmt_layer = fmt::layer()
                    .with_ansi(true)
                    .with_target(false)
                    .with_level(true)
                    .compact();
                registry.with(fmt_layer).try_init()?;
            },

            (TracingFormat::Compact, TracingOutput::Console) => {
                let fmt_layer = fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .compact();
                registry.with(fmt_layer).try_init()?;
            },

            #[cfg(feature = "tracing-json")]
            (TracingFormat::Json, TracingOutput::Console) => {
                let fmt_layer = fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true);
                registry.with(fmt_layer).try_init()?;
            },

            #[cfg(feature = "tracing-files")]
            (format, TracingOutput::File(path)) => {
                use tracing_appender::{non_blocking, rolling};

                let file_appender = rolling::never(
                    path.parent().unwrap_or_else(|| std::path::Path::new(".")),
                    path.file_name()
                        .unwrap_or_else(|| std::ffi::OsStr::new("studio-tools.log")),
                );
                let (file_writer, file_guard) = non_blocking(file_appender);
                guard._file = Some(file_guard);

                match format {
                    TracingFormat::Console | TracingFormat::Compact => {
                        let fmt_layer = fmt::layer()
                            .with_ansi(false)
                            .with_writer(file_writer)
                            .compact();
                        registry.with(fmt_layer).try_init()?;
                    },
                    #[cfg(feature = "tracing-json")]
                    TracingFormat::Json => {
                        let fmt_layer = fmt::layer()
                            .json()
                            .with_writer(file_writer)
                            .with_current_span(true);
                        registry.with(fmt_layer).try_init()?;
                    },
                }
            },

            #[cfg(feature = "tracing-files")]
            (format, TracingOutput::Both(path)) => {
                use tracing_appender::{non_blocking, rolling};

                let file_appender = rolling::daily(
                    path.parent().unwrap_or_else(|| std::path::Path::new(".")),
                    path.file_stem()
                        .unwrap_or_else(|| std::ffi::OsStr::new("studio-tools")),
                );
                let (file_writer, file_guard) = non_blocking(file_appender);
                guard._file = Some(file_guard);

                let file_layer = fmt::layer()
                    .with_ansi(false)
                    .with_writer(file_writer)
                    .compact();
                let console_layer = fmt::layer()
                    .with_ansi(*format == TracingFormat::Console)
                    .with_target(false)
                    .compact();
                registry.with(console_layer).with(file_layer).try_init()?;
            },
        }

        if let Some(session_id) = &self.session_id {
            tracing::info!(session_id = %session_id, "🚀 Studio tools session started");
        }

        Ok(guard)
    }
}

/// Console tracing with a fresh session ID, as used by every CLI command
#[cfg(feature = "cli")]
pub fn init_cli_tracing(verbosity: u8) -> anyhow::Result<TracingGuard> {
    TracingConfig::new()
        .with_verbosity(verbosity)
        .with_session_id(uuid::Uuid::new_v4().to_string())
        .init()
}

/// Span helpers shared by the server and the CLI
pub mod spans {
    use tracing::{Level, Span};

    /// One HTTP tool request
    pub fn request(request_id: &str, tool: &str) -> Span {
        tracing::span!(
            Level::INFO,
            "request",
            request_id = %request_id,
            tool = %tool
        )
    }

    /// One CLI job on a single file
    pub fn file_processing(file_path: &std::path::Path, tool: &str) -> Span {
        tracing::span!(
            Level::INFO,
            "file_processing",
            file_path = %file_path.display(),
            tool = %tool
        )
    }
}
