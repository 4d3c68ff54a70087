//! Inference runtime loader
//!
//! The runtime (model graph plus its configuration files) comes from one of
//! two places: a bundled directory shipped next to the binary, or a one-time
//! background download of a pinned model repository into the cache.
//!
//! Loading never fails hard. When neither path produces the runtime within
//! the timeout the status is `Degraded` and the engine loads lazily on first
//! use instead.

use crate::cache::ModelCache;
use crate::config::RuntimeConfig;
use crate::download::ModelDownloader;
use crate::error::{Result, ToolError};
use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, OnceCell};

/// Lifecycle of the process-wide runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeState {
    Unloaded = 0,
    Loading = 1,
    Ready = 2,
    Failed = 3,
}

impl RuntimeState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Loading,
            2 => Self::Ready,
            3 => Self::Failed,
            _ => Self::Unloaded,
        }
    }

    /// Whether `self -> next` is allowed; states only move forward and Failed is terminal
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Unloaded, Self::Loading | Self::Ready | Self::Failed)
                | (Self::Loading, Self::Ready | Self::Failed)
        )
    }
}

/// Where the runtime was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeSource {
    Bundled,
    Downloaded,
}

/// A runtime that is ready to use
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeInfo {
    pub source: RuntimeSource,
    pub model_dir: PathBuf,
}

/// Result of `ensure_runtime`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RuntimeStatus {
    Ready(RuntimeInfo),
    /// Continue without a preloaded runtime
    Degraded { reason: String },
}

impl RuntimeStatus {
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

/// Progress of the background runtime download
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadState {
    Idle,
    Running,
    Finished,
    Failed,
}

/// Fetches the runtime from its remote location
#[async_trait]
pub trait RuntimeFetcher: Send + Sync {
    async fn fetch(&self, url: &str, revision: &str) -> Result<()>;
}

#[async_trait]
impl RuntimeFetcher for ModelDownloader {
    async fn fetch(&self, url: &str, revision: &str) -> Result<()> {
        self.download_model(url, revision, false).await.map(|_| ())
    }
}

/// Process-wide runtime handle
///
/// Created once and shared; concurrent `ensure_runtime` callers share a single
/// initialization and observe the same status.
pub struct RuntimeLoader {
    config: RuntimeConfig,
    cache: ModelCache,
    fetcher: Arc<dyn RuntimeFetcher>,
    state: AtomicU8,
    injected: AtomicBool,
    download: Arc<watch::Sender<DownloadState>>,
    foreground: Mutex<()>,
    outcome: OnceCell<RuntimeStatus>,
}

impl std::fmt::Debug for RuntimeLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeLoader")
            .field("state", &self.state())
            .field("download", &self.download_state())
            .finish_non_exhaustive()
    }
}

impl RuntimeLoader {
    /// Loader that downloads with `ModelDownloader` when nothing is bundled
    pub fn new(config: RuntimeConfig, cache: ModelCache) -> Result<Self> {
        let downloader = ModelDownloader::new(cache.clone())?;
        Ok(Self::with_fetcher(config, cache, Arc::new(downloader)))
    }

    #[must_use]
    pub fn with_fetcher(
        config: RuntimeConfig,
        cache: ModelCache,
        fetcher: Arc<dyn RuntimeFetcher>,
    ) -> Self {
        Self {
            config,
            cache,
            fetcher,
            state: AtomicU8::new(RuntimeState::Unloaded as u8),
            injected: AtomicBool::new(false),
            download: Arc::new(watch::channel(DownloadState::Idle).0),
            foreground: Mutex::new(()),
            outcome: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    #[must_use]
    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    #[must_use]
    pub fn state(&self) -> RuntimeState {
        RuntimeState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn download_state(&self) -> DownloadState {
        *self.download.borrow()
    }

    /// Status of a finished initialization, if any
    #[must_use]
    pub fn status(&self) -> Option<RuntimeStatus> {
        self.outcome.get().cloned()
    }

    /// Make the runtime available, waiting at most `timeout` for a download
    #[tracing::instrument(skip(self))]
    pub async fn ensure_runtime(&self, timeout: Duration) -> RuntimeStatus {
        self.outcome
            .get_or_init(|| self.initialize(timeout))
            .await
            .clone()
    }

    /// Model directory for lazy loading after `ensure_runtime`
    ///
    /// A background download that outlived the runtime timeout is awaited
    /// instead of being duplicated. A foreground fetch happens only when no
    /// download ran or the background one failed, and concurrent callers
    /// share it.
    pub async fn resolve_model_dir(&self) -> Result<PathBuf> {
        if let RuntimeStatus::Ready(info) = self.ensure_runtime(self.config.timeout()).await {
            return Ok(info.model_dir);
        }

        let model_dir = self.downloaded_model_dir();
        let mut updates = self.download.subscribe();
        let finished = updates
            .wait_for(|state| *state != DownloadState::Running)
            .await
            .map(|state| *state)
            .unwrap_or(DownloadState::Failed);
        if ModelCache::is_valid_model_dir(&model_dir) {
            log::debug!("Background runtime download finished ({:?})", finished);
            return Ok(model_dir);
        }

        let _guard = self.foreground.lock().await;
        if !ModelCache::is_valid_model_dir(&model_dir) {
            log::info!("Runtime degraded, downloading model on first use");
            self.fetcher
                .fetch(&self.config.model_url, &self.config.revision)
                .await?;
        }
        if ModelCache::is_valid_model_dir(&model_dir) {
            Ok(model_dir)
        } else {
            Err(ToolError::model(format!(
                "Model download did not produce a usable directory: {}",
                model_dir.display()
            )))
        }
    }

    fn advance(&self, next: RuntimeState) {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if !RuntimeState::from_u8(current).can_transition_to(next) {
                log::debug!(
                    "Ignoring runtime transition {:?} -> {:?}",
                    RuntimeState::from_u8(current),
                    next
                );
                return;
            }
            match self.state.compare_exchange(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    fn downloaded_model_dir(&self) -> PathBuf {
        self.cache
            .get_model_path(&ModelCache::url_to_model_id(&self.config.model_url))
    }

    async fn initialize(&self, timeout: Duration) -> RuntimeStatus {
        self.advance(RuntimeState::Loading);

        if let Some(bundled) = self.config.bundled_dir.as_ref() {
            if ModelCache::is_valid_model_dir(bundled) {
                log::info!("✅ Inference runtime bundled at {}", bundled.display());
                return self.ready(RuntimeSource::Bundled, bundled.clone());
            }
            log::debug!("No usable runtime in {}", bundled.display());
        }

        let model_dir = self.downloaded_model_dir();
        if ModelCache::is_valid_model_dir(&model_dir) {
            return self.ready(RuntimeSource::Downloaded, model_dir);
        }

        self.inject_once();

        let deadline = tokio::time::Instant::now() + timeout;
        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if ModelCache::is_valid_model_dir(&model_dir) {
                log::info!("✅ Inference runtime downloaded");
                return self.ready(RuntimeSource::Downloaded, model_dir);
            }
            if self.download_state() == DownloadState::Failed {
                return self.degraded("runtime download failed".to_string());
            }
            if tokio::time::Instant::now() >= deadline {
                return self.degraded(format!(
                    "runtime not available after {}ms",
                    timeout.as_millis()
                ));
            }
        }
    }

    /// Start the background download; later calls are no-ops
    fn inject_once(&self) {
        if self.injected.swap(true, Ordering::AcqRel) {
            return;
        }

        let fetcher = Arc::clone(&self.fetcher);
        let download = Arc::clone(&self.download);
        download.send_replace(DownloadState::Running);
        let url = self.config.model_url.clone();
        let revision = self.config.revision.clone();

        log::info!("📥 Fetching inference runtime from {} ({})", url, revision);
        tokio::spawn(async move {
            let state = match fetcher.fetch(&url, &revision).await {
                Ok(()) => DownloadState::Finished,
                Err(e) => {
                    log::warn!("Runtime download failed: {}", e);
                    DownloadState::Failed
                },
            };
            download.send_replace(state);
        });
    }

    fn ready(&self, source: RuntimeSource, model_dir: PathBuf) -> RuntimeStatus {
        self.advance(RuntimeState::Ready);
        RuntimeStatus::Ready(RuntimeInfo { source, model_dir })
    }

    fn degraded(&self, reason: String) -> RuntimeStatus {
        log::warn!("⚠️ Inference runtime unavailable ({}), continuing without it", reason);
        self.advance(RuntimeState::Failed);
        RuntimeStatus::Degraded { reason }
    }
}
