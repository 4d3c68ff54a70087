//! Background model preloading
//!
//! Shortly after start-up the preloader asks the engine to load its model so
//! the first real request does not pay for it. Preloading is best effort:
//! after the last failed attempt a warning is published and the engine simply
//! loads on first use.

use crate::config::PreloadConfig;
use crate::engine::RemovalEngine;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Warning published when an attempt ran into its timeout
pub const SLOW_CONNECTION_WARNING: &str = "Slow connection. The model will load on first use.";

/// Warning published for every other preload failure
pub const PRELOAD_FAILED_WARNING: &str = "Unable to preload the model. It will load on first use.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PreloadStatus {
    Idle,
    Loading,
    Ready,
    Failed,
}

/// Snapshot of the preloader, published on every transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelPreloadState {
    /// Attempt in progress or last finished attempt, 0 before the first one
    pub attempt: u32,
    pub status: PreloadStatus,
    pub last_error: Option<String>,
    /// Non-blocking user-facing warning after the final failure
    pub warning: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Default for ModelPreloadState {
    fn default() -> Self {
        Self {
            attempt: 0,
            status: PreloadStatus::Idle,
            last_error: None,
            warning: None,
            updated_at: Utc::now(),
        }
    }
}

/// Final result of `ModelPreloader::run`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreloadOutcome {
    Ready,
    Degraded { warning: String },
}

enum AttemptError {
    TimedOut,
    Failed(String),
}

/// Retries `RemovalEngine::preload` with a per-attempt timeout
pub struct ModelPreloader {
    config: PreloadConfig,
    engine: Arc<dyn RemovalEngine>,
    state: watch::Sender<ModelPreloadState>,
}

impl std::fmt::Debug for ModelPreloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelPreloader")
            .field("engine", &self.engine.name())
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl ModelPreloader {
    #[must_use]
    pub fn new(config: PreloadConfig, engine: Arc<dyn RemovalEngine>) -> Self {
        let (state, _) = watch::channel(ModelPreloadState::default());
        Self {
            config,
            engine,
            state,
        }
    }

    #[must_use]
    pub fn state(&self) -> ModelPreloadState {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ModelPreloadState> {
        self.state.subscribe()
    }

    /// Wait for the start delay, then run all attempts in the background
    pub fn spawn(self: Arc<Self>) -> JoinHandle<PreloadOutcome> {
        tokio::spawn(async move {
            tokio::time::sleep(self.config.start_delay()).await;
            self.run().await
        })
    }

    /// Run up to `max_attempts` preload attempts
    #[tracing::instrument(skip(self), fields(engine = self.engine.name()))]
    pub async fn run(&self) -> PreloadOutcome {
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_timed_out = false;

        for attempt in 1..=max_attempts {
            self.publish(|s| {
                s.attempt = attempt;
                s.status = PreloadStatus::Loading;
            });
            log::info!("🔄 Preloading model (attempt {}/{})", attempt, max_attempts);

            match self.attempt().await {
                Ok(()) => {
                    log::info!("✅ Model preloaded");
                    self.publish(|s| {
                        s.status = PreloadStatus::Ready;
                        s.last_error = None;
                    });
                    return PreloadOutcome::Ready;
                },
                Err(error) => {
                    let message = match &error {
                        AttemptError::TimedOut => format!(
                            "Preload timed out after {}s",
                            self.config.attempt_timeout().as_secs()
                        ),
                        AttemptError::Failed(message) => message.clone(),
                    };
                    last_timed_out = matches!(error, AttemptError::TimedOut);
                    log::warn!("Preload attempt {} failed: {}", attempt, message);
                    self.publish(|s| s.last_error = Some(message));
                },
            }

            if attempt < max_attempts {
                tokio::time::sleep(self.config.retry_delay()).await;
            }
        }

        let warning = if last_timed_out {
            SLOW_CONNECTION_WARNING
        } else {
            PRELOAD_FAILED_WARNING
        };
        log::warn!("⚠️ {}", warning);
        self.publish(|s| {
            s.status = PreloadStatus::Failed;
            s.warning = Some(warning.to_string());
        });
        PreloadOutcome::Degraded {
            warning: warning.to_string(),
        }
    }

    /// One attempt; the load task is left running when the timer wins
    async fn attempt(&self) -> Result<(), AttemptError> {
        let engine = Arc::clone(&self.engine);
        let load = tokio::spawn(async move { engine.preload().await });

        tokio::select! {
            joined = load => match joined {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(AttemptError::Failed(e.to_string())),
                Err(e) => Err(AttemptError::Failed(format!("Preload task failed: {e}"))),
            },
            () = tokio::time::sleep(self.config.attempt_timeout()) => Err(AttemptError::TimedOut),
        }
    }

    fn publish(&self, update: impl FnOnce(&mut ModelPreloadState)) {
        self.state.send_modify(|state| {
            update(state);
            state.updated_at = Utc::now();
        });
    }
}
