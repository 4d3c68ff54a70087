//! Engine construction for CLI commands

use crate::cache::ModelCache;
use crate::config::{EngineKind, ToolsConfig};
use crate::engine::RemovalEngine;
use crate::removebg::RemoveBgEngine;
use crate::runtime::RuntimeLoader;
use anyhow::{Context, Result};
use std::sync::Arc;

/// Engine plus the runtime handle it was built on, if any
pub(crate) struct EngineSetup {
    pub(crate) engine: Arc<dyn RemovalEngine>,
    pub(crate) runtime: Option<Arc<RuntimeLoader>>,
}

pub(crate) struct EngineFactory;

impl EngineFactory {
    pub(crate) fn cache(config: &ToolsConfig) -> Result<ModelCache> {
        ModelCache::from_override(config.cache_dir.as_deref())
            .context("Failed to initialize model cache")
    }

    pub(crate) fn create(config: &ToolsConfig) -> Result<EngineSetup> {
        match config.removal.engine {
            EngineKind::Local => Self::create_local(config),
            EngineKind::RemoveBg => {
                if config.remove_bg_api_key.is_none() {
                    log::warn!(
                        "⚠️ {} is not set; remove.bg requests will fail",
                        crate::config::REMOVEBG_API_KEY_ENV
                    );
                }
                let engine = RemoveBgEngine::new(config.remove_bg_api_key.clone())
                    .context("Failed to create remove.bg client")?;
                Ok(EngineSetup {
                    engine: Arc::new(engine),
                    runtime: None,
                })
            },
        }
    }

    #[cfg(feature = "tract")]
    fn create_local(config: &ToolsConfig) -> Result<EngineSetup> {
        use crate::engine::LocalEngine;

        let cache = Self::cache(config)?;
        let runtime = Arc::new(
            RuntimeLoader::new(config.runtime.clone(), cache)
                .context("Failed to create runtime loader")?,
        );
        let engine = LocalEngine::new(Arc::clone(&runtime), config.removal.variant.clone());
        Ok(EngineSetup {
            engine: Arc::new(engine),
            runtime: Some(runtime),
        })
    }

    #[cfg(not(feature = "tract"))]
    fn create_local(_config: &ToolsConfig) -> Result<EngineSetup> {
        anyhow::bail!("The local engine needs the 'tract' feature. Use --engine remove-bg instead.")
    }
}
