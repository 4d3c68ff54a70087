//! HTTP service exposing the tools under `/api`

pub mod handlers;
pub mod response;

pub use response::{status_for, ErrorBody};

use crate::config::{ImageToolDefaults, RemovalDefaults, ServerConfig};
use crate::error::Result;
use crate::preload::ModelPreloader;
use crate::remover::BackgroundRemover;
use crate::runtime::RuntimeLoader;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub remover: Arc<BackgroundRemover>,
    pub runtime: Option<Arc<RuntimeLoader>>,
    pub preloader: Option<Arc<ModelPreloader>>,
    pub defaults: RemovalDefaults,
    pub image_tools: ImageToolDefaults,
}

impl AppState {
    #[must_use]
    pub fn new(remover: Arc<BackgroundRemover>) -> Self {
        Self {
            remover,
            runtime: None,
            preloader: None,
            defaults: RemovalDefaults::default(),
            image_tools: ImageToolDefaults::default(),
        }
    }

    #[must_use]
    pub fn with_runtime(mut self, runtime: Arc<RuntimeLoader>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    #[must_use]
    pub fn with_preloader(mut self, preloader: Arc<ModelPreloader>) -> Self {
        self.preloader = Some(preloader);
        self
    }

    #[must_use]
    pub fn with_defaults(mut self, defaults: RemovalDefaults, image_tools: ImageToolDefaults) -> Self {
        self.defaults = defaults;
        self.image_tools = image_tools;
        self
    }
}

/// Build the router with all routes
pub fn build_router(state: AppState, body_limit_bytes: usize) -> Router {
    Router::new()
        .route(
            "/api/qr-code",
            post(handlers::create_qr_code).get(handlers::qr_code_method_not_allowed),
        )
        .route("/api/remove-background", post(handlers::remove_background))
        .route("/api/compress-image", post(handlers::compress_image))
        .route("/api/convert-image", post(handlers::convert_image))
        .route("/api/status", get(handlers::status))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(DefaultBodyLimit::max(body_limit_bytes)),
        )
        .with_state(state)
}

/// Bind and serve until Ctrl-C
pub async fn serve(config: &ServerConfig, state: AppState) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let app = build_router(state, config.body_limit_bytes);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| crate::error::ToolError::file_io_error("bind", &addr, &e))?;
    log::info!("🌐 Studio tools listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
