//! HTTP surface: OAuth callback, import trigger, progress stream.

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::cookies::CookieCodec;
use crate::jobs::ImportJobs;
use crate::kv::KvStore;
use crate::notion::NotionConnector;
use crate::oauth::TokenExchange;
use crate::updates::UpdateHub;

pub mod error;
pub mod handlers;

pub use error::Error;

/// Shared state threaded through all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn KvStore>,
    pub connector: Arc<dyn NotionConnector>,
    pub oauth: Arc<dyn TokenExchange>,
    pub cookies: CookieCodec,
    pub updates: UpdateHub,
    pub jobs: ImportJobs,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/", get(handlers::home))
        .route("/auth/notion/callback", get(handlers::callback))
        .route("/import", post(handlers::start_import))
        .route("/api/events", get(handlers::events))
        .route("/api/import/status", get(handlers::import_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: AppState) -> Result<()> {
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutting down"),
        Err(err) => {
            tracing::warn!(?err, "cannot listen for ctrl-c; running until killed");
            std::future::pending::<()>().await;
        }
    }
}
