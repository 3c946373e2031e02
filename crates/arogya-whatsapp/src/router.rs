//! Webhook HTTP server.
//!
//! ```text
//! POST /webhook   WPPConnect event sink
//! GET  /health    liveness + open session count
//! ```

use std::sync::Arc;

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{handlers, inbox::Inbox};

/// Shared state injected into every handler.
pub struct AppState {
    pub inbox: Inbox,
    /// Expected `X-Webhook-Secret` value, when configured.
    pub webhook_secret: Option<String>,
    /// Events tagged with another WPPConnect session are dropped.
    pub wpp_session: String,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/webhook", post(handlers::webhook))
        .route("/health", get(handlers::health))
        .with_state(state)
}

/// Serve until `shutdown` is cancelled.
pub async fn serve(
    bind: &str,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("webhook bind failed on {bind}"))?;
    info!(%bind, "webhook server listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("webhook server error")?;

    info!("webhook server shut down");
    Ok(())
}
