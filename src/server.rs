//! HTTP server
//!
//! Composes the dispatcher, the policy chain and response compression into one
//! router and serves it. Compression wraps the chain, so error-sink responses
//! are compressed like dispatched ones.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{middleware, Router};
use thiserror::Error;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{Hs256Verifier, TokenVerifier};
use crate::config::AppConfig;
use crate::error::ErrorSink;
use crate::pipeline::{drive, PolicyChain};
use crate::routes;

/// Errors that stop the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared state for route handlers and auth middleware.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub verifier: Arc<dyn TokenVerifier>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// State with an HS256 verifier keyed by the configured secret.
    pub fn new(config: Arc<AppConfig>) -> Self {
        let verifier = Arc::new(Hs256Verifier::from_config(&config.auth));
        Self { config, verifier }
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn TokenVerifier>) -> Self {
        self.verifier = verifier;
        self
    }
}

/// The full application with the standard policy chain.
pub fn build_app(state: AppState) -> Router {
    let chain = PolicyChain::standard(state.config.clone(), ErrorSink::default());
    build_app_with_chain(state, chain)
}

/// The full application with a caller-built policy chain.
pub fn build_app_with_chain(state: AppState, chain: PolicyChain) -> Router {
    routes::dispatcher(&state)
        .into_router()
        .with_state(state)
        .layer(middleware::from_fn_with_state(Arc::new(chain), drive))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
}

/// Bind the configured address and serve until Ctrl-C.
pub async fn serve(config: AppConfig) -> Result<(), ServerError> {
    let addr = config.server.socket_addr();
    let mode = config.mode;
    let app = build_app(AppState::new(Arc::new(config)));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;
    tracing::info!(addr = %addr, mode = %mode, "Listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received, draining connections");
}
