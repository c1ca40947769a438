//! HTTP server lifecycle management.
//!
//! Provides [`start_server`], which binds the configured address and serves
//! until `Ctrl-C`, and [`serve`], which runs on an already-bound listener
//! until the [`AppState`] shutdown signal flips. On shutdown, open push
//! connections are sent a close frame and in-flight requests finish.

use std::net::SocketAddr;
use std::sync::Arc;

use nowserving_core::config::ServerConfig;
use tokio::net::TcpListener;
use tracing::info;

use crate::router::build_router;
use crate::state::AppState;

/// Errors that can occur when starting or running the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to the network address.
    #[error("bind error: {0}")]
    Bind(String),

    /// The server encountered a fatal error while serving.
    #[error("serve error: {0}")]
    Serve(String),
}

/// Bind `config.host:config.port` and serve until `Ctrl-C`.
///
/// # Errors
///
/// Returns [`ServerError::Bind`] if the address is invalid or cannot be
/// bound, and [`ServerError::Serve`] on a fatal I/O error.
pub async fn start_server(config: &ServerConfig, state: Arc<AppState>) -> Result<(), ServerError> {
    let listener = bind(config).await?;

    let signal_state = Arc::clone(&state);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown signal received"),
            Err(e) => tracing::warn!(error = %e, "failed to listen for Ctrl-C, shutting down"),
        }
        signal_state.begin_shutdown();
    });

    serve(listener, state).await
}

/// Bind the configured address.
///
/// # Errors
///
/// Returns [`ServerError::Bind`] if the address is invalid or cannot be
/// bound.
pub async fn bind(config: &ServerConfig) -> Result<TcpListener, ServerError> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| ServerError::Bind(format!("invalid address: {e}")))?;

    TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Bind(format!("bind failed on {addr}: {e}")))
}

/// Serve on `listener` until [`AppState::begin_shutdown`] is called.
///
/// # Errors
///
/// Returns [`ServerError::Serve`] on a fatal I/O error.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<(), ServerError> {
    let addr = listener
        .local_addr()
        .map_err(|e| ServerError::Serve(format!("listener has no address: {e}")))?;
    let mut shutdown = state.shutdown_signal();
    let router = build_router(Arc::clone(&state));

    info!(%addr, transport = state.mode().as_str(), "queue server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stopping| *stopping).await;
        })
        .await
        .map_err(|e| ServerError::Serve(format!("serve error: {e}")))?;

    info!("queue server stopped");
    Ok(())
}
