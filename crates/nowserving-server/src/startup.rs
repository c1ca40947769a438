//! Server startup helpers.
//!
//! [`build_state`] turns a [`NowservingConfig`] into the [`AppState`] for
//! its transport, connecting to the store in pull mode. [`spawn_server`]
//! launches the server on a background Tokio task and reports the bound
//! address, so callers can pass port `0` and learn the real port.
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use nowserving_core::QueueRules;
//! use nowserving_server::startup::spawn_server;
//! use nowserving_server::AppState;
//!
//! let state = Arc::new(AppState::push(QueueRules::default()));
//! let server = spawn_server("127.0.0.1", 0, Arc::clone(&state)).await?;
//! println!("listening on {}", server.addr);
//! state.begin_shutdown();
//! server.handle.await?;
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use nowserving_core::config::ServerConfig;
use nowserving_core::{NowservingConfig, TransportMode};
use nowserving_store::{ChangeFeed, StateStore, StoreError};
use tokio::task::JoinHandle;

use crate::server::{self, ServerError};
use crate::state::AppState;

/// A server running on a background task.
#[derive(Debug)]
pub struct RunningServer {
    /// The address actually bound.
    pub addr: SocketAddr,
    /// The serving task. Completes after shutdown.
    pub handle: JoinHandle<()>,
}

/// Build the state for the configured transport.
///
/// # Errors
///
/// Returns the store's error if the pull-mode store cannot be set up.
pub async fn build_state(config: &NowservingConfig) -> Result<AppState, StoreError> {
    let rules = config.queue.rules();
    match config.server.transport {
        TransportMode::Push => Ok(AppState::push(rules)),
        TransportMode::Pull => {
            let store = StateStore::connect(&config.store, &ChangeFeed::new()).await?;
            Ok(AppState::pull(store, rules))
        }
    }
}

/// Bind `host:port` and serve on a background task.
///
/// The bind happens before this returns, so a bad address or a port in
/// use is reported here rather than from the task.
///
/// # Errors
///
/// Returns [`ServerError::Bind`] if the address cannot be bound.
pub async fn spawn_server(
    host: &str,
    port: u16,
    state: Arc<AppState>,
) -> Result<RunningServer, ServerError> {
    let config = ServerConfig {
        host: host.to_owned(),
        port,
        transport: state.mode(),
    };
    let listener = server::bind(&config).await?;
    let addr = listener
        .local_addr()
        .map_err(|e| ServerError::Bind(format!("listener has no address: {e}")))?;

    let handle = tokio::spawn(async move {
        if let Err(e) = server::serve(listener, state).await {
            tracing::error!(error = %e, "queue server exited with error");
        }
    });

    tracing::info!(%addr, "queue server spawned on background task");
    Ok(RunningServer { addr, handle })
}
