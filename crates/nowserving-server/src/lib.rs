//! Queue server for nowserving.
//!
//! This crate provides an Axum HTTP server that exposes:
//!
//! - **`WebSocket` endpoint** (`/ws`, push mode) holding the queue in memory
//!   and broadcasting every change to every connected client via
//!   [`tokio::sync::broadcast`]
//! - **REST endpoints** (`/api/queue/*`) for reading and mutating the queue,
//!   served in both modes
//! - **Health check** (`/health`)
//!
//! # Transports
//!
//! A process runs exactly one transport, chosen by `server.transport`:
//!
//! - **push** -- the [`QueueHub`] owns the document for the lifetime of the
//!   process. REST writes go through the hub too, so WebSocket clients see
//!   them.
//! - **pull** -- every request reads the document from the configured
//!   store, applies one mutation, and writes it back. Concurrent writers
//!   race; the last write wins.
//!
//! [`QueueHub`]: state::QueueHub

pub mod error;
pub mod handlers;
pub mod router;
pub mod server;
pub mod startup;
pub mod state;
pub mod ws;

// Re-export primary types for convenience.
pub use error::ApiError;
pub use router::build_router;
pub use server::{ServerError, serve, start_server};
pub use startup::{RunningServer, build_state, spawn_server};
pub use state::{AppState, PullService, QueueHub, Transport};
