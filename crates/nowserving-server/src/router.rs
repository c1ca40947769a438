//! Axum router construction.
//!
//! Assembles the queue REST routes, the health check, and (in push mode)
//! the `WebSocket` endpoint into a single [`Router`] with CORS enabled so
//! the staff, display, and admin pages can be served from anywhere.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Build the complete Axum router.
///
/// The router includes:
/// - `GET /health` -- liveness and active transport
/// - `GET /api/queue/state` -- current document
/// - `POST /api/queue/{callNext,clearCounter,setStatus,updateCounters,reset}`
/// - `GET /ws` -- push connection, only when the push transport is active
///
/// Any other method on a queue path is answered with `405`.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut router = Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/api/queue/state",
            get(handlers::get_state).fallback(handlers::method_not_allowed),
        )
        .route(
            "/api/queue/callNext",
            post(handlers::call_next).fallback(handlers::method_not_allowed),
        )
        .route(
            "/api/queue/clearCounter",
            post(handlers::clear_counter).fallback(handlers::method_not_allowed),
        )
        .route(
            "/api/queue/setStatus",
            post(handlers::set_status).fallback(handlers::method_not_allowed),
        )
        .route(
            "/api/queue/updateCounters",
            post(handlers::update_counters).fallback(handlers::method_not_allowed),
        )
        .route(
            "/api/queue/reset",
            post(handlers::reset).fallback(handlers::method_not_allowed),
        );

    if state.hub().is_some() {
        router = router.route("/ws", get(ws::ws_queue));
    }

    router
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
