//! REST endpoint handlers.
//!
//! Every write endpoint parses its body leniently, builds a validated
//! [`Operation`], and hands it to the active transport. The same handlers
//! serve push mode (where the write is broadcast to WebSocket clients) and
//! pull mode (where it is persisted to the store).
//!
//! # Endpoints
//!
//! | Method | Path | Body |
//! |--------|------|------|
//! | `GET` | `/api/queue/state` | none |
//! | `POST` | `/api/queue/callNext` | `{counterId}` |
//! | `POST` | `/api/queue/clearCounter` | `{counterId}` |
//! | `POST` | `/api/queue/setStatus` | `{counterId, isActive?}` |
//! | `POST` | `/api/queue/updateCounters` | `{count}` |
//! | `POST` | `/api/queue/reset` | none |
//! | `GET` | `/health` | none |

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use nowserving_core::Operation;
use nowserving_types::QueueState;
use serde_json::{Map, Value};

use crate::error::ApiError;
use crate::state::AppState;

/// `GET /api/queue/state`
pub async fn get_state(State(state): State<Arc<AppState>>) -> Result<Json<QueueState>, ApiError> {
    Ok(Json(state.snapshot().await?))
}

/// `POST /api/queue/callNext`
pub async fn call_next(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<QueueState>, ApiError> {
    let op = Operation::call_next_from(&lenient_body(&body))?;
    Ok(Json(state.apply(op).await?))
}

/// `POST /api/queue/clearCounter`
pub async fn clear_counter(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<QueueState>, ApiError> {
    let op = Operation::clear_counter_from(&lenient_body(&body))?;
    Ok(Json(state.apply(op).await?))
}

/// `POST /api/queue/setStatus`
pub async fn set_status(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<QueueState>, ApiError> {
    let op = Operation::set_status_from(&lenient_body(&body))?;
    Ok(Json(state.apply(op).await?))
}

/// `POST /api/queue/updateCounters`
pub async fn update_counters(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<QueueState>, ApiError> {
    let op = Operation::resize_from(&lenient_body(&body))?;
    Ok(Json(state.apply(op).await?))
}

/// `POST /api/queue/reset`. The body is ignored.
pub async fn reset(State(state): State<Arc<AppState>>) -> Result<Json<QueueState>, ApiError> {
    Ok(Json(state.apply(Operation::Reset).await?))
}

/// `GET /health`
///
/// In push mode the reply also summarizes the in-memory document. Pull mode
/// does not touch the store, so those fields are `null`.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let (connections, occupied, served) = match state.hub() {
        Some(hub) => {
            let snapshot = hub.snapshot().await;
            (
                Some(hub.connection_count()),
                Some(snapshot.occupied_count()),
                Some(snapshot.total_served()),
            )
        }
        None => (None, None, None),
    };
    Json(serde_json::json!({
        "status": "ok",
        "transport": state.mode().as_str(),
        "connections": connections,
        "occupied": occupied,
        "served": served,
    }))
}

/// Fallback for a known path hit with the wrong method.
pub async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}

/// Parse a request body as a JSON object. Anything else, including an
/// empty body, is treated as `{}` so that it fails field validation.
fn lenient_body(body: &[u8]) -> Value {
    serde_json::from_slice::<Value>(body)
        .ok()
        .filter(Value::is_object)
        .unwrap_or_else(|| Value::Object(Map::new()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn lenient_body_accepts_objects_only() {
        assert_eq!(lenient_body(br#"{"counterId":2}"#), json!({"counterId": 2}));
        assert_eq!(lenient_body(b""), json!({}));
        assert_eq!(lenient_body(b"counterId=2"), json!({}));
        assert_eq!(lenient_body(b"[1]"), json!({}));
    }
}
