//! Error types for the HTTP layer.
//!
//! [`ApiError`] unifies all failure modes of a request into a single enum
//! that converts into an Axum response via its
//! [`IntoResponse`](axum::response::IntoResponse) implementation. Every
//! error body is `{"error": <message>, "status": <code>}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use nowserving_core::ValidationError;
use nowserving_store::StoreError;

/// Errors that can occur while serving a request.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// A request field was missing or invalid.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The route exists but not for this method.
    #[error("Method not allowed")]
    MethodNotAllowed,

    /// The route is not served by the active transport.
    #[error("not found: {0}")]
    NotFound(String),

    /// The state store could not be read.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::Validation(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            Self::MethodNotAllowed => (StatusCode::METHOD_NOT_ALLOWED, self.to_string()),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            Self::Store(e) => {
                tracing::warn!(error = %e, "queue state store unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Queue state store unavailable".to_owned(),
                )
            }
            Self::Serialization(e) => {
                (StatusCode::INTERNAL_SERVER_ERROR, format!("JSON error: {e}"))
            }
        };

        let body = serde_json::json!({
            "error": message,
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}
