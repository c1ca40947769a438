//! Error types for the store adapters.
//!
//! All errors are propagated via [`StoreError`], which wraps the underlying
//! [`fred`], [`reqwest`], and I/O errors. Callers treat every variant the
//! same way: a failed read is a `503`, a failed write after a mutation is
//! logged and the computed document is returned anyway.

use std::time::Duration;

/// Errors that can occur while reading or writing the queue document.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A Redis operation failed.
    #[error("Redis error: {0}")]
    Redis(#[from] fred::error::Error),

    /// The REST key-value API could not be reached.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The REST key-value API answered with an error.
    #[error("store rejected request ({status}): {message}")]
    Rejected {
        /// HTTP status returned by the API.
        status: u16,
        /// The API's `error` field, or the raw body.
        message: String,
    },

    /// A serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A local file operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The operation did not finish within the configured bound.
    #[error("store {op} timed out after {after:?}")]
    Timeout {
        /// Which operation timed out.
        op: &'static str,
        /// The configured bound.
        after: Duration,
    },

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}
