//! Error types for the client facade.

use nowserving_core::ValidationError;
use nowserving_store::StoreError;

/// Errors returned by [`QueueClient`](crate::QueueClient) operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// A push write was attempted while the connection is down.
    #[error("not connected to the queue server")]
    Disconnected,

    /// The queue server could not be reached over HTTP.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The queue server answered a REST call with an error.
    #[error("server rejected request ({status}): {message}")]
    Rejected {
        /// HTTP status returned by the server.
        status: u16,
        /// The server's `error` field, or the raw body.
        message: String,
    },

    /// The local store could not be read.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A local write was rejected by the mutator.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The server address is not usable.
    #[error("invalid server URL: {0}")]
    InvalidUrl(String),
}
