//! Subscription facade for nowserving terminals and displays.
//!
//! [`QueueClient`] gives every UI surface the same shape regardless of how
//! it reaches the queue: `subscribe(on_state_change)` for a stream of full
//! [`QueueState`] documents, plus the five write operations.
//!
//! | Transport | Reads | Writes return |
//! |-----------|-------|---------------|
//! | [`PushClient`] | server broadcasts over one `WebSocket` | `None`, the result arrives via the subscription |
//! | [`PollClient`] | `GET /api/queue/state` every interval | `Some(state)` |
//! | [`LocalClient`] | change feed plus a timer | `Some(state)` |
//!
//! Each client also exposes a [`ConnectionStatus`] receiver.

pub mod backoff;
pub mod error;
pub mod local;
pub mod poll;
pub mod push;
pub mod status;
pub mod subscription;

use std::path::PathBuf;

use nowserving_core::config::ClientConfig;
use nowserving_core::{CounterId, Operation, QueueRules, ValidationError};
use nowserving_store::ChangeFeed;
use nowserving_types::QueueState;
use tokio::sync::watch;

pub use backoff::ReconnectBackoff;
pub use error::ClientError;
pub use local::LocalClient;
pub use poll::PollClient;
pub use push::PushClient;
pub use status::ConnectionStatus;
pub use subscription::Subscription;

/// A queue client over one of the three transports.
#[derive(Debug, Clone)]
pub enum QueueClient {
    /// Persistent `WebSocket` to a push server.
    Push(PushClient),
    /// Timed REST reads against a pull server.
    Poll(PollClient),
    /// Document on this device.
    Local(LocalClient),
}

impl QueueClient {
    /// Connect to a push server at `base_url`. Returns immediately; the
    /// connection is made and kept up in the background.
    pub fn push(base_url: &str, client: &ClientConfig) -> Result<Self, ClientError> {
        PushClient::connect(base_url, ReconnectBackoff::from_config(client)).map(Self::Push)
    }

    /// Poll a pull server at `base_url`.
    pub fn poll(base_url: &str, client: &ClientConfig) -> Result<Self, ClientError> {
        PollClient::new(base_url, client.poll_interval()).map(Self::Poll)
    }

    /// Share the document in `dir` with every client on `feed`.
    pub fn local(
        dir: impl Into<PathBuf>,
        feed: ChangeFeed,
        rules: QueueRules,
        client: &ClientConfig,
    ) -> Self {
        Self::Local(LocalClient::new(dir, feed, rules, client.poll_interval()))
    }

    /// Call `on_state_change` with every new document until the returned
    /// [`Subscription`] is dropped.
    pub fn subscribe<F>(&self, on_state_change: F) -> Subscription
    where
        F: FnMut(QueueState) + Send + 'static,
    {
        match self {
            Self::Push(client) => client.subscribe(on_state_change),
            Self::Poll(client) => client.subscribe(on_state_change),
            Self::Local(client) => client.subscribe(on_state_change),
        }
    }

    /// A receiver tracking the connection status. The local transport is
    /// always [`ConnectionStatus::Connected`].
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        match self {
            Self::Push(client) => client.status(),
            Self::Poll(client) => client.status(),
            Self::Local(_) => watch::channel(ConnectionStatus::Connected).1,
        }
    }

    /// The current document. For push this is the last one received, or
    /// `None` before the first.
    ///
    /// # Errors
    ///
    /// Returns the transport's read error.
    pub async fn get_state(&self) -> Result<Option<QueueState>, ClientError> {
        match self {
            Self::Push(client) => Ok(client.latest()),
            Self::Poll(client) => client.get_state().await.map(Some),
            Self::Local(client) => client.get_state().await.map(Some),
        }
    }

    /// Call the next customer to `counter_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Validation`] for id `0`, otherwise the
    /// transport's error.
    pub async fn call_next(&self, counter_id: u32) -> Result<Option<QueueState>, ClientError> {
        self.execute(Operation::CallNext(counter(counter_id)?)).await
    }

    /// Mark `counter_id` empty.
    ///
    /// # Errors
    ///
    /// As for [`Self::call_next`].
    pub async fn clear_counter(&self, counter_id: u32) -> Result<Option<QueueState>, ClientError> {
        self.execute(Operation::ClearCounter(counter(counter_id)?)).await
    }

    /// Set whether `counter_id` is serving.
    ///
    /// # Errors
    ///
    /// As for [`Self::call_next`].
    pub async fn set_status(
        &self,
        counter_id: u32,
        is_active: bool,
    ) -> Result<Option<QueueState>, ClientError> {
        self.execute(Operation::SetStatus {
            counter_id: counter(counter_id)?,
            is_active,
        })
        .await
    }

    /// Zero every counter.
    ///
    /// # Errors
    ///
    /// Returns the transport's error.
    pub async fn reset_system(&self) -> Result<Option<QueueState>, ClientError> {
        self.execute(Operation::Reset).await
    }

    /// Change the number of counters to `count`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Validation`] for `0`, otherwise the
    /// transport's error.
    pub async fn update_counter_count(&self, count: u32) -> Result<Option<QueueState>, ClientError> {
        if count == 0 {
            return Err(ValidationError::InvalidCount.into());
        }
        self.execute(Operation::Resize { count }).await
    }

    async fn execute(&self, op: Operation) -> Result<Option<QueueState>, ClientError> {
        match self {
            Self::Push(client) => client.send(op.into()).await.map(|()| None),
            Self::Poll(client) => client.apply(op).await.map(Some),
            Self::Local(client) => client.apply(op).await.map(Some),
        }
    }
}

fn counter(id: u32) -> Result<CounterId, ClientError> {
    CounterId::new(id).ok_or(ClientError::Validation(ValidationError::MissingField(
        "counterId",
    )))
}
