//! Shared application state for the queue server.
//!
//! [`AppState`] owns the active [`Transport`]. In push mode that is a
//! [`QueueHub`]: the one in-memory [`QueueState`] of the process plus the
//! broadcast channel every WebSocket connection subscribes to. In pull mode
//! it is a [`PullService`] that reads, mutates, and persists the document in
//! a [`StateStore`] on every request.
//!
//! Both expose the same `snapshot` / `apply` pair so the REST handlers do
//! not care which one they are talking to.

use nowserving_core::mutate::{self, QueueRules};
use nowserving_core::{Operation, TransportMode, ValidationError, now_millis};
use nowserving_store::StateStore;
use nowserving_types::{QueueState, ServerMessage};
use tokio::sync::{Mutex, broadcast, watch};

use crate::error::ApiError;

/// Capacity of the broadcast channel for queue changes.
///
/// A connection that falls more than this many messages behind receives
/// [`broadcast::error::RecvError::Lagged`] and is resynchronized with a
/// fresh snapshot.
const BROADCAST_CAPACITY: usize = 256;

/// The in-memory queue of a push-mode process.
///
/// The document lock is held across mutate and broadcast, so the order of
/// broadcasts on the channel is the order the mutations were applied.
#[derive(Debug)]
pub struct QueueHub {
    state: Mutex<QueueState>,
    tx: broadcast::Sender<ServerMessage>,
    rules: QueueRules,
}

impl QueueHub {
    /// A hub holding a fresh default document.
    pub fn new(rules: QueueRules) -> Self {
        let state = rules.initial_state(now_millis());
        Self::with_state(state, rules)
    }

    /// A hub holding `state`.
    pub fn with_state(state: QueueState, rules: QueueRules) -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            state: Mutex::new(state),
            tx,
            rules,
        }
    }

    /// A copy of the current document.
    pub async fn snapshot(&self) -> QueueState {
        self.state.lock().await.clone()
    }

    /// Take a snapshot and subscribe to every change after it.
    ///
    /// Both happen under the document lock, so the receiver yields exactly
    /// the changes the snapshot does not already contain.
    pub async fn attach(&self) -> (QueueState, broadcast::Receiver<ServerMessage>) {
        let state = self.state.lock().await;
        (state.clone(), self.tx.subscribe())
    }

    /// Apply `op` and broadcast the result to every attached connection.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if the mutator rejects the operation.
    /// Nothing is changed or broadcast in that case.
    pub async fn apply(&self, op: Operation) -> Result<QueueState, ValidationError> {
        let mut state = self.state.lock().await;
        let next = mutate::apply(&state, op, &self.rules, now_millis())?;
        state.clone_from(&next);

        let message = ServerMessage::announce(&next);
        let receivers = self.tx.send(message).unwrap_or(0);
        tracing::info!(
            op = op.kind(),
            counter_id = op.counter_id().map(|id| id.get()),
            receivers,
            "queue operation applied"
        );
        Ok(next)
    }

    /// Number of attached connections.
    pub fn connection_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Stateless read-modify-write over a durable store.
///
/// There is no coordination between concurrent requests: two writers that
/// read the same document both persist, and the later write wins.
#[derive(Debug, Clone)]
pub struct PullService {
    store: StateStore,
    rules: QueueRules,
}

impl PullService {
    /// A service over `store`.
    pub const fn new(store: StateStore, rules: QueueRules) -> Self {
        Self { store, rules }
    }

    /// The backing store.
    pub const fn store(&self) -> &StateStore {
        &self.store
    }

    /// Read the document, initializing it if absent.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Store`] if the store cannot be read.
    pub async fn snapshot(&self) -> Result<QueueState, ApiError> {
        Ok(self.store.load_or_init(&self.rules).await?)
    }

    /// Read, apply `op`, and persist. A failed write is logged and the new
    /// document is still returned.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Store`] if the read fails, or
    /// [`ApiError::Validation`] if the mutator rejects the operation.
    pub async fn apply(&self, op: Operation) -> Result<QueueState, ApiError> {
        let state = self.snapshot().await?;
        let next = mutate::apply(&state, op, &self.rules, now_millis())?;

        if let Err(e) = self.store.write(&next).await {
            tracing::warn!(op = op.kind(), key = self.store.key(), error = %e, "failed to persist queue state");
        } else {
            tracing::info!(
                op = op.kind(),
                counter_id = op.counter_id().map(|id| id.get()),
                "queue operation applied"
            );
        }
        Ok(next)
    }
}

/// The transport a server process runs.
#[derive(Debug)]
pub enum Transport {
    /// In-memory document with WebSocket broadcast.
    Push(QueueHub),
    /// Durable store, one read-modify-write per request.
    Pull(PullService),
}

/// Shared state handed to every handler.
#[derive(Debug)]
pub struct AppState {
    transport: Transport,
    shutdown: watch::Sender<bool>,
}

impl AppState {
    /// State for `transport`.
    pub fn new(transport: Transport) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            transport,
            shutdown,
        }
    }

    /// Push-mode state over a fresh default document.
    pub fn push(rules: QueueRules) -> Self {
        Self::new(Transport::Push(QueueHub::new(rules)))
    }

    /// Pull-mode state over `store`.
    pub fn pull(store: StateStore, rules: QueueRules) -> Self {
        Self::new(Transport::Pull(PullService::new(store, rules)))
    }

    /// Which transport is active.
    pub const fn mode(&self) -> TransportMode {
        match self.transport {
            Transport::Push(_) => TransportMode::Push,
            Transport::Pull(_) => TransportMode::Pull,
        }
    }

    /// The push hub, if this is a push-mode process.
    pub const fn hub(&self) -> Option<&QueueHub> {
        match &self.transport {
            Transport::Push(hub) => Some(hub),
            Transport::Pull(_) => None,
        }
    }

    /// The current document.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Store`] in pull mode if the store cannot be read.
    pub async fn snapshot(&self) -> Result<QueueState, ApiError> {
        match &self.transport {
            Transport::Push(hub) => Ok(hub.snapshot().await),
            Transport::Pull(service) => service.snapshot().await,
        }
    }

    /// Apply one operation through the active transport.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Validation`] if the operation is rejected, or
    /// [`ApiError::Store`] in pull mode if the store cannot be read.
    pub async fn apply(&self, op: Operation) -> Result<QueueState, ApiError> {
        match &self.transport {
            Transport::Push(hub) => Ok(hub.apply(op).await?),
            Transport::Pull(service) => service.apply(op).await,
        }
    }

    /// Ask open connections to close and the server to stop accepting.
    pub fn begin_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// A receiver that flips to `true` once shutdown begins.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}
