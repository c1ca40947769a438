//! Local fan-out: a document on this device shared by every client in the
//! process.
//!
//! Writes go straight through the mutators to a [`LocalStore`], which
//! announces them on its [`ChangeFeed`]. Every read-modify-write holds the
//! feed's lock for the document key, so writers sharing a feed never
//! overwrite each other. Subscribers hear about every write
//! made through the same feed, and re-read on a timer in case a write came
//! from somewhere the feed does not reach.

use std::path::PathBuf;
use std::time::Duration;

use nowserving_core::{Operation, QueueRules, apply, now_millis};
use nowserving_store::{ChangeFeed, LocalStore, StateStore};
use nowserving_types::QueueState;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::error::ClientError;
use crate::subscription::{self, Subscription};

/// Client for a document kept on this device.
#[derive(Debug, Clone)]
pub struct LocalClient {
    store: StateStore,
    feed: ChangeFeed,
    rules: QueueRules,
    interval: Duration,
}

impl LocalClient {
    /// A client over the document in `dir`, announcing writes on `feed`.
    /// Clients that should see each other's writes must share `feed`.
    pub fn new(
        dir: impl Into<PathBuf>,
        feed: ChangeFeed,
        rules: QueueRules,
        interval: Duration,
    ) -> Self {
        let store = StateStore::local(LocalStore::new(dir, feed.clone()));
        Self {
            store,
            feed,
            rules,
            interval: interval.max(Duration::from_millis(10)),
        }
    }

    /// The underlying store.
    pub const fn store(&self) -> &StateStore {
        &self.store
    }

    /// Read the document, creating it if absent.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Store`] if the file exists but cannot be read
    /// or decoded.
    pub async fn get_state(&self) -> Result<QueueState, ClientError> {
        let _guard = self.feed.lock(self.store.key()).await;
        self.load().await
    }

    /// Apply `op` to the local document and return the result.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Store`] if the document cannot be read or
    /// written, or [`ClientError::Validation`] if the mutator rejects `op`.
    pub async fn apply(&self, op: Operation) -> Result<QueueState, ClientError> {
        let _guard = self.feed.lock(self.store.key()).await;
        let state = self.load().await?;
        let next = apply(&state, op, &self.rules, now_millis())?;
        self.store.write(&next).await.inspect_err(|e| {
            warn!(op = op.kind(), key = self.store.key(), error = %e, "failed to persist local queue state");
        })?;
        Ok(next)
    }

    /// Read or initialize the document. The caller holds the key's lock.
    async fn load(&self) -> Result<QueueState, ClientError> {
        Ok(self.store.load_or_init(&self.rules).await?)
    }

    /// Deliver the current document now, then again after every change
    /// notification and every interval.
    pub fn subscribe<F>(&self, mut on_state_change: F) -> Subscription
    where
        F: FnMut(QueueState) + Send + 'static,
    {
        let client = self.clone();
        let mut changes = self.feed.subscribe(self.store.key());
        Subscription::spawn(move |mut stop| async move {
            let mut ticker = tokio::time::interval(client.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick is immediate.
            ticker.tick().await;
            client.deliver(&mut on_state_change).await;

            loop {
                tokio::select! {
                    () = subscription::stopped(&mut stop) => break,
                    change = changes.recv() => match change {
                        Ok(state) => on_state_change(state),
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(skipped, "local subscriber lagged, re-reading");
                            client.deliver(&mut on_state_change).await;
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = ticker.tick() => client.deliver(&mut on_state_change).await,
                }
            }
        })
    }

    async fn deliver<F>(&self, on_state_change: &mut F)
    where
        F: FnMut(QueueState),
    {
        match self.get_state().await {
            Ok(state) => on_state_change(state),
            Err(e) => debug!(error = %e, "local read failed, retrying next tick"),
        }
    }
}
