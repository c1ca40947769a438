//! Same-process change notifications keyed by storage key.
//!
//! The local store publishes every document it writes. Subscribers on the
//! same device (other façades, other windows of the same process) receive
//! it through a [`tokio::sync::broadcast`] channel and re-render without
//! polling.
//!
//! The feed also hands out one write lock per key, so every local writer
//! sharing the feed runs its read-modify-write one at a time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use nowserving_types::QueueState;
use tokio::sync::{OwnedMutexGuard, broadcast};

/// Notifications buffered per key before slow subscribers start lagging.
const FEED_CAPACITY: usize = 16;

/// Publish-subscribe channel for document writes.
#[derive(Debug, Clone, Default)]
pub struct ChangeFeed {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<QueueState>>>>,
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl ChangeFeed {
    /// An empty feed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Notify every subscriber of `key`. Returns the number notified.
    pub fn publish(&self, key: &str, state: &QueueState) -> usize {
        let channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels
            .get(key)
            .and_then(|tx| tx.send(state.clone()).ok())
            .unwrap_or(0)
    }

    /// Receive every document written to `key` from now on.
    pub fn subscribe(&self, key: &str) -> broadcast::Receiver<QueueState> {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(key.to_owned())
            .or_insert_with(|| broadcast::channel(FEED_CAPACITY).0)
            .subscribe()
    }

    /// Wait for exclusive write access to `key`. The lock is released when
    /// the guard drops.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(key.to_owned()).or_default())
        };
        lock.lock_owned().await
    }

    /// Number of live subscribers of `key`.
    pub fn subscriber_count(&self, key: &str) -> usize {
        let channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels.get(key).map_or(0, broadcast::Sender::receiver_count)
    }
}
