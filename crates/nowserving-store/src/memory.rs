//! Process-local key-value slot.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

/// In-memory store. Clones share the same slots.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    slots: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The raw value at `key`.
    pub async fn get(&self, key: &str) -> Option<String> {
        self.slots.read().await.get(key).cloned()
    }

    /// Replace the raw value at `key`.
    pub async fn set(&self, key: &str, value: String) {
        self.slots.write().await.insert(key.to_owned(), value);
    }
}
