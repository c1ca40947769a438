//! Storage for the nowserving queue document.
//!
//! The whole queue is one JSON document under one key (`queue:state` by
//! default). [`StateStore`] reads and writes it through one of four
//! backends and bounds every operation with a timeout. There is no
//! compare-and-swap: concurrent read-modify-write sequences race and the
//! last writer wins.
//!
//! # Backends
//!
//! - [`MemoryStore`] -- process-local slot, for tests and single-process pull servers
//! - [`RedisStore`] -- Redis protocol via `fred`
//! - [`RestStore`] -- Upstash-compatible REST API via `reqwest`
//! - [`LocalStore`] -- JSON file on the device, publishing to a [`ChangeFeed`]

pub mod error;
pub mod feed;
pub mod local;
pub mod memory;
pub mod redis;
pub mod rest;

use std::future::Future;
use std::time::Duration;

use nowserving_core::config::{StoreBackend, StoreConfig};
use nowserving_core::{QueueRules, now_millis};
use nowserving_types::{QueueState, STATE_KEY};

pub use error::StoreError;
pub use feed::ChangeFeed;
pub use local::LocalStore;
pub use memory::MemoryStore;
pub use redis::RedisStore;
pub use rest::RestStore;

/// Default bound on a single store operation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);

/// One of the concrete stores.
#[derive(Debug, Clone)]
pub enum Backend {
    /// Process-local slot.
    Memory(MemoryStore),
    /// Redis protocol.
    Redis(RedisStore),
    /// REST key-value API.
    Rest(RestStore),
    /// JSON file on the device.
    Local(LocalStore),
}

impl Backend {
    /// Lowercase backend name, for logging.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Redis(_) => "redis",
            Self::Rest(_) => "rest",
            Self::Local(_) => "local",
        }
    }
}

/// Typed access to the queue document.
#[derive(Debug, Clone)]
pub struct StateStore {
    backend: Backend,
    key: String,
    timeout: Duration,
}

impl StateStore {
    /// A store over `backend` holding the document at `key`.
    pub fn new(backend: Backend, key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            backend,
            key: key.into(),
            timeout,
        }
    }

    /// A fresh in-memory store with the default key and timeout.
    pub fn memory() -> Self {
        Self::new(Backend::Memory(MemoryStore::new()), STATE_KEY, DEFAULT_TIMEOUT)
    }

    /// A local file store with the default key and timeout.
    pub fn local(store: LocalStore) -> Self {
        Self::new(Backend::Local(store), STATE_KEY, DEFAULT_TIMEOUT)
    }

    /// Build the backend `config` selects. `feed` is used by the local
    /// backend only.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] if the selected backend is missing its
    /// URL or token, or the backend's error if connecting fails.
    pub async fn connect(config: &StoreConfig, feed: &ChangeFeed) -> Result<Self, StoreError> {
        let timeout = config.timeout();
        let backend = match config.backend {
            StoreBackend::Memory => Backend::Memory(MemoryStore::new()),
            StoreBackend::Redis => {
                let url = config
                    .redis_url
                    .as_deref()
                    .ok_or_else(|| StoreError::Config("REDIS_URL is not set".to_owned()))?;
                let store = tokio::time::timeout(timeout, RedisStore::connect(url))
                    .await
                    .map_err(|_elapsed| StoreError::Timeout {
                        op: "connect",
                        after: timeout,
                    })??;
                Backend::Redis(store)
            }
            StoreBackend::Rest => {
                let (Some(url), Some(token)) =
                    (config.rest_url.as_deref(), config.rest_token.as_deref())
                else {
                    tracing::error!(
                        has_url = config.rest_url.is_some(),
                        has_token = config.rest_token.is_some(),
                        "missing REST store credentials"
                    );
                    return Err(StoreError::Config(
                        "UPSTASH_REDIS_REST_URL and UPSTASH_REDIS_REST_TOKEN must both be set"
                            .to_owned(),
                    ));
                };
                Backend::Rest(RestStore::new(url, token)?)
            }
            StoreBackend::Local => {
                Backend::Local(LocalStore::new(config.local_dir_or_default(), feed.clone()))
            }
        };

        tracing::info!(backend = backend.name(), key = %config.key, "state store ready");
        Ok(Self::new(backend, config.key.clone(), timeout))
    }

    /// The key holding the document.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The concrete backend.
    pub const fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Read the document. `Ok(None)` means the key is absent.
    ///
    /// # Errors
    ///
    /// Returns the backend's error, [`StoreError::Serialization`] if the
    /// stored value is not a queue document, or [`StoreError::Timeout`].
    pub async fn read(&self) -> Result<Option<QueueState>, StoreError> {
        let key = self.key.as_str();
        let raw = self
            .bounded("read", async {
                match &self.backend {
                    Backend::Memory(store) => Ok(store.get(key).await),
                    Backend::Redis(store) => store.get(key).await,
                    Backend::Rest(store) => store.get(key).await,
                    Backend::Local(store) => store.get(key).await,
                }
            })
            .await?;

        raw.map(|raw| serde_json::from_str(&raw).map_err(StoreError::from))
            .transpose()
    }

    /// Replace the document.
    ///
    /// # Errors
    ///
    /// Returns the backend's error or [`StoreError::Timeout`].
    pub async fn write(&self, state: &QueueState) -> Result<(), StoreError> {
        let key = self.key.as_str();
        let raw = serde_json::to_string(state)?;
        self.bounded("write", async {
            match &self.backend {
                Backend::Memory(store) => {
                    store.set(key, raw).await;
                    Ok(())
                }
                Backend::Redis(store) => store.set(key, &raw).await,
                Backend::Rest(store) => store.set(key, raw).await,
                Backend::Local(store) => store.set(key, &raw, state).await,
            }
        })
        .await
    }

    /// Read the document, creating and persisting a default one if the key
    /// is absent. A failed initializing write is logged and the default is
    /// still returned.
    ///
    /// # Errors
    ///
    /// Returns the read error if the store could not be read at all.
    pub async fn load_or_init(&self, rules: &QueueRules) -> Result<QueueState, StoreError> {
        if let Some(state) = self.read().await? {
            return Ok(state);
        }

        let state = rules.initial_state(now_millis());
        match self.write(&state).await {
            Ok(()) => tracing::info!(key = %self.key, "initialized queue state"),
            Err(e) => tracing::warn!(key = %self.key, error = %e, "failed to persist initial queue state"),
        }
        Ok(state)
    }

    async fn bounded<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_elapsed| StoreError::Timeout {
                op,
                after: self.timeout,
            })?
    }
}
