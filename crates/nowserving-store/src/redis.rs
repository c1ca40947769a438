//! Redis-protocol store.
//!
//! The document is kept as a JSON string under a single key with plain
//! `GET` and `SET`. Works against Redis, Dragonfly, and anything else that
//! speaks RESP.

use fred::prelude::*;

use crate::error::StoreError;

/// Connection handle to a Redis-compatible server.
#[derive(Clone)]
pub struct RedisStore {
    client: Client,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to the server at `url` (`redis://host:port[/db]`).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] if the URL cannot be parsed, or
    /// [`StoreError::Redis`] if the connection fails.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let config = Config::from_url(url)
            .map_err(|e| StoreError::Config(format!("invalid Redis URL: {e}")))?;

        let client = Builder::from_config(config).build()?;
        client.init().await?;

        tracing::info!("connected to Redis");
        Ok(Self { client })
    }

    /// The raw value at `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Redis`] if the read fails.
    pub async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value: Option<String> = self.client.get(key).await?;
        Ok(value)
    }

    /// Replace the raw value at `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Redis`] if the write fails.
    pub async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let _: () = self.client.set(key, value, None, None, false).await?;
        Ok(())
    }
}
