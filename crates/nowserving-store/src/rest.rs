//! Upstash-compatible REST key-value store.
//!
//! | Request | Reply |
//! |---------|-------|
//! | `GET {base}/get/{key}` | `{"result": "<json>"}` or `{"result": null}` |
//! | `POST {base}/set/{key}` with the document as the body | `{"result": "OK"}` |
//!
//! Every request carries `Authorization: Bearer <token>`. Failures come
//! back as `{"error": "..."}`, usually with a non-2xx status.

use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;

use crate::error::StoreError;

/// HTTP client for a REST key-value API.
#[derive(Clone)]
pub struct RestStore {
    client: reqwest::Client,
    base: Url,
    token: String,
}

impl std::fmt::Debug for RestStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestStore")
            .field("base", &self.base.as_str())
            .finish_non_exhaustive()
    }
}

/// Reply envelope shared by every command.
#[derive(Debug, Deserialize)]
struct Reply {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

impl RestStore {
    /// A client for the API at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] if `base_url` is not an absolute
    /// `http`/`https` URL.
    pub fn new(base_url: &str, token: &str) -> Result<Self, StoreError> {
        let base = Url::parse(base_url)
            .map_err(|e| StoreError::Config(format!("invalid REST store URL: {e}")))?;
        if base.cannot_be_a_base() || !matches!(base.scheme(), "http" | "https") {
            return Err(StoreError::Config(format!(
                "REST store URL must be http(s): {base_url}"
            )));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base,
            token: token.to_owned(),
        })
    }

    /// The raw value at `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Http`] if the API is unreachable and
    /// [`StoreError::Rejected`] if it answers with an error.
    pub async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let response = self
            .client
            .get(self.command_url("get", key)?)
            .bearer_auth(&self.token)
            .send()
            .await?;

        Ok(match Self::reply(response).await? {
            Value::Null => None,
            Value::String(raw) => Some(raw),
            other => Some(other.to_string()),
        })
    }

    /// Replace the raw value at `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Http`] if the API is unreachable and
    /// [`StoreError::Rejected`] if it answers with an error.
    pub async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        let response = self
            .client
            .post(self.command_url("set", key)?)
            .bearer_auth(&self.token)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(value)
            .send()
            .await?;

        Self::reply(response).await.map(drop)
    }

    /// `{base}/{command}/{key}`, with `key` percent-encoded as one segment.
    fn command_url(&self, command: &str, key: &str) -> Result<Url, StoreError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| StoreError::Config("REST store URL cannot be a base".to_owned()))?
            .pop_if_empty()
            .push(command)
            .push(key);
        Ok(url)
    }

    /// Unwrap the `result` of a reply, mapping `error` replies and non-2xx
    /// statuses to [`StoreError::Rejected`].
    async fn reply(response: reqwest::Response) -> Result<Value, StoreError> {
        let status = response.status();
        let body = response.text().await?;

        match serde_json::from_str::<Reply>(&body) {
            Ok(Reply {
                error: Some(message),
                ..
            }) => Err(rejected(status, message)),
            Ok(reply) if status.is_success() => Ok(reply.result),
            Ok(_) => Err(rejected(status, body)),
            Err(_) if !status.is_success() => Err(rejected(status, body)),
            Err(e) => Err(StoreError::Serialization(e)),
        }
    }
}

fn rejected(status: StatusCode, message: String) -> StoreError {
    StoreError::Rejected {
        status: status.as_u16(),
        message,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn command_urls_encode_the_key() {
        let store = RestStore::new("https://kv.example.com/", "t").unwrap();
        let url = store.command_url("get", "queue:state").unwrap();
        assert_eq!(url.as_str(), "https://kv.example.com/get/queue:state");

        let nested = RestStore::new("https://kv.example.com/v1", "t").unwrap();
        let url = nested.command_url("set", "a/b").unwrap();
        assert_eq!(url.as_str(), "https://kv.example.com/v1/set/a%2Fb");
    }

    #[test]
    fn rejects_non_http_urls() {
        assert!(matches!(
            RestStore::new("redis://localhost:6379", "t"),
            Err(StoreError::Config(_))
        ));
        assert!(RestStore::new("not a url", "t").is_err());
    }
}
