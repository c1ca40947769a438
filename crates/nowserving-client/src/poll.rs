//! Poll transport: REST reads on a timer, REST writes on demand.

use std::sync::Arc;
use std::time::Duration;

use nowserving_core::Operation;
use nowserving_types::QueueState;
use reqwest::{Response, Url};
use serde_json::{Value, json};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::error::ClientError;
use crate::status::ConnectionStatus;
use crate::subscription::{self, Subscription};

/// Floor for the read interval.
const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Client for a pull-mode queue server.
#[derive(Debug, Clone)]
pub struct PollClient {
    http: reqwest::Client,
    base: Url,
    interval: Duration,
    status: Arc<watch::Sender<ConnectionStatus>>,
}

impl PollClient {
    /// A client for the server at `base_url`, reading every `interval`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidUrl`] unless `base_url` is an absolute
    /// `http`/`https` URL.
    pub fn new(base_url: &str, interval: Duration) -> Result<Self, ClientError> {
        let base = Url::parse(base_url).map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
        if base.cannot_be_a_base() || !matches!(base.scheme(), "http" | "https") {
            return Err(ClientError::InvalidUrl(format!(
                "poll transport needs an http(s) URL: {base_url}"
            )));
        }
        let (status, _) = watch::channel(ConnectionStatus::Connecting);
        Ok(Self {
            http: reqwest::Client::new(),
            base,
            interval: interval.max(MIN_INTERVAL),
            status: Arc::new(status),
        })
    }

    /// A receiver tracking whether the last request reached the server.
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// `GET /api/queue/state`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Http`] if the server is unreachable and
    /// [`ClientError::Rejected`] if it answers with an error.
    pub async fn get_state(&self) -> Result<QueueState, ClientError> {
        let url = self.endpoint("state")?;
        let result = self.http.get(url).send().await;
        self.finish(result).await
    }

    /// POST `op` to its REST endpoint and return the new document.
    ///
    /// # Errors
    ///
    /// As for [`Self::get_state`]. A `400` from the server comes back as
    /// [`ClientError::Rejected`].
    pub async fn apply(&self, op: Operation) -> Result<QueueState, ClientError> {
        let (path, body) = rest_call(op);
        let url = self.endpoint(path)?;
        let result = self.http.post(url).json(&body).send().await;
        self.finish(result).await
    }

    /// Read every interval, first tick immediate, and deliver each result.
    /// Failed reads are skipped and retried on the next tick.
    pub fn subscribe<F>(&self, mut on_state_change: F) -> Subscription
    where
        F: FnMut(QueueState) + Send + 'static,
    {
        let client = self.clone();
        Subscription::spawn(move |mut stop| async move {
            let mut ticker = tokio::time::interval(client.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = subscription::stopped(&mut stop) => break,
                    _ = ticker.tick() => match client.get_state().await {
                        Ok(state) => on_state_change(state),
                        Err(e) => debug!(error = %e, "poll read failed, retrying next tick"),
                    },
                }
            }
        })
    }

    fn endpoint(&self, name: &str) -> Result<Url, ClientError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| ClientError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(["api", "queue", name]);
        Ok(url)
    }

    /// Decode a reply and record whether the server could serve it. A 5xx
    /// reply counts as disconnected; a 4xx reply is still a live server.
    async fn finish(
        &self,
        result: Result<Response, reqwest::Error>,
    ) -> Result<QueueState, ClientError> {
        let response = match result {
            Ok(response) => response,
            Err(e) => {
                self.status.send_replace(ConnectionStatus::Disconnected);
                return Err(e.into());
            }
        };

        let status = response.status();
        self.status.send_replace(if status.is_server_error() {
            ConnectionStatus::Disconnected
        } else {
            ConnectionStatus::Connected
        });
        let bytes = response.bytes().await?;
        if !status.is_success() {
            let message = serde_json::from_slice::<Value>(&bytes)
                .ok()
                .and_then(|body| body.get("error").and_then(Value::as_str).map(str::to_owned))
                .unwrap_or_else(|| String::from_utf8_lossy(&bytes).into_owned());
            return Err(ClientError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Endpoint name and body for one operation.
fn rest_call(op: Operation) -> (&'static str, Value) {
    match op {
        Operation::CallNext(id) => ("callNext", json!({ "counterId": id.get() })),
        Operation::ClearCounter(id) => ("clearCounter", json!({ "counterId": id.get() })),
        Operation::SetStatus {
            counter_id,
            is_active,
        } => (
            "setStatus",
            json!({ "counterId": counter_id.get(), "isActive": is_active }),
        ),
        Operation::Resize { count } => ("updateCounters", json!({ "count": count })),
        Operation::Reset => ("reset", json!({})),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use nowserving_core::CounterId;

    use super::*;

    #[test]
    fn endpoints_sit_under_the_base_path() {
        let client = PollClient::new("http://localhost:3001", Duration::from_secs(1)).unwrap();
        assert_eq!(
            client.endpoint("state").unwrap().as_str(),
            "http://localhost:3001/api/queue/state"
        );

        let prefixed = PollClient::new("https://host/queue/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            prefixed.endpoint("callNext").unwrap().as_str(),
            "https://host/queue/api/queue/callNext"
        );
    }

    #[test]
    fn rest_calls_match_the_server_routes() {
        let id = CounterId::new(4).unwrap();
        assert_eq!(
            rest_call(Operation::SetStatus {
                counter_id: id,
                is_active: true
            }),
            ("setStatus", json!({"counterId": 4, "isActive": true}))
        );
        assert_eq!(
            rest_call(Operation::Resize { count: 3 }),
            ("updateCounters", json!({"count": 3}))
        );
        assert_eq!(rest_call(Operation::Reset).0, "reset");
    }

    #[test]
    fn rejects_non_http_urls() {
        assert!(PollClient::new("ws://host/ws", Duration::from_secs(1)).is_err());
    }
}
