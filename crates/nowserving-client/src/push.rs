//! Push transport: one `WebSocket` per client with automatic reconnect.
//!
//! A background task owns the socket. Outbound messages reach it through
//! an mpsc command channel and are acknowledged once written; inbound
//! state-bearing messages are rebuilt into full [`QueueState`]s and fanned
//! out to every [`Subscription`] over a broadcast channel.
//!
//! When the connection drops the task waits out a [`ReconnectBackoff`]
//! delay and retries forever. Writes made while it is down fail with
//! [`ClientError::Disconnected`].

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use nowserving_types::{ClientMessage, QueueState, ServerMessage};
use reqwest::Url;
use tokio::net::TcpStream;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::backoff::ReconnectBackoff;
use crate::error::ClientError;
use crate::status::ConnectionStatus;
use crate::subscription::{self, Subscription};

/// Capacity of the command channel.
const CMD_CHANNEL_CAPACITY: usize = 32;

/// Capacity of the state fan-out channel.
const STATE_CHANNEL_CAPACITY: usize = 64;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Messages from the public API to the background task.
enum ClientCommand {
    /// Write `message` and report whether it left the socket.
    Send {
        message: ClientMessage,
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
    /// Close the socket and stop reconnecting.
    Disconnect,
}

/// Why one connection's I/O loop ended.
enum IoExit {
    /// The socket dropped; reconnect.
    Lost,
    /// The client asked to stop, or was dropped.
    Closed,
}

/// Channels the background task publishes into.
struct Outputs {
    states: broadcast::Sender<QueueState>,
    latest: watch::Sender<Option<QueueState>>,
    status: watch::Sender<ConnectionStatus>,
}

/// Client for a push-mode queue server.
#[derive(Debug, Clone)]
pub struct PushClient {
    url: Url,
    cmd_tx: mpsc::Sender<ClientCommand>,
    states: broadcast::Sender<QueueState>,
    latest: watch::Receiver<Option<QueueState>>,
    status: watch::Receiver<ConnectionStatus>,
}

impl std::fmt::Debug for ClientCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Send { message, .. } => f.debug_tuple("Send").field(message).finish(),
            Self::Disconnect => f.write_str("Disconnect"),
        }
    }
}

impl PushClient {
    /// Start a client for the server at `base_url` and return immediately.
    /// Must be called from within a Tokio runtime.
    ///
    /// `base_url` may be the server root (`http://host:3001`) or the socket
    /// itself (`ws://host:3001/ws`).
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidUrl`] if `base_url` cannot be turned
    /// into a `ws`/`wss` URL.
    pub fn connect(base_url: &str, backoff: ReconnectBackoff) -> Result<Self, ClientError> {
        let url = push_url(base_url)?;
        let (cmd_tx, cmd_rx) = mpsc::channel(CMD_CHANNEL_CAPACITY);
        let (states, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);
        let (latest_tx, latest) = watch::channel(None);
        let (status_tx, status) = watch::channel(ConnectionStatus::Connecting);

        let outputs = Outputs {
            states: states.clone(),
            latest: latest_tx,
            status: status_tx,
        };
        tokio::spawn(run_client_task(url.clone(), backoff, cmd_rx, outputs));

        Ok(Self {
            url,
            cmd_tx,
            states,
            latest,
            status,
        })
    }

    /// The socket URL in use.
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// A receiver tracking the connection status.
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// The last document received from the server, if any.
    pub fn latest(&self) -> Option<QueueState> {
        self.latest.borrow().clone()
    }

    /// Deliver every document received from the server to `on_state_change`,
    /// starting with the latest one already known.
    pub fn subscribe<F>(&self, mut on_state_change: F) -> Subscription
    where
        F: FnMut(QueueState) + Send + 'static,
    {
        let mut rx = self.states.subscribe();
        let latest = self.latest.clone();
        Subscription::spawn(move |mut stop| async move {
            let current = latest.borrow().clone();
            if let Some(state) = current {
                on_state_change(state);
            }
            loop {
                tokio::select! {
                    () = subscription::stopped(&mut stop) => break,
                    result = rx.recv() => match result {
                        Ok(state) => on_state_change(state),
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(skipped, "push subscriber lagged, delivering latest");
                            let current = latest.borrow().clone();
                            if let Some(state) = current {
                                on_state_change(state);
                            }
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        })
    }

    /// Write one message to the server.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Disconnected`] if the socket is down or the
    /// background task has stopped.
    pub async fn send(&self, message: ClientMessage) -> Result<(), ClientError> {
        if !self.status.borrow().is_connected() {
            return Err(ClientError::Disconnected);
        }
        let (reply, response) = oneshot::channel();
        self.cmd_tx
            .send(ClientCommand::Send { message, reply })
            .await
            .map_err(|_closed| ClientError::Disconnected)?;
        response.await.map_err(|_dropped| ClientError::Disconnected)?
    }

    /// Close the socket and stop reconnecting.
    pub async fn disconnect(&self) {
        // A closed channel means the task is already gone.
        let _ = self.cmd_tx.send(ClientCommand::Disconnect).await;
    }
}

/// Derive the socket URL from a server address.
///
/// `http` becomes `ws` and `https` becomes `wss`; `/ws` is appended unless
/// the path already ends with it.
///
/// # Errors
///
/// Returns [`ClientError::InvalidUrl`] for unparseable URLs and for any
/// other scheme.
pub fn push_url(base_url: &str) -> Result<Url, ClientError> {
    let mut url = Url::parse(base_url).map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(ClientError::InvalidUrl(format!(
                "unsupported scheme `{other}` in {base_url}"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| ClientError::InvalidUrl(format!("cannot use {scheme} for {base_url}")))?;

    let has_ws_path = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .is_some_and(|last| last == "ws");
    if !has_ws_path {
        url.path_segments_mut()
            .map_err(|()| ClientError::InvalidUrl(format!("{base_url} cannot be a base")))?
            .pop_if_empty()
            .push("ws");
    }
    Ok(url)
}

/// Connect, run, and reconnect until told to stop.
async fn run_client_task(
    url: Url,
    mut backoff: ReconnectBackoff,
    mut cmd_rx: mpsc::Receiver<ClientCommand>,
    outputs: Outputs,
) {
    loop {
        match connect_async(url.as_str()).await {
            Ok((ws, _response)) => {
                info!(%url, "push connection established");
                backoff.reset();
                outputs.status.send_replace(ConnectionStatus::Connected);
                if let IoExit::Closed = run_io_loop(ws, &mut cmd_rx, &outputs).await {
                    break;
                }
                warn!(%url, "push connection lost");
            }
            Err(e) => debug!(%url, error = %e, "push connection attempt failed"),
        }

        let delay = backoff.next_delay();
        outputs.status.send_replace(ConnectionStatus::Reconnecting {
            attempt: backoff.attempt(),
        });
        debug!(attempt = backoff.attempt(), ?delay, "retrying push connection");

        if let IoExit::Closed = wait_out(delay, &mut cmd_rx).await {
            break;
        }
    }

    outputs.status.send_replace(ConnectionStatus::Disconnected);
    debug!(%url, "push client task exiting");
}

/// Sleep for `delay`, failing any writes that arrive meanwhile.
async fn wait_out(delay: Duration, cmd_rx: &mut mpsc::Receiver<ClientCommand>) -> IoExit {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            () = &mut sleep => return IoExit::Lost,
            cmd = cmd_rx.recv() => match cmd {
                Some(ClientCommand::Send { reply, .. }) => {
                    let _ = reply.send(Err(ClientError::Disconnected));
                }
                Some(ClientCommand::Disconnect) | None => return IoExit::Closed,
            },
        }
    }
}

/// Run one connection's read/write loop.
async fn run_io_loop(
    ws: WsStream,
    cmd_rx: &mut mpsc::Receiver<ClientCommand>,
    outputs: &Outputs,
) -> IoExit {
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => handle_text(text.as_str(), outputs),
                Some(Ok(Message::Close(_))) | None => return IoExit::Lost,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "push read error");
                    return IoExit::Lost;
                }
            },
            cmd = cmd_rx.recv() => match cmd {
                Some(ClientCommand::Send { message, reply }) => {
                    let json = match serde_json::to_string(&message) {
                        Ok(json) => json,
                        Err(e) => {
                            let _ = reply.send(Err(e.into()));
                            continue;
                        }
                    };
                    let written = sink.send(Message::Text(json.into())).await;
                    let lost = written.is_err();
                    let _ = reply.send(written.map_err(|_closed| ClientError::Disconnected));
                    if lost {
                        return IoExit::Lost;
                    }
                }
                Some(ClientCommand::Disconnect) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    return IoExit::Closed;
                }
            },
        }
    }
}

/// Publish the document an inbound frame describes.
fn handle_text(text: &str, outputs: &Outputs) {
    let message = match serde_json::from_str::<ServerMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, "ignoring unreadable push message");
            return;
        }
    };

    if let ServerMessage::Error(payload) = &message {
        warn!(error = %payload.error, "queue server rejected a message");
        return;
    }

    let kind = message.kind();
    if let Some(state) = message.into_state() {
        debug!(kind, "push state received");
        outputs.latest.send_replace(Some(state.clone()));
        // No subscribers is fine; `latest` still has it.
        let _ = outputs.states.send(state);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn push_url_maps_http_to_ws() {
        assert_eq!(
            push_url("http://localhost:3001").unwrap().as_str(),
            "ws://localhost:3001/ws"
        );
        assert_eq!(
            push_url("https://queue.example.com/").unwrap().as_str(),
            "wss://queue.example.com/ws"
        );
    }

    #[test]
    fn push_url_keeps_an_explicit_socket_path() {
        assert_eq!(
            push_url("ws://10.0.0.5:3001/ws").unwrap().as_str(),
            "ws://10.0.0.5:3001/ws"
        );
    }

    #[test]
    fn push_url_appends_under_a_prefix() {
        assert_eq!(
            push_url("http://host/queue").unwrap().as_str(),
            "ws://host/queue/ws"
        );
    }

    #[test]
    fn push_url_rejects_other_schemes() {
        assert!(matches!(
            push_url("ftp://host"),
            Err(ClientError::InvalidUrl(_))
        ));
        assert!(matches!(push_url("not a url"), Err(ClientError::InvalidUrl(_))));
    }
}
