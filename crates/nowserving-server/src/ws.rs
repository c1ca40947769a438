//! `WebSocket` handler for the push transport.
//!
//! Clients connect to `GET /ws` and immediately receive `INITIAL_STATE`
//! with the full document. After that every mutation applied by any client
//! (or by a REST write) arrives as a typed change message carrying the full
//! `counters` array.
//!
//! Inbound frames are decoded with [`Command::decode`]:
//!
//! - operations are applied through the [`QueueHub`] and come back to the
//!   sender through the broadcast, like everyone else
//! - `GET_STATE` re-attaches to the hub and is answered with a unicast
//!   `STATE_UPDATE`, so broadcasts still queued from before the snapshot
//!   are never delivered after it
//! - a validation failure is answered with a unicast `ERROR`
//! - anything malformed is logged and ignored
//!
//! A connection that falls behind the broadcast buffer re-attaches and is
//! sent a fresh `STATE_UPDATE` snapshot.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use nowserving_core::{Command, CommandError};
use nowserving_types::{ErrorPayload, ServerMessage};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::{AppState, QueueHub};

/// The client went away.
struct Disconnected;

/// Upgrade an HTTP request to a push connection.
///
/// # Route
///
/// `GET /ws`
pub async fn ws_queue(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Result<Response, ApiError> {
    if state.hub().is_none() {
        return Err(ApiError::NotFound(
            "push transport is not enabled".to_owned(),
        ));
    }
    Ok(ws.on_upgrade(move |socket| handle_ws(socket, state)))
}

/// Run one connection until the client leaves or the server shuts down.
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
    let Some(hub) = state.hub() else {
        return;
    };
    let connection_id = Uuid::now_v7();
    let mut shutdown = state.shutdown_signal();

    let (initial, mut rx) = hub.attach().await;
    debug!(%connection_id, connections = hub.connection_count(), "push client connected");

    if send(&mut socket, &ServerMessage::InitialState(initial))
        .await
        .is_err()
    {
        debug!(%connection_id, "push client disconnected before initial state");
        return;
    }

    loop {
        tokio::select! {
            result = rx.recv() => {
                let outcome = match result {
                    Ok(message) => send(&mut socket, &message).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(%connection_id, skipped, "push client lagged, resyncing");
                        resync(&mut socket, hub, &mut rx).await
                    }
                    Err(RecvError::Closed) => {
                        debug!(%connection_id, "broadcast channel closed");
                        break;
                    }
                };
                if outcome.is_err() {
                    break;
                }
            }
            frame = socket.recv() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if handle_frame(&mut socket, hub, &mut rx, text.as_str(), connection_id)
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(%connection_id, error = %e, "WebSocket error");
                        break;
                    }
                    Some(Ok(Message::Binary(_) | Message::Pong(_))) => {}
                }
            }
            _ = shutdown.changed() => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
        }
    }

    drop(rx);
    debug!(%connection_id, connections = hub.connection_count(), "push client disconnected");
}

/// Decode and act on one inbound text frame.
async fn handle_frame(
    socket: &mut WebSocket,
    hub: &QueueHub,
    rx: &mut broadcast::Receiver<ServerMessage>,
    text: &str,
    connection_id: Uuid,
) -> Result<(), Disconnected> {
    match Command::decode(text) {
        Ok(Command::GetState) => resync(socket, hub, rx).await,
        Ok(Command::Mutate(op)) => match hub.apply(op).await {
            Ok(_) => Ok(()),
            Err(e) => send_error(socket, e.to_string()).await,
        },
        Err(CommandError::Validation(e)) => {
            debug!(%connection_id, error = %e, "rejected push message");
            send_error(socket, e.to_string()).await
        }
        Err(e) => {
            warn!(%connection_id, error = %e, "ignoring malformed push message");
            Ok(())
        }
    }
}

/// Replace `rx` with a receiver that starts at a fresh snapshot, and send
/// that snapshot as `STATE_UPDATE`.
async fn resync(
    socket: &mut WebSocket,
    hub: &QueueHub,
    rx: &mut broadcast::Receiver<ServerMessage>,
) -> Result<(), Disconnected> {
    let (snapshot, fresh) = hub.attach().await;
    *rx = fresh;
    send(socket, &ServerMessage::StateUpdate(snapshot)).await
}

async fn send_error(socket: &mut WebSocket, error: String) -> Result<(), Disconnected> {
    send(socket, &ServerMessage::Error(ErrorPayload { error })).await
}

async fn send(socket: &mut WebSocket, message: &ServerMessage) -> Result<(), Disconnected> {
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(e) => {
            warn!(kind = message.kind(), "failed to serialize server message: {e}");
            return Ok(());
        }
    };
    socket
        .send(Message::Text(json.into()))
        .await
        .map_err(|_closed| Disconnected)
}
