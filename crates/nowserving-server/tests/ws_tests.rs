//! Integration tests for the push transport over a real socket.
//!
//! Each test spawns the server on `127.0.0.1:0` and drives it with
//! `tokio-tungstenite` clients.

#![allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::arithmetic_side_effects)]

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use nowserving_core::{CounterId, Operation, QueueRules};
use nowserving_server::spawn_server;
use nowserving_server::state::AppState;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

async fn start() -> (String, Arc<AppState>) {
    let state = Arc::new(AppState::push(QueueRules::default()));
    let server = spawn_server("127.0.0.1", 0, Arc::clone(&state)).await.unwrap();
    (format!("ws://{}/ws", server.addr), state)
}

async fn connect(url: &str) -> Client {
    let (mut client, _) = connect_async(url).await.unwrap();
    let initial = next_json(&mut client).await;
    assert_eq!(initial["type"], "INITIAL_STATE");
    client
}

async fn next_json(client: &mut Client) -> Value {
    loop {
        let frame = tokio::time::timeout(WAIT, client.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

fn first_served(message: &Value) -> u64 {
    message["data"]["counters"][0]["servedCount"].as_u64().unwrap()
}

async fn send(client: &mut Client, value: &Value) {
    client
        .send(Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

#[tokio::test]
async fn initial_state_is_the_full_document() {
    let (url, _state) = start().await;
    let (mut client, _) = connect_async(url.as_str()).await.unwrap();

    let initial = next_json(&mut client).await;
    assert_eq!(initial["type"], "INITIAL_STATE");
    assert_eq!(initial["data"]["counters"].as_array().map(Vec::len), Some(8));
    assert!(initial["data"]["lastEvent"].is_null());
}

#[tokio::test]
async fn call_next_reaches_every_client() {
    let (url, _state) = start().await;
    let mut a = connect(&url).await;
    let mut b = connect(&url).await;

    send(&mut a, &json!({"type": "CALL_NEXT", "counterId": 5})).await;

    for client in [&mut a, &mut b] {
        let message = next_json(client).await;
        assert_eq!(message["type"], "NUMBER_CALLED");
        assert_eq!(message["data"]["counterId"], 5);
        assert_eq!(message["data"]["counters"].as_array().map(Vec::len), Some(8));
        assert_eq!(message["data"]["counters"][4]["servedCount"], 1);
    }
}

#[tokio::test]
async fn broadcasts_arrive_in_application_order() {
    let (url, _state) = start().await;
    let mut a = connect(&url).await;
    let mut b = connect(&url).await;

    send(&mut a, &json!({"type": "CALL_NEXT", "counterId": 1})).await;
    send(&mut a, &json!({"type": "CLEAR_COUNTER", "counterId": 1})).await;
    send(&mut a, &json!({"type": "UPDATE_COUNTERS", "count": 3})).await;

    for client in [&mut a, &mut b] {
        let kinds = [
            next_json(client).await["type"].clone(),
            next_json(client).await["type"].clone(),
            next_json(client).await["type"].clone(),
        ];
        assert_eq!(kinds, ["NUMBER_CALLED", "COUNTER_CLEARED", "COUNTERS_UPDATED"]);
    }
}

#[tokio::test]
async fn get_state_is_unicast() {
    let (url, _state) = start().await;
    let mut a = connect(&url).await;
    let mut b = connect(&url).await;

    send(&mut a, &json!({"type": "GET_STATE"})).await;
    let reply = next_json(&mut a).await;
    assert_eq!(reply["type"], "STATE_UPDATE");
    assert_eq!(reply["data"]["counters"].as_array().map(Vec::len), Some(8));

    // B sees the next broadcast, not A's snapshot.
    send(&mut a, &json!({"type": "RESET_SYSTEM"})).await;
    assert_eq!(next_json(&mut b).await["type"], "SYSTEM_RESET");
}

#[tokio::test]
async fn get_state_never_moves_the_view_backwards() {
    let (url, _state) = start().await;
    let mut a = connect(&url).await;

    for n in 1..=200 {
        send(&mut a, &json!({"type": "CALL_NEXT", "counterId": 1})).await;
        if n % 10 == 0 {
            send(&mut a, &json!({"type": "GET_STATE"})).await;
        }
    }
    send(&mut a, &json!({"type": "GET_STATE"})).await;

    let mut seen = 0;
    loop {
        let message = next_json(&mut a).await;
        let served = first_served(&message);
        assert!(served >= seen, "{} went from {seen} to {served}", message["type"]);
        seen = served;
        if message["type"] == "STATE_UPDATE" && served == 200 {
            break;
        }
    }
}

#[tokio::test]
async fn slow_connections_are_resynced_with_a_snapshot() {
    const CALLS: u64 = 1500;

    let (url, state) = start().await;
    let hub = state.hub().unwrap();
    hub.apply(Operation::Resize { count: 999 }).await.unwrap();
    let mut a = connect(&url).await;

    // Large documents fill the socket buffers while `a` is not reading, so
    // the connection falls more than a broadcast buffer behind.
    let id = CounterId::new(1).unwrap();
    for _ in 0..CALLS {
        hub.apply(Operation::CallNext(id)).await.unwrap();
    }

    let mut resynced = false;
    loop {
        let message = next_json(&mut a).await;
        resynced |= message["type"] == "STATE_UPDATE";
        if resynced && first_served(&message) == CALLS {
            break;
        }
    }
}

#[tokio::test]
async fn invalid_messages_get_a_unicast_error() {
    let (url, state) = start().await;
    let mut a = connect(&url).await;
    let mut b = connect(&url).await;

    send(&mut a, &json!({"type": "CALL_NEXT"})).await;
    let reply = next_json(&mut a).await;
    assert_eq!(reply["type"], "ERROR");
    assert_eq!(reply["data"]["error"], "counterId required");

    send(&mut a, &json!({"type": "SET_STATUS", "counterId": 2, "isActive": true})).await;
    let message = next_json(&mut b).await;
    assert_eq!(message["type"], "COUNTER_STATUS_UPDATED");
    assert_eq!(message["data"]["counterId"], 2);

    let snapshot = state.hub().unwrap().snapshot().await;
    assert_eq!(snapshot.total_served(), 0);
}

#[tokio::test]
async fn malformed_frames_are_ignored() {
    let (url, _state) = start().await;
    let mut a = connect(&url).await;

    a.send(Message::Text("{not json".to_owned().into())).await.unwrap();
    send(&mut a, &json!({"type": "DANCE"})).await;
    send(&mut a, &json!({"type": "CALL_NEXT", "counterId": 2})).await;

    let message = next_json(&mut a).await;
    assert_eq!(message["type"], "NUMBER_CALLED");
    assert_eq!(message["data"]["counterId"], 2);
}

#[tokio::test]
async fn closed_connections_leave_the_broadcast_set() {
    let (url, state) = start().await;
    let hub = state.hub().unwrap();

    let mut a = connect(&url).await;
    let b = connect(&url).await;
    assert_eq!(hub.connection_count(), 2);

    drop(b);
    let deadline = tokio::time::Instant::now() + WAIT;
    while hub.connection_count() > 1 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(hub.connection_count(), 1);

    send(&mut a, &json!({"type": "CALL_NEXT", "counterId": 1})).await;
    assert_eq!(next_json(&mut a).await["type"], "NUMBER_CALLED");
}

#[tokio::test]
async fn shutdown_closes_push_connections() {
    let (url, state) = start().await;
    let mut a = connect(&url).await;

    state.begin_shutdown();
    let closed = tokio::time::timeout(WAIT, async {
        loop {
            match a.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return true,
                Some(Ok(_)) => {}
            }
        }
    })
    .await
    .unwrap();
    assert!(closed);
}
