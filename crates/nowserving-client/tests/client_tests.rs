//! Integration tests for the subscription facade.
//!
//! Push and poll clients talk to a real server spawned on `127.0.0.1:0`;
//! local clients share a temporary directory and a change feed.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use std::sync::Arc;
use std::time::Duration;

use nowserving_client::{ClientError, ConnectionStatus, QueueClient, Subscription};
use nowserving_core::QueueRules;
use nowserving_core::config::ClientConfig;
use nowserving_server::{AppState, spawn_server};
use nowserving_store::{Backend, ChangeFeed, RestStore, StateStore};
use nowserving_types::{QueueEvent, QueueState, STATE_KEY};
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(5);

fn fast_config() -> ClientConfig {
    ClientConfig {
        poll_interval_ms: 50,
        reconnect_initial_ms: 50,
        reconnect_max_ms: 200,
    }
}

async fn start(state: AppState) -> (String, Arc<AppState>) {
    let state = Arc::new(state);
    let server = spawn_server("127.0.0.1", 0, Arc::clone(&state)).await.unwrap();
    (format!("http://{}", server.addr), state)
}

fn collect(client: &QueueClient) -> (Subscription, mpsc::UnboundedReceiver<QueueState>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let subscription = client.subscribe(move |state| {
        let _ = tx.send(state);
    });
    (subscription, rx)
}

/// Wait for a delivered document matching `pred`, skipping any others.
async fn next_matching(
    rx: &mut mpsc::UnboundedReceiver<QueueState>,
    pred: impl Fn(&QueueState) -> bool,
) -> QueueState {
    tokio::time::timeout(WAIT, async {
        loop {
            let state = rx.recv().await.unwrap();
            if pred(&state) {
                return state;
            }
        }
    })
    .await
    .unwrap()
}

async fn wait_for_status(client: &QueueClient, pred: impl FnMut(&ConnectionStatus) -> bool) {
    let mut status = client.status();
    tokio::time::timeout(WAIT, status.wait_for(pred))
        .await
        .unwrap()
        .unwrap();
}

/// A URL nothing is listening on.
fn closed_port_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    format!("http://{}", listener.local_addr().unwrap())
}

fn served(state: &QueueState, id: u32) -> u32 {
    state.counter(id).map_or(0, |c| c.served_count)
}

// ============================================================================
// Push
// ============================================================================

#[tokio::test]
async fn push_subscribers_see_writes_from_other_clients() {
    let (base, _state) = start(AppState::push(QueueRules::default())).await;
    let staff = QueueClient::push(&base, &fast_config()).unwrap();
    let display = QueueClient::push(&base, &fast_config()).unwrap();
    wait_for_status(&staff, |s| s.is_connected()).await;
    wait_for_status(&display, |s| s.is_connected()).await;

    let (_subscription, mut rx) = collect(&display);
    let initial = next_matching(&mut rx, |_| true).await;
    assert_eq!(initial.counter_count(), 8);

    assert!(staff.call_next(5).await.unwrap().is_none());

    let seen = next_matching(&mut rx, |s| served(s, 5) == 1).await;
    assert!(matches!(
        seen.last_event,
        Some(QueueEvent::NumberCalled { counter_id: 5, .. })
    ));
    assert_eq!(seen.counter_count(), 8);
}

#[tokio::test]
async fn push_writes_round_trip_to_the_writer() {
    let (base, _state) = start(AppState::push(QueueRules::default())).await;
    let admin = QueueClient::push(&base, &fast_config()).unwrap();
    wait_for_status(&admin, |s| s.is_connected()).await;
    let (_subscription, mut rx) = collect(&admin);

    admin.update_counter_count(3).await.unwrap();
    let resized = next_matching(&mut rx, |s| s.counter_count() == 3).await;
    assert!(matches!(
        resized.last_event,
        Some(QueueEvent::CountersUpdated { count: 3, .. })
    ));

    admin.reset_system().await.unwrap();
    let reset = next_matching(&mut rx, |s| {
        matches!(s.last_event, Some(QueueEvent::SystemReset { .. }))
    })
    .await;
    assert_eq!(reset.counter_count(), 3);
    assert_eq!(admin.get_state().await.unwrap().map(|s| s.counter_count()), Some(3));
}

#[tokio::test]
async fn push_write_without_a_server_is_disconnected() {
    let client = QueueClient::push(&closed_port_url(), &fast_config()).unwrap();

    let err = client.call_next(1).await.unwrap_err();
    assert!(matches!(err, ClientError::Disconnected));

    wait_for_status(&client, |s| matches!(s, ConnectionStatus::Reconnecting { .. })).await;
    assert!(client.get_state().await.unwrap().is_none());
}

#[tokio::test]
async fn push_client_reports_a_server_shutdown() {
    let (base, state) = start(AppState::push(QueueRules::default())).await;
    let client = QueueClient::push(&base, &fast_config()).unwrap();
    wait_for_status(&client, |s| s.is_connected()).await;

    state.begin_shutdown();

    wait_for_status(&client, |s| matches!(s, ConnectionStatus::Reconnecting { .. })).await;
    assert!(matches!(
        client.clear_counter(1).await,
        Err(ClientError::Disconnected)
    ));
}

// ============================================================================
// Poll
// ============================================================================

#[tokio::test]
async fn poll_writes_return_the_new_document() {
    let (base, _state) = start(AppState::pull(StateStore::memory(), QueueRules::default())).await;
    let client = QueueClient::poll(&base, &fast_config()).unwrap();

    let state = client.call_next(3).await.unwrap().unwrap();
    assert_eq!(served(&state, 3), 1);
    assert!(state.counter(3).unwrap().is_occupied());

    let state = client.set_status(3, false).await.unwrap().unwrap();
    assert!(!state.counter(3).unwrap().is_active);
    assert_eq!(served(&state, 3), 1);

    let state = client.get_state().await.unwrap().unwrap();
    assert_eq!(served(&state, 3), 1);
    assert_eq!(*client.status().borrow(), ConnectionStatus::Connected);
}

#[tokio::test]
async fn poll_subscription_picks_up_changes_on_the_next_tick() {
    let (base, _state) = start(AppState::pull(StateStore::memory(), QueueRules::default())).await;
    let display = QueueClient::poll(&base, &fast_config()).unwrap();
    let staff = QueueClient::poll(&base, &fast_config()).unwrap();

    let (_subscription, mut rx) = collect(&display);
    let first = next_matching(&mut rx, |_| true).await;
    assert_eq!(served(&first, 2), 0);

    staff.call_next(2).await.unwrap();
    next_matching(&mut rx, |s| served(s, 2) == 1).await;
}

#[tokio::test]
async fn poll_server_rejections_carry_the_error_text() {
    let (base, _state) = start(AppState::pull(StateStore::memory(), QueueRules::default())).await;
    let client = QueueClient::poll(&base, &fast_config()).unwrap();

    let err = client.call_next(1000).await.unwrap_err();
    assert!(
        matches!(
            err,
            ClientError::Rejected { status: 400, ref message } if message.contains("1000")
        ),
        "{err:?}"
    );
    assert_eq!(*client.status().borrow(), ConnectionStatus::Connected);
}

#[tokio::test]
async fn invalid_arguments_fail_before_any_request() {
    let client = QueueClient::poll("http://127.0.0.1:9", &fast_config()).unwrap();
    assert!(matches!(
        client.update_counter_count(0).await,
        Err(ClientError::Validation(_))
    ));
    assert!(matches!(
        client.call_next(0).await,
        Err(ClientError::Validation(_))
    ));
}

#[tokio::test]
async fn poll_against_an_unreachable_server_marks_disconnected() {
    let client = QueueClient::poll(&closed_port_url(), &fast_config()).unwrap();

    assert!(matches!(client.get_state().await, Err(ClientError::Http(_))));
    assert_eq!(*client.status().borrow(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn poll_against_a_server_without_its_store_marks_disconnected() {
    let store = StateStore::new(
        Backend::Rest(RestStore::new(&closed_port_url(), "token").unwrap()),
        STATE_KEY,
        Duration::from_secs(2),
    );
    let (base, _state) = start(AppState::pull(store, QueueRules::default())).await;
    let client = QueueClient::poll(&base, &fast_config()).unwrap();

    let err = client.get_state().await.unwrap_err();
    assert!(matches!(err, ClientError::Rejected { status: 503, .. }), "{err:?}");
    assert_eq!(*client.status().borrow(), ConnectionStatus::Disconnected);
}

// ============================================================================
// Local fan-out
// ============================================================================

fn local(dir: &std::path::Path, feed: &ChangeFeed) -> QueueClient {
    let config = ClientConfig {
        poll_interval_ms: 60_000,
        ..fast_config()
    };
    QueueClient::local(dir, feed.clone(), QueueRules::default(), &config)
}

#[tokio::test]
async fn local_subscribers_hear_same_device_writes() {
    let dir = tempfile::tempdir().unwrap();
    let feed = ChangeFeed::new();
    let counter_phone = local(dir.path(), &feed);
    let display = local(dir.path(), &feed);

    let (_subscription, mut rx) = collect(&display);
    let initial = next_matching(&mut rx, |_| true).await;
    assert_eq!(initial.counter_count(), 8);

    let written = counter_phone.call_next(4).await.unwrap().unwrap();
    let heard = next_matching(&mut rx, |s| served(s, 4) == 1).await;
    assert_eq!(heard, written);
    assert!(display.status().borrow().is_connected());
}

#[tokio::test]
async fn unsubscribe_stops_delivery() {
    let dir = tempfile::tempdir().unwrap();
    let feed = ChangeFeed::new();
    let client = local(dir.path(), &feed);

    let (subscription, mut rx) = collect(&client);
    next_matching(&mut rx, |_| true).await;
    subscription.unsubscribe();

    // The callback, and the sender inside it, drop when the task exits.
    tokio::time::timeout(WAIT, async { while rx.recv().await.is_some() {} })
        .await
        .unwrap();

    client.call_next(1).await.unwrap();
    assert!(rx.recv().await.is_none());
}
