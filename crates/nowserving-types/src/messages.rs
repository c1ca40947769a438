//! Push-transport message envelopes.
//!
//! Server to client messages use an adjacently tagged `{type, data}`
//! envelope. Client to server messages are internally tagged
//! `{type, counterId?, isActive?, count?}`.
//!
//! Snapshot messages carry the whole [`QueueState`]; change messages carry
//! the full `counters` array plus the triggering counter id or count, which
//! is enough for a subscriber to rebuild the document with
//! [`ServerMessage::into_state`].

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::state::{Counter, QueueEvent, QueueState, index_for_id};

/// A message sent by a staff terminal, display, or admin panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export, export_to = "bindings/")]
pub enum ClientMessage {
    /// Call the next customer to a counter.
    CallNext {
        /// Target counter.
        #[serde(rename = "counterId")]
        counter_id: u32,
    },
    /// Mark a counter empty.
    ClearCounter {
        /// Target counter.
        #[serde(rename = "counterId")]
        counter_id: u32,
    },
    /// Set a counter's serving flag.
    SetStatus {
        /// Target counter.
        #[serde(rename = "counterId")]
        counter_id: u32,
        /// The new serving flag.
        #[serde(rename = "isActive")]
        is_active: bool,
    },
    /// Change the number of counters.
    UpdateCounters {
        /// The new number of counters.
        count: u32,
    },
    /// Reset every counter.
    ResetSystem,
    /// Ask for a unicast snapshot.
    GetState,
}

/// Payload of a change that targeted one counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct CounterChange {
    /// The counter the operation targeted.
    pub counter_id: u32,
    /// Every counter after the change.
    pub counters: Vec<Counter>,
    /// Document timestamp after the change.
    #[ts(type = "number")]
    pub updated_at: i64,
}

/// Payload of a counter-count change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct CountChange {
    /// The new number of counters.
    pub count: u32,
    /// Every counter after the change.
    pub counters: Vec<Counter>,
    /// Document timestamp after the change.
    #[ts(type = "number")]
    pub updated_at: i64,
}

/// Payload of a rejected request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ErrorPayload {
    /// Human-readable description of what was wrong.
    pub error: String,
}

/// A message pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export, export_to = "bindings/")]
pub enum ServerMessage {
    /// First message on every connection.
    InitialState(QueueState),
    /// Unicast reply to `GET_STATE`, or a resync after falling behind.
    StateUpdate(QueueState),
    /// Broadcast after a call-next.
    NumberCalled(CounterChange),
    /// Broadcast after a clear.
    CounterCleared(CounterChange),
    /// Broadcast after a status change.
    CounterStatusUpdated(CounterChange),
    /// Broadcast after a resize.
    CountersUpdated(CountChange),
    /// Broadcast after a reset.
    SystemReset(QueueState),
    /// Unicast reply to a request that failed validation.
    Error(ErrorPayload),
}

impl ServerMessage {
    /// The broadcast that announces `state`, chosen from its `last_event`.
    ///
    /// A document without an event is announced as a plain snapshot.
    pub fn announce(state: &QueueState) -> Self {
        let change = |counter_id| CounterChange {
            counter_id,
            counters: state.counters.clone(),
            updated_at: state.updated_at,
        };

        match state.last_event {
            Some(QueueEvent::NumberCalled { counter_id, .. }) => {
                Self::NumberCalled(change(counter_id))
            }
            Some(QueueEvent::CounterCleared { counter_id, .. }) => {
                Self::CounterCleared(change(counter_id))
            }
            Some(QueueEvent::CounterStatusUpdated { counter_id, .. }) => {
                Self::CounterStatusUpdated(change(counter_id))
            }
            Some(QueueEvent::CountersUpdated { count, .. }) => Self::CountersUpdated(CountChange {
                count,
                counters: state.counters.clone(),
                updated_at: state.updated_at,
            }),
            Some(QueueEvent::SystemReset { .. }) => Self::SystemReset(state.clone()),
            None => Self::StateUpdate(state.clone()),
        }
    }

    /// Rebuild the full document a state-bearing message describes.
    ///
    /// Returns `None` for [`ServerMessage::Error`].
    pub fn into_state(self) -> Option<QueueState> {
        match self {
            Self::InitialState(state) | Self::StateUpdate(state) | Self::SystemReset(state) => {
                Some(state)
            }
            Self::NumberCalled(change) => Some(QueueState {
                last_event: Some(QueueEvent::NumberCalled {
                    counter_id: change.counter_id,
                    ts: change.updated_at,
                }),
                counters: change.counters,
                updated_at: change.updated_at,
            }),
            Self::CounterCleared(change) => Some(QueueState {
                last_event: Some(QueueEvent::CounterCleared {
                    counter_id: change.counter_id,
                    ts: change.updated_at,
                }),
                counters: change.counters,
                updated_at: change.updated_at,
            }),
            Self::CounterStatusUpdated(change) => {
                let is_active = index_for_id(change.counter_id)
                    .and_then(|index| change.counters.get(index))
                    .is_some_and(|c| c.is_active);
                Some(QueueState {
                    last_event: Some(QueueEvent::CounterStatusUpdated {
                        counter_id: change.counter_id,
                        is_active,
                        ts: change.updated_at,
                    }),
                    counters: change.counters,
                    updated_at: change.updated_at,
                })
            }
            Self::CountersUpdated(change) => Some(QueueState {
                last_event: Some(QueueEvent::CountersUpdated {
                    count: change.count,
                    ts: change.updated_at,
                }),
                counters: change.counters,
                updated_at: change.updated_at,
            }),
            Self::Error(_) => None,
        }
    }

    /// Wire name of the message type, for logging.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InitialState(_) => "INITIAL_STATE",
            Self::StateUpdate(_) => "STATE_UPDATE",
            Self::NumberCalled(_) => "NUMBER_CALLED",
            Self::CounterCleared(_) => "COUNTER_CLEARED",
            Self::CounterStatusUpdated(_) => "COUNTER_STATUS_UPDATED",
            Self::CountersUpdated(_) => "COUNTERS_UPDATED",
            Self::SystemReset(_) => "SYSTEM_RESET",
            Self::Error(_) => "ERROR",
        }
    }
}
