//! Shared type definitions for nowserving.
//!
//! This crate is the single source of truth for the queue document and the
//! push-transport wire messages. Types defined here flow downstream to
//! `TypeScript` via `ts-rs` for the staff, display, and admin surfaces.
//!
//! # Modules
//!
//! - [`state`] -- The [`QueueState`] document, its [`Counter`]s, and the
//!   [`QueueEvent`] recorded by each mutation
//! - [`messages`] -- Client and server message envelopes for the push
//!   transport

pub mod messages;
pub mod state;

// Re-export all public types at crate root for convenience.
pub use messages::{ClientMessage, CountChange, CounterChange, ErrorPayload, ServerMessage};
pub use state::{
    Counter, DEFAULT_COUNTER_COUNT, QueueEvent, QueueState, STATE_KEY, id_for_index,
    index_for_id, vacant_counters,
};
