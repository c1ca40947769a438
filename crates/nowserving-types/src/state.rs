//! The queue document shared by every transport.
//!
//! [`QueueState`] is the single root document. It is stored under
//! [`STATE_KEY`] by the durable stores, held in memory by the push hub, and
//! sent whole over the wire. The vector position of a [`Counter`] is its
//! identity: `counters[i].id == i + 1` for every `i`.
//!
//! # Tolerant decoding
//!
//! Older clients wrote the document by assigning past the end of a
//! JavaScript array, which serializes the gap as `null`. Decoding repairs
//! such documents so the positional-id invariant always holds once a value
//! is in memory:
//!
//! - `null` entries become vacant counters with their positional id
//! - ids are rewritten to their position
//! - `currentNumber` is clamped into `{0, 1}`
//! - an empty `counters` array is re-seeded with [`DEFAULT_COUNTER_COUNT`]
//! - a `lastEvent` that does not decode becomes `None`

use serde::{Deserialize, Deserializer, Serialize};
use ts_rs::TS;

/// Storage key of the queue document in every key-value store.
pub const STATE_KEY: &str = "queue:state";

/// Number of counters in a freshly initialized document.
pub const DEFAULT_COUNTER_COUNT: u32 = 8;

/// A staff service point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct Counter {
    /// 1-based id, equal to the counter's position in [`QueueState::counters`].
    #[serde(default)]
    pub id: u32,
    /// Occupancy flag encoded as `0` (empty) or `1` (occupied).
    #[serde(default)]
    pub current_number: u32,
    /// Whether the counter is currently serving.
    #[serde(default)]
    pub is_active: bool,
    /// Number of customers called to this counter since the last reset.
    #[serde(default)]
    pub served_count: u32,
}

impl Counter {
    /// An empty, inactive counter with a zero tally.
    pub const fn vacant(id: u32) -> Self {
        Self {
            id,
            current_number: 0,
            is_active: false,
            served_count: 0,
        }
    }

    /// Whether the counter is actively serving someone.
    pub const fn is_occupied(&self) -> bool {
        self.is_active && self.current_number > 0
    }
}

/// The last mutation applied to a [`QueueState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export, export_to = "bindings/")]
pub enum QueueEvent {
    /// A customer was called to a counter.
    NumberCalled {
        /// Target counter.
        #[serde(rename = "counterId")]
        counter_id: u32,
        /// Milliseconds since epoch.
        #[ts(type = "number")]
        ts: i64,
    },
    /// A counter was emptied.
    CounterCleared {
        /// Target counter.
        #[serde(rename = "counterId")]
        counter_id: u32,
        /// Milliseconds since epoch.
        #[ts(type = "number")]
        ts: i64,
    },
    /// A counter's serving flag was set explicitly.
    CounterStatusUpdated {
        /// Target counter.
        #[serde(rename = "counterId")]
        counter_id: u32,
        /// The new serving flag.
        #[serde(rename = "isActive")]
        is_active: bool,
        /// Milliseconds since epoch.
        #[ts(type = "number")]
        ts: i64,
    },
    /// The number of counters changed.
    CountersUpdated {
        /// The new number of counters.
        count: u32,
        /// Milliseconds since epoch.
        #[ts(type = "number")]
        ts: i64,
    },
    /// Every counter was reset.
    SystemReset {
        /// Milliseconds since epoch.
        #[ts(type = "number")]
        ts: i64,
    },
}

impl QueueEvent {
    /// Timestamp of the event.
    pub const fn ts(&self) -> i64 {
        match self {
            Self::NumberCalled { ts, .. }
            | Self::CounterCleared { ts, .. }
            | Self::CounterStatusUpdated { ts, .. }
            | Self::CountersUpdated { ts, .. }
            | Self::SystemReset { ts } => *ts,
        }
    }

    /// The counter the event targeted, if it targeted a single counter.
    pub const fn counter_id(&self) -> Option<u32> {
        match self {
            Self::NumberCalled { counter_id, .. }
            | Self::CounterCleared { counter_id, .. }
            | Self::CounterStatusUpdated { counter_id, .. } => Some(*counter_id),
            Self::CountersUpdated { .. } | Self::SystemReset { .. } => None,
        }
    }

    /// Wire name of the event type.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NumberCalled { .. } => "NUMBER_CALLED",
            Self::CounterCleared { .. } => "COUNTER_CLEARED",
            Self::CounterStatusUpdated { .. } => "COUNTER_STATUS_UPDATED",
            Self::CountersUpdated { .. } => "COUNTERS_UPDATED",
            Self::SystemReset { .. } => "SYSTEM_RESET",
        }
    }
}

/// The root queue document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct QueueState {
    /// Counters ordered by id; position `i` holds id `i + 1`.
    #[serde(default = "default_counters", deserialize_with = "deserialize_counters")]
    pub counters: Vec<Counter>,
    /// The last mutation applied, `null` before the first one.
    #[serde(default, deserialize_with = "deserialize_last_event")]
    pub last_event: Option<QueueEvent>,
    /// Milliseconds since epoch of the last mutation.
    #[serde(default)]
    #[ts(type = "number")]
    pub updated_at: i64,
}

impl QueueState {
    /// A fresh document with `count` vacant counters and no event.
    pub fn with_counters(count: u32, now: i64) -> Self {
        Self {
            counters: vacant_counters(count),
            last_event: None,
            updated_at: now,
        }
    }

    /// Look up a counter by its 1-based id.
    pub fn counter(&self, id: u32) -> Option<&Counter> {
        index_for_id(id).and_then(|index| self.counters.get(index))
    }

    /// Number of counters in the document.
    pub fn counter_count(&self) -> u32 {
        u32::try_from(self.counters.len()).unwrap_or(u32::MAX)
    }

    /// Number of counters currently serving someone.
    pub fn occupied_count(&self) -> usize {
        self.counters.iter().filter(|c| c.is_occupied()).count()
    }

    /// Sum of every counter's served tally.
    pub fn total_served(&self) -> u64 {
        self.counters
            .iter()
            .map(|c| u64::from(c.served_count))
            .fold(0_u64, u64::saturating_add)
    }

    /// Whether the document satisfies the structural invariants: non-empty,
    /// positional ids, and `currentNumber` in `{0, 1}`.
    pub fn is_well_formed(&self) -> bool {
        !self.counters.is_empty()
            && self
                .counters
                .iter()
                .enumerate()
                .all(|(index, c)| c.id == id_for_index(index) && c.current_number <= 1)
    }
}

/// `count` vacant counters with ids `1..=count`.
pub fn vacant_counters(count: u32) -> Vec<Counter> {
    (1..=count).map(Counter::vacant).collect()
}

/// The 1-based id that belongs at vector position `index`.
pub fn id_for_index(index: usize) -> u32 {
    u32::try_from(index)
        .ok()
        .and_then(|i| i.checked_add(1))
        .unwrap_or(u32::MAX)
}

/// The vector position of a 1-based id. `None` for id `0`.
pub fn index_for_id(id: u32) -> Option<usize> {
    id.checked_sub(1).and_then(|i| usize::try_from(i).ok())
}

fn default_counters() -> Vec<Counter> {
    vacant_counters(DEFAULT_COUNTER_COUNT)
}

fn deserialize_counters<'de, D>(deserializer: D) -> Result<Vec<Counter>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Vec<Option<Counter>>> = Option::deserialize(deserializer)?;
    let raw = raw.unwrap_or_default();
    if raw.is_empty() {
        return Ok(vacant_counters(DEFAULT_COUNTER_COUNT));
    }

    Ok(raw
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            let id = id_for_index(index);
            slot.map_or_else(
                || Counter::vacant(id),
                |c| Counter {
                    id,
                    current_number: c.current_number.min(1),
                    ..c
                },
            )
        })
        .collect())
}

fn deserialize_last_event<'de, D>(deserializer: D) -> Result<Option<QueueEvent>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(raw).ok())
}
