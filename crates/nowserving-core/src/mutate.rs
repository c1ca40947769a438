//! Pure mutators over the queue document.
//!
//! Every function here takes the current [`QueueState`] and the current
//! time and returns the next document. None of them perform I/O, so every
//! transport (push hub, pull handler, local store) funnels its writes
//! through [`apply`] and gets identical semantics.
//!
//! Each mutator stamps `updated_at = max(previous, now)` and records a
//! [`QueueEvent`] carrying the same timestamp, so `updated_at` never moves
//! backwards within one store even if the wall clock does.
//!
//! # Auto-grow
//!
//! Clients can hold a stale counter list, so targeting an id past the end
//! of the document materializes the missing slots instead of failing. Every
//! intermediate slot is backfilled with a vacant counter so the
//! position-equals-id invariant survives.

use nowserving_types::{Counter, QueueEvent, QueueState, id_for_index, vacant_counters};

use crate::error::ValidationError;
use crate::operation::{CounterId, Operation};

/// Bounds on the shape of the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRules {
    /// Number of counters in a freshly initialized document.
    pub default_counters: u32,
    /// Largest counter count that resize or auto-grow may produce.
    pub max_counters: u32,
}

impl Default for QueueRules {
    fn default() -> Self {
        Self {
            default_counters: nowserving_types::DEFAULT_COUNTER_COUNT,
            max_counters: 999,
        }
    }
}

impl QueueRules {
    /// A fresh document with the default number of counters.
    pub fn initial_state(&self, now: i64) -> QueueState {
        QueueState::with_counters(self.default_counters.max(1), now)
    }
}

/// Current wall-clock time in milliseconds since epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Apply one operation and return the next document.
///
/// # Errors
///
/// Returns [`ValidationError::TooManyCounters`] if the operation would grow
/// the document past [`QueueRules::max_counters`], and
/// [`ValidationError::InvalidCount`] for a resize to zero.
pub fn apply(
    state: &QueueState,
    op: Operation,
    rules: &QueueRules,
    now: i64,
) -> Result<QueueState, ValidationError> {
    match op {
        Operation::CallNext(id) => call_next(state, id, rules, now),
        Operation::ClearCounter(id) => clear_counter(state, id, rules, now),
        Operation::SetStatus {
            counter_id,
            is_active,
        } => set_status(state, counter_id, is_active, rules, now),
        Operation::Resize { count } => resize(state, count, rules, now),
        Operation::Reset => Ok(reset(state, rules, now)),
    }
}

/// Mark a counter occupied and bump its served tally.
///
/// # Errors
///
/// Returns [`ValidationError::TooManyCounters`] if `id` is past the ceiling.
pub fn call_next(
    state: &QueueState,
    id: CounterId,
    rules: &QueueRules,
    now: i64,
) -> Result<QueueState, ValidationError> {
    update_counter(state, id, rules, now, |counter| {
        counter.current_number = 1;
        counter.is_active = true;
        counter.served_count = counter.served_count.saturating_add(1);
    })
    .map(|(mut next, ts)| {
        next.last_event = Some(QueueEvent::NumberCalled {
            counter_id: id.get(),
            ts,
        });
        next
    })
}

/// Mark a counter empty. The served tally is untouched.
///
/// # Errors
///
/// Returns [`ValidationError::TooManyCounters`] if `id` is past the ceiling.
pub fn clear_counter(
    state: &QueueState,
    id: CounterId,
    rules: &QueueRules,
    now: i64,
) -> Result<QueueState, ValidationError> {
    update_counter(state, id, rules, now, |counter| {
        counter.current_number = 0;
        counter.is_active = false;
    })
    .map(|(mut next, ts)| {
        next.last_event = Some(QueueEvent::CounterCleared {
            counter_id: id.get(),
            ts,
        });
        next
    })
}

/// Set a counter's serving flag. Activating keeps a non-zero occupancy
/// value and otherwise sets it to 1; deactivating sets it to 0.
///
/// # Errors
///
/// Returns [`ValidationError::TooManyCounters`] if `id` is past the ceiling.
pub fn set_status(
    state: &QueueState,
    id: CounterId,
    is_active: bool,
    rules: &QueueRules,
    now: i64,
) -> Result<QueueState, ValidationError> {
    update_counter(state, id, rules, now, |counter| {
        counter.is_active = is_active;
        counter.current_number = match (is_active, counter.current_number) {
            (false, _) => 0,
            (true, 0) => 1,
            (true, current) => current,
        };
    })
    .map(|(mut next, ts)| {
        next.last_event = Some(QueueEvent::CounterStatusUpdated {
            counter_id: id.get(),
            is_active,
            ts,
        });
        next
    })
}

/// Grow or shrink the document to `count` counters. Only trailing counters
/// are added or removed; retained counters keep every field.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidCount`] for `0` and
/// [`ValidationError::TooManyCounters`] past the ceiling.
pub fn resize(
    state: &QueueState,
    count: u32,
    rules: &QueueRules,
    now: i64,
) -> Result<QueueState, ValidationError> {
    if count == 0 {
        return Err(ValidationError::InvalidCount);
    }
    if count > rules.max_counters {
        return Err(ValidationError::TooManyCounters {
            requested: count,
            max: rules.max_counters,
        });
    }

    let target = usize::try_from(count).map_err(|_overflow| ValidationError::InvalidCount)?;
    let mut counters = state.counters.clone();
    if target < counters.len() {
        counters.truncate(target);
    } else {
        let from = counters.len();
        counters.extend((from..target).map(|index| Counter::vacant(id_for_index(index))));
    }

    let ts = stamp(state, now);
    Ok(QueueState {
        counters,
        last_event: Some(QueueEvent::CountersUpdated { count, ts }),
        updated_at: ts,
    })
}

/// Zero every counter. The current counter count is kept.
pub fn reset(state: &QueueState, rules: &QueueRules, now: i64) -> QueueState {
    let count = match state.counter_count() {
        0 => rules.default_counters.max(1),
        n => n,
    };
    let ts = stamp(state, now);
    QueueState {
        counters: vacant_counters(count),
        last_event: Some(QueueEvent::SystemReset { ts }),
        updated_at: ts,
    }
}

/// Copy the document, materialize the target slot, and edit it in place.
/// Returns the edited copy and its new timestamp.
fn update_counter(
    state: &QueueState,
    id: CounterId,
    rules: &QueueRules,
    now: i64,
    edit: impl FnOnce(&mut Counter),
) -> Result<(QueueState, i64), ValidationError> {
    let too_many = ValidationError::TooManyCounters {
        requested: id.get(),
        max: rules.max_counters,
    };
    if id.get() > rules.max_counters {
        return Err(too_many);
    }

    let mut counters = state.counters.clone();
    let index = id.index();
    while counters.len() <= index {
        let next_id = id_for_index(counters.len());
        counters.push(Counter::vacant(next_id));
    }
    let counter = counters.get_mut(index).ok_or(too_many)?;
    edit(counter);

    let ts = stamp(state, now);
    Ok((
        QueueState {
            counters,
            last_event: state.last_event,
            updated_at: ts,
        },
        ts,
    ))
}

fn stamp(state: &QueueState, now: i64) -> i64 {
    now.max(state.updated_at)
}
