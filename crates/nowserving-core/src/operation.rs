//! Validated queue operations and lenient field extraction.
//!
//! Request bodies arrive from browsers and older clients, so numeric fields
//! are accepted either as JSON numbers or as numeric strings. Everything
//! else about a field is checked strictly before an [`Operation`] exists;
//! the mutators never see an invalid id or count.

use core::fmt;
use core::num::NonZeroU32;

use nowserving_types::{ClientMessage, index_for_id};
use serde_json::Value;

use crate::error::ValidationError;

/// A validated, 1-based counter id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CounterId(NonZeroU32);

impl CounterId {
    /// Wrap a raw id. Returns `None` for `0`.
    pub const fn new(id: u32) -> Option<Self> {
        match NonZeroU32::new(id) {
            Some(id) => Some(Self(id)),
            None => None,
        }
    }

    /// The raw 1-based id.
    pub const fn get(self) -> u32 {
        self.0.get()
    }

    /// The vector position this id occupies.
    pub fn index(self) -> usize {
        index_for_id(self.get()).unwrap_or_default()
    }
}

impl fmt::Display for CounterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One of the five queue mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Call the next customer to a counter.
    CallNext(CounterId),
    /// Mark a counter empty.
    ClearCounter(CounterId),
    /// Set a counter's serving flag.
    SetStatus {
        /// Target counter.
        counter_id: CounterId,
        /// The new serving flag.
        is_active: bool,
    },
    /// Change the number of counters.
    Resize {
        /// The new number of counters, at least 1.
        count: u32,
    },
    /// Reset every counter.
    Reset,
}

impl Operation {
    /// Short name for logging.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::CallNext(_) => "call_next",
            Self::ClearCounter(_) => "clear_counter",
            Self::SetStatus { .. } => "set_status",
            Self::Resize { .. } => "resize",
            Self::Reset => "reset",
        }
    }

    /// The counter this operation targets, if any.
    pub const fn counter_id(&self) -> Option<CounterId> {
        match self {
            Self::CallNext(id) | Self::ClearCounter(id) | Self::SetStatus { counter_id: id, .. } => {
                Some(*id)
            }
            Self::Resize { .. } | Self::Reset => None,
        }
    }

    /// Build a call-next from a request body.
    pub fn call_next_from(body: &Value) -> Result<Self, ValidationError> {
        counter_id_field(body).map(Self::CallNext)
    }

    /// Build a clear from a request body.
    pub fn clear_counter_from(body: &Value) -> Result<Self, ValidationError> {
        counter_id_field(body).map(Self::ClearCounter)
    }

    /// Build a status change from a request body. An absent `isActive`
    /// means inactive.
    pub fn set_status_from(body: &Value) -> Result<Self, ValidationError> {
        Ok(Self::SetStatus {
            counter_id: counter_id_field(body)?,
            is_active: active_flag_field(body)?,
        })
    }

    /// Build a resize from a request body.
    pub fn resize_from(body: &Value) -> Result<Self, ValidationError> {
        count_field(body).map(|count| Self::Resize { count })
    }
}

impl From<Operation> for ClientMessage {
    fn from(op: Operation) -> Self {
        match op {
            Operation::CallNext(id) => Self::CallNext { counter_id: id.get() },
            Operation::ClearCounter(id) => Self::ClearCounter { counter_id: id.get() },
            Operation::SetStatus {
                counter_id,
                is_active,
            } => Self::SetStatus {
                counter_id: counter_id.get(),
                is_active,
            },
            Operation::Resize { count } => Self::UpdateCounters { count },
            Operation::Reset => Self::ResetSystem,
        }
    }
}

/// Extract the required `counterId`.
pub fn counter_id_field(body: &Value) -> Result<CounterId, ValidationError> {
    const FIELD: &str = "counterId";

    let raw = match body.get(FIELD) {
        None | Some(Value::Null) => return Err(ValidationError::MissingField(FIELD)),
        Some(raw) => raw,
    };

    let id = parse_u32(raw).ok_or_else(|| ValidationError::InvalidField {
        field: FIELD,
        reason: format!("expected a positive integer, got {raw}"),
    })?;

    CounterId::new(id).ok_or(ValidationError::MissingField(FIELD))
}

/// Extract the optional `isActive` flag. Absent or `null` means `false`.
pub fn active_flag_field(body: &Value) -> Result<bool, ValidationError> {
    const FIELD: &str = "isActive";

    match body.get(FIELD) {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(flag)) => Ok(*flag),
        Some(raw) => match parse_u32(raw) {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(ValidationError::InvalidField {
                field: FIELD,
                reason: format!("expected a boolean, got {raw}"),
            }),
        },
    }
}

/// Extract the required `count`, which must be at least 1.
pub fn count_field(body: &Value) -> Result<u32, ValidationError> {
    body.get("count")
        .and_then(parse_u32)
        .filter(|count| *count >= 1)
        .ok_or(ValidationError::InvalidCount)
}

/// Interpret a JSON number or numeric string as a `u32`.
fn parse_u32(raw: &Value) -> Option<u32> {
    match raw {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
