//! Error types for operation validation and command decoding.
//!
//! [`ValidationError`] is the caller's fault and is never retried: the
//! HTTP transport maps it to `400`, the push transport to a unicast
//! `ERROR` message. [`CommandError`] additionally covers push messages that
//! are not well-formed at all, which are logged and ignored.

/// A request carried a missing or invalid field.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// A required field was absent, `null`, or zero.
    #[error("{0} required")]
    MissingField(&'static str),

    /// A field was present but could not be interpreted.
    #[error("invalid {field}: {reason}")]
    InvalidField {
        /// Wire name of the field.
        field: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// The requested counter count was not an integer of at least 1.
    #[error("Invalid counter count")]
    InvalidCount,

    /// The operation would grow the document past the configured ceiling.
    #[error("counter {requested} exceeds the limit of {max} counters")]
    TooManyCounters {
        /// The id or count that was asked for.
        requested: u32,
        /// The configured ceiling.
        max: u32,
    },
}

/// A push-transport message could not be turned into a command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// The frame was not a JSON object with a string `type`.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The `type` was not one the server understands.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// The message was well-formed but a field was invalid.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl CommandError {
    /// Whether the message should be ignored rather than answered.
    pub const fn is_protocol(&self) -> bool {
        matches!(self, Self::Malformed(_) | Self::UnknownType(_))
    }
}
