//! Decoding of inbound push-transport frames.
//!
//! Frames are decoded through a [`serde_json::Value`] rather than straight
//! into [`nowserving_types::ClientMessage`] so that numeric fields get the
//! same lenient treatment as HTTP request bodies, and so that a missing
//! field is reported as a validation failure instead of a parse failure.

use serde_json::Value;

use crate::error::CommandError;
use crate::operation::Operation;

/// A decoded client frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Apply a mutation and broadcast the result.
    Mutate(Operation),
    /// Reply with a snapshot to the sender only.
    GetState,
}

impl Command {
    /// Decode one text frame.
    ///
    /// # Errors
    ///
    /// [`CommandError::Malformed`] if the frame is not a JSON object with a
    /// string `type`, [`CommandError::UnknownType`] for an unrecognized
    /// `type`, and [`CommandError::Validation`] for a recognized message with
    /// a missing or invalid field.
    pub fn decode(frame: &str) -> Result<Self, CommandError> {
        let body: Value =
            serde_json::from_str(frame).map_err(|e| CommandError::Malformed(e.to_string()))?;
        let kind = body
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| CommandError::Malformed("missing string `type`".to_owned()))?;

        let op = match kind {
            "CALL_NEXT" => Operation::call_next_from(&body)?,
            "CLEAR_COUNTER" => Operation::clear_counter_from(&body)?,
            "SET_STATUS" => Operation::set_status_from(&body)?,
            "UPDATE_COUNTERS" => Operation::resize_from(&body)?,
            "RESET_SYSTEM" => Operation::Reset,
            "GET_STATE" => return Ok(Self::GetState),
            other => return Err(CommandError::UnknownType(other.to_owned())),
        };
        Ok(Self::Mutate(op))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use nowserving_types::ClientMessage;

    use super::*;
    use crate::error::ValidationError;
    use crate::operation::CounterId;

    #[test]
    fn decodes_every_message_type() {
        let cases = [
            (
                r#"{"type":"CALL_NEXT","counterId":5}"#,
                Command::Mutate(Operation::CallNext(CounterId::new(5).unwrap())),
            ),
            (
                r#"{"type":"CLEAR_COUNTER","counterId":"2"}"#,
                Command::Mutate(Operation::ClearCounter(CounterId::new(2).unwrap())),
            ),
            (
                r#"{"type":"SET_STATUS","counterId":1,"isActive":true}"#,
                Command::Mutate(Operation::SetStatus {
                    counter_id: CounterId::new(1).unwrap(),
                    is_active: true,
                }),
            ),
            (
                r#"{"type":"UPDATE_COUNTERS","count":4}"#,
                Command::Mutate(Operation::Resize { count: 4 }),
            ),
            (r#"{"type":"RESET_SYSTEM"}"#, Command::Mutate(Operation::Reset)),
            (r#"{"type":"GET_STATE"}"#, Command::GetState),
        ];
        for (frame, expected) in cases {
            assert_eq!(Command::decode(frame).unwrap(), expected, "{frame}");
        }
    }

    #[test]
    fn serialized_client_messages_decode() {
        let msg = ClientMessage::CallNext { counter_id: 9 };
        let frame = serde_json::to_string(&msg).unwrap();
        assert_eq!(
            Command::decode(&frame).unwrap(),
            Command::Mutate(Operation::CallNext(CounterId::new(9).unwrap()))
        );
    }

    #[test]
    fn garbage_is_a_protocol_error() {
        for frame in ["not json", "[1,2]", r#"{"counterId":1}"#, r#"{"type":7}"#] {
            let err = Command::decode(frame).unwrap_err();
            assert!(matches!(err, CommandError::Malformed(_)), "{frame}");
            assert!(err.is_protocol());
        }
    }

    #[test]
    fn unknown_types_are_protocol_errors() {
        let err = Command::decode(r#"{"type":"DANCE"}"#).unwrap_err();
        assert_eq!(err, CommandError::UnknownType("DANCE".to_owned()));
        assert!(err.is_protocol());
    }

    #[test]
    fn missing_fields_are_validation_errors() {
        let err = Command::decode(r#"{"type":"CALL_NEXT"}"#).unwrap_err();
        assert_eq!(
            err,
            CommandError::Validation(ValidationError::MissingField("counterId"))
        );
        assert!(!err.is_protocol());
        assert_eq!(err.to_string(), "counterId required");
    }
}
