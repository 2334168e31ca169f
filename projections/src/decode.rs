//! Decoding of change-stream payloads into [`ChangeRecord`]s.
//!
//! Two envelope shapes are accepted:
//!
//! ```text
//! flat:      {"operation": "create", "before": null, "after": {...}}
//!            {"op": "u", "before": {...}, "after": {...}}
//! debezium:  {"schema": {...}, "payload": {"op": "c", "before": null, "after": {...}}}
//! ```
//!
//! Anything else is a [`DecodeError`]. Decode errors are permanent: the
//! record is ignored, never retried.

use sentinel_core::change::{ChangeOperation, ChangeRecord, RowSnapshot, UnknownOperation};
use serde_json::{Map, Value};
use thiserror::Error;

/// Why a payload is not a usable change record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The payload is not JSON
    #[error("Payload is not valid JSON: {0}")]
    InvalidJson(String),

    /// The payload is JSON but not an object
    #[error("Payload is not a JSON object")]
    NotAnObject,

    /// No `operation`/`op` marker was found
    #[error("Change record has no operation marker")]
    MissingOperation,

    /// The operation marker is not recognised
    #[error(transparent)]
    UnknownOperation(#[from] UnknownOperation),

    /// A `before`/`after` snapshot is present but not an object
    #[error("Snapshot '{0}' is not a JSON object")]
    InvalidSnapshot(&'static str),
}

/// Decode a raw change-stream payload.
///
/// # Errors
///
/// Returns [`DecodeError`] when the payload is malformed, schemaless or
/// carries no recognisable operation.
pub fn decode_change(payload: &[u8]) -> Result<ChangeRecord, DecodeError> {
    let root: Value =
        serde_json::from_slice(payload).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;
    let Value::Object(root) = root else {
        return Err(DecodeError::NotAnObject);
    };

    let envelope = envelope(&root);
    let marker = envelope
        .get("operation")
        .or_else(|| envelope.get("op"))
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingOperation)?;
    let operation: ChangeOperation = marker.parse()?;

    Ok(ChangeRecord {
        operation,
        before: snapshot(envelope, "before")?,
        after: snapshot(envelope, "after")?,
    })
}

/// The object carrying the operation: the Debezium `payload` if the root has
/// no marker of its own, else the root.
fn envelope(root: &Map<String, Value>) -> &Map<String, Value> {
    let has_marker = root.contains_key("operation") || root.contains_key("op");
    match root.get("payload") {
        Some(Value::Object(inner)) if !has_marker => inner,
        _ => root,
    }
}

fn snapshot(
    envelope: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<RowSnapshot>, DecodeError> {
    match envelope.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(row)) => Ok(Some(row.clone())),
        Some(_) => Err(DecodeError::InvalidSnapshot(field)),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use serde_json::json;

    fn bytes(value: &Value) -> Vec<u8> {
        serde_json::to_vec(value).unwrap()
    }

    #[test]
    fn flat_envelope() {
        let record = decode_change(&bytes(&json!({
            "operation": "create",
            "before": null,
            "after": {"id": "42", "title": "Seat Reservation: 42"}
        })))
        .unwrap();

        assert_eq!(record.operation, ChangeOperation::Create);
        assert!(record.before.is_none());
        assert_eq!(record.after.unwrap()["id"], "42");
    }

    #[test]
    fn short_marker_on_flat_envelope() {
        let record = decode_change(&bytes(&json!({"op": "D", "before": {"id": 7}}))).unwrap();
        assert_eq!(record.operation, ChangeOperation::Delete);
        assert_eq!(record.before.unwrap()["id"], 7);
    }

    #[test]
    fn debezium_envelope() {
        let record = decode_change(&bytes(&json!({
            "schema": {"type": "struct"},
            "payload": {"op": "r", "before": null, "after": {"id": 1}}
        })))
        .unwrap();
        assert_eq!(record.operation, ChangeOperation::Snapshot);
        assert!(record.after.is_some());
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        assert!(matches!(decode_change(b"not json"), Err(DecodeError::InvalidJson(_))));
        assert_eq!(decode_change(b"[1,2]"), Err(DecodeError::NotAnObject));
        assert_eq!(
            decode_change(&bytes(&json!({"after": {"id": 1}}))),
            Err(DecodeError::MissingOperation)
        );
        assert_eq!(
            decode_change(&bytes(&json!({"schema": {}, "payload": {"after": {"id": 1}}}))),
            Err(DecodeError::MissingOperation)
        );
        assert!(matches!(
            decode_change(&bytes(&json!({"operation": "truncate"}))),
            Err(DecodeError::UnknownOperation(_))
        ));
        assert_eq!(
            decode_change(&bytes(&json!({"operation": "create", "after": "row"}))),
            Err(DecodeError::InvalidSnapshot("after"))
        );
    }
}
