//! Reservation events published after a successful commit.
//!
//! A [`ReservationEvent`] is immutable once built and travels as JSON with
//! camelCase field names:
//!
//! ```json
//! {"eventId":"…","resourceId":42,"status":"RESERVED","occurredAt":"2024-01-01T00:00:00Z"}
//! ```
//!
//! `eventId` exists for consumer-side de-duplication only.

use crate::environment::Clock;
use crate::resource::ResourceId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Status carried by confirmed reservations.
pub const RESERVED: &str = "RESERVED";

/// Errors that can occur while encoding or decoding events.
#[derive(Error, Debug)]
pub enum EventError {
    /// Failed to serialize an event
    #[error("Failed to serialize event: {0}")]
    Serialization(String),

    /// Failed to deserialize an event
    #[error("Failed to deserialize event: {0}")]
    Deserialization(String),
}

/// A confirmed reservation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationEvent {
    /// Unique event id
    pub event_id: Uuid,
    /// The reserved resource
    pub resource_id: ResourceId,
    /// Event status, [`RESERVED`] for confirmed reservations
    pub status: String,
    /// When the reservation committed
    pub occurred_at: DateTime<Utc>,
}

impl ReservationEvent {
    /// Build the event for a freshly committed reservation.
    #[must_use]
    pub fn reserved(resource_id: ResourceId, clock: &dyn Clock) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            resource_id,
            status: RESERVED.to_string(),
            occurred_at: clock.now(),
        }
    }

    /// Partition key: the resource id rendered as a string.
    #[must_use]
    pub fn key(&self) -> String {
        self.resource_id.to_string()
    }

    /// Serialize to the JSON wire format.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Serialization`] if encoding fails.
    pub fn to_json(&self) -> Result<Vec<u8>, EventError> {
        serde_json::to_vec(self).map_err(|e| EventError::Serialization(e.to_string()))
    }

    /// Parse from the JSON wire format.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Deserialization`] if the payload is not a valid event.
    pub fn from_json(bytes: &[u8]) -> Result<Self, EventError> {
        serde_json::from_slice(bytes).map_err(|e| EventError::Deserialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::environment::Clock;
    use chrono::TimeZone;

    struct Frozen;

    impl Clock for Frozen {
        fn now(&self) -> DateTime<Utc> {
            Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
        }
    }

    #[test]
    fn wire_format_uses_camel_case_fields() {
        let event = ReservationEvent::reserved(ResourceId(42), &Frozen);
        let value: serde_json::Value = serde_json::from_slice(&event.to_json().unwrap()).unwrap();

        let object = value.as_object().unwrap();
        let mut keys: Vec<_> = object.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, ["eventId", "occurredAt", "resourceId", "status"]);
        assert_eq!(value["resourceId"], 42);
        assert_eq!(value["status"], "RESERVED");
        assert_eq!(value["occurredAt"], "2025-03-01T12:00:00Z");
    }

    #[test]
    fn key_is_resource_id() {
        let event = ReservationEvent::reserved(ResourceId(7), &Frozen);
        assert_eq!(event.key(), "7");
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            ReservationEvent::from_json(b"not json"),
            Err(EventError::Deserialization(_))
        ));
    }
}
