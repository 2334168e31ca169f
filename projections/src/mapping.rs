//! Mapping of catalog row snapshots to read-model documents.

use sentinel_core::change::{ChangeRecord, RowSnapshot};
use sentinel_core::projection::{Metadata, ReadModelDocument};
use serde_json::{Map, Value};
use thiserror::Error;

/// What a change record asks of the read model.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// Write this document under its id
    Upsert(ReadModelDocument),
    /// Remove the document with this id
    Delete(String),
}

impl Projection {
    /// Id of the affected document.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Upsert(document) => &document.id,
            Self::Delete(id) => id,
        }
    }

    /// Operation label for metrics and logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Upsert(_) => "upsert",
            Self::Delete(_) => "delete",
        }
    }
}

/// Why a decoded record cannot be projected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MappingError {
    /// A delete without a `before` snapshot carrying an id
    #[error("Delete record has no before.id")]
    DeleteWithoutId,

    /// An upsert without an `after` snapshot carrying an id
    #[error("Upsert record has no after.id")]
    UpsertWithoutId,
}

/// Turn a decoded change record into a read-model operation.
///
/// # Errors
///
/// Returns [`MappingError`] when the record does not identify a document.
pub fn project(record: &ChangeRecord) -> Result<Projection, MappingError> {
    if record.operation.is_upsert() {
        let document = record
            .after
            .as_ref()
            .and_then(document_from_row)
            .ok_or(MappingError::UpsertWithoutId)?;
        Ok(Projection::Upsert(document))
    } else {
        let id = record
            .before
            .as_ref()
            .and_then(row_id)
            .ok_or(MappingError::DeleteWithoutId)?;
        Ok(Projection::Delete(id))
    }
}

/// Build a document from a row, or `None` if the row has no usable id.
#[must_use]
pub fn document_from_row(row: &RowSnapshot) -> Option<ReadModelDocument> {
    Some(ReadModelDocument {
        id: row_id(row)?,
        title: text_field(row, "title"),
        category: text_field(row, "category"),
        status: text_field(row, "status"),
        metadata: metadata(row.get("metadata")),
    })
}

/// Row id as a string. Numbers are rendered in decimal.
#[must_use]
pub fn row_id(row: &RowSnapshot) -> Option<String> {
    match row.get("id")? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

fn text_field(row: &RowSnapshot, field: &str) -> String {
    match row.get(field) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

/// Normalise a metadata column.
///
/// Connectors render `jsonb` columns as JSON text, so strings get a second
/// parse. Whatever is not an object ends up wrapped.
#[must_use]
pub fn metadata(value: Option<&Value>) -> Metadata {
    match value {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(Value::String(text)) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => map,
            Ok(Value::Null) => Map::new(),
            Ok(other) => wrap("value", other),
            Err(_) => wrap("raw", Value::String(text.clone())),
        },
        Some(other) => wrap("value", other.clone()),
    }
}

fn wrap(key: &str, value: Value) -> Metadata {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    map
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use serde_json::json;

    fn row(value: Value) -> RowSnapshot {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn maps_full_row() {
        let document = document_from_row(&row(json!({
            "id": 42,
            "title": "Seat Reservation: 42",
            "category": "TICKETING",
            "status": "RESERVED",
            "metadata": {"seat_id": 42}
        })))
        .unwrap();

        assert_eq!(document.id, "42");
        assert_eq!(document.title, "Seat Reservation: 42");
        assert_eq!(document.category, "TICKETING");
        assert_eq!(document.status, "RESERVED");
        assert_eq!(document.metadata["seat_id"], 42);
    }

    #[test]
    fn missing_fields_default_to_empty() {
        let document = document_from_row(&row(json!({"id": "a"}))).unwrap();
        assert_eq!(document.status, "");
        assert_eq!(document.title, "");
        assert!(document.metadata.is_empty());
    }

    #[test]
    fn rows_without_id_are_rejected() {
        assert!(document_from_row(&row(json!({"title": "x"}))).is_none());
        assert!(document_from_row(&row(json!({"id": ""}))).is_none());
        assert!(document_from_row(&row(json!({"id": null}))).is_none());
    }

    #[test]
    fn metadata_rules() {
        assert_eq!(metadata(None), Map::new());
        assert_eq!(metadata(Some(&Value::Null)), Map::new());
        assert_eq!(
            Value::Object(metadata(Some(&json!(r#"{"source":"SENTINEL"}"#)))),
            json!({"source": "SENTINEL"})
        );
        assert_eq!(Value::Object(metadata(Some(&json!("[1,2]")))), json!({"value": [1, 2]}));
        assert_eq!(Value::Object(metadata(Some(&json!(5)))), json!({"value": 5}));
        assert_eq!(
            Value::Object(metadata(Some(&json!("not json {")))),
            json!({"raw": "not json {"})
        );
    }

    #[test]
    fn projects_upserts_and_deletes() {
        let upsert = project(&ChangeRecord::create(row(json!({"id": 1})))).unwrap();
        assert_eq!(upsert.id(), "1");
        assert_eq!(upsert.label(), "upsert");

        let delete = project(&ChangeRecord::delete(row(json!({"id": "1"})))).unwrap();
        assert_eq!(delete, Projection::Delete("1".to_string()));

        let mut headless = ChangeRecord::delete(Map::new());
        assert_eq!(project(&headless), Err(MappingError::DeleteWithoutId));
        headless.before = None;
        assert_eq!(project(&headless), Err(MappingError::DeleteWithoutId));

        let empty_update = ChangeRecord {
            after: None,
            ..ChangeRecord::update(None, Map::new())
        };
        assert_eq!(project(&empty_update), Err(MappingError::UpsertWithoutId));
    }
}
