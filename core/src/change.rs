//! Change-data-capture records.
//!
//! A [`ChangeRecord`] describes one row mutation in the catalog store with
//! optional before/after snapshots. Records arrive at least once and may be
//! replayed; consumers apply them idempotently by the entity id.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Flat, string-keyed row snapshot with dynamically typed values.
pub type RowSnapshot = serde_json::Map<String, serde_json::Value>;

/// Kind of row mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOperation {
    /// Row inserted
    Create,
    /// Row updated
    Update,
    /// Row removed
    Delete,
    /// Row read during an initial snapshot
    Snapshot,
}

impl ChangeOperation {
    /// Whether this operation writes the `after` snapshot into the read model.
    #[must_use]
    pub const fn is_upsert(self) -> bool {
        matches!(self, Self::Create | Self::Update | Self::Snapshot)
    }

    /// Canonical lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Snapshot => "snapshot",
        }
    }
}

impl fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for an operation marker that is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown change operation '{0}'")]
pub struct UnknownOperation(pub String);

impl FromStr for ChangeOperation {
    type Err = UnknownOperation;

    /// Accepts long names and the single-letter Debezium markers, in any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" | "c" => Ok(Self::Create),
            "update" | "u" => Ok(Self::Update),
            "delete" | "d" => Ok(Self::Delete),
            "snapshot" | "read" | "r" => Ok(Self::Snapshot),
            _ => Err(UnknownOperation(s.to_string())),
        }
    }
}

/// One captured row mutation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// The mutation kind
    pub operation: ChangeOperation,
    /// Row before the mutation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<RowSnapshot>,
    /// Row after the mutation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<RowSnapshot>,
}

impl ChangeRecord {
    /// An insert of `after`.
    #[must_use]
    pub const fn create(after: RowSnapshot) -> Self {
        Self {
            operation: ChangeOperation::Create,
            before: None,
            after: Some(after),
        }
    }

    /// An update from `before` to `after`.
    #[must_use]
    pub const fn update(before: Option<RowSnapshot>, after: RowSnapshot) -> Self {
        Self {
            operation: ChangeOperation::Update,
            before,
            after: Some(after),
        }
    }

    /// A removal of `before`.
    #[must_use]
    pub const fn delete(before: RowSnapshot) -> Self {
        Self {
            operation: ChangeOperation::Delete,
            before: Some(before),
            after: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_long_and_short_markers() {
        for (raw, op) in [
            ("create", ChangeOperation::Create),
            ("C", ChangeOperation::Create),
            ("update", ChangeOperation::Update),
            ("u", ChangeOperation::Update),
            ("DELETE", ChangeOperation::Delete),
            ("d", ChangeOperation::Delete),
            ("snapshot", ChangeOperation::Snapshot),
            ("read", ChangeOperation::Snapshot),
            ("r", ChangeOperation::Snapshot),
        ] {
            assert_eq!(raw.parse::<ChangeOperation>(), Ok(op), "marker {raw}");
        }
        assert!("truncate".parse::<ChangeOperation>().is_err());
    }

    #[test]
    fn delete_is_not_an_upsert() {
        assert!(!ChangeOperation::Delete.is_upsert());
        assert!(ChangeOperation::Snapshot.is_upsert());
    }
}
