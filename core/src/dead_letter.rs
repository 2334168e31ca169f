//! Dead letters: records a consumer gave up on.
//!
//! The payload is kept byte for byte as it was received, together with its
//! key, so the record can be replayed or inspected without loss.
//!
//! Dead letters leave a consumer through a [`DeadLetterSink`]. The terminal
//! handler of the dead-letter channel files them in a [`DeadLetterArchive`],
//! where an operator resolves or discards them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A record that exhausted its processing attempts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// Topic the record was consumed from
    pub source_topic: String,
    /// Original message key
    pub key: Option<String>,
    /// Original payload, verbatim
    pub payload: Vec<u8>,
    /// Last processing error
    pub error: String,
    /// Total attempts made, first attempt included
    pub attempts: u32,
    /// When the consumer gave up
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    /// Payload as UTF-8 text, lossily decoded.
    #[must_use]
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Errors raised by dead-letter sinks.
#[derive(Error, Debug, Clone)]
pub enum DeadLetterError {
    /// The sink could not accept the record
    #[error("Dead-letter hand-off failed: {0}")]
    HandOffFailed(String),
}

/// Terminal destination for dead letters.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Hand a dead letter off durably.
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError`] if the record was not accepted. The caller
    /// must then leave the original record unacknowledged.
    async fn send(&self, letter: DeadLetter) -> Result<(), DeadLetterError>;
}

/// Remediation state of an archived dead letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeadLetterStatus {
    /// Waiting for investigation
    Pending,
    /// Someone is working on it
    Processing,
    /// Fixed and replayed
    Resolved,
    /// Permanently dropped
    Discarded,
}

impl DeadLetterStatus {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Resolved => "resolved",
            Self::Discarded => "discarded",
        }
    }

    /// Whether no further transition is expected.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Resolved | Self::Discarded)
    }
}

impl fmt::Display for DeadLetterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeadLetterStatus {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "resolved" => Ok(Self::Resolved),
            "discarded" => Ok(Self::Discarded),
            _ => Err(ArchiveError::Corrupt(format!("invalid dead-letter status: {s}"))),
        }
    }
}

/// A dead letter filed in the archive.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedDeadLetter {
    /// Archive id
    pub id: i64,
    /// The record as it was dead-lettered
    pub letter: DeadLetter,
    /// Current remediation state
    pub status: DeadLetterStatus,
    /// When the archive received it
    pub archived_at: DateTime<Utc>,
    /// When it was resolved or discarded
    pub resolved_at: Option<DateTime<Utc>>,
    /// Who resolved it
    pub resolved_by: Option<String>,
    /// What was done, or why it was discarded
    pub resolution_notes: Option<String>,
}

/// Errors raised by dead-letter archives.
#[derive(Error, Debug, Clone)]
pub enum ArchiveError {
    /// The archive backend could not be reached
    #[error("Dead-letter archive unavailable: {0}")]
    Unavailable(String),

    /// A stored entry could not be read back
    #[error("Corrupt dead-letter archive entry: {0}")]
    Corrupt(String),
}

/// Durable store of dead letters awaiting remediation.
#[async_trait]
pub trait DeadLetterArchive: Send + Sync {
    /// File a dead letter as [`DeadLetterStatus::Pending`] and return its archive id.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Unavailable`] if the letter was not stored.
    async fn archive(&self, letter: &DeadLetter) -> Result<i64, ArchiveError>;

    /// Entries in `status`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError`] if the archive cannot be read.
    async fn list(
        &self,
        status: DeadLetterStatus,
        limit: usize,
    ) -> Result<Vec<ArchivedDeadLetter>, ArchiveError>;

    /// One entry by archive id.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError`] if the archive cannot be read.
    async fn get(&self, id: i64) -> Result<Option<ArchivedDeadLetter>, ArchiveError>;

    /// Move an entry to [`DeadLetterStatus::Processing`].
    ///
    /// Returns `false` if no open entry has this id.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Unavailable`] if the update fails.
    async fn mark_processing(&self, id: i64) -> Result<bool, ArchiveError>;

    /// Close an entry as resolved.
    ///
    /// Returns `false` if no open entry has this id.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Unavailable`] if the update fails.
    async fn resolve(
        &self,
        id: i64,
        resolved_by: &str,
        notes: Option<&str>,
    ) -> Result<bool, ArchiveError>;

    /// Close an entry as discarded.
    ///
    /// Returns `false` if no open entry has this id.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Unavailable`] if the update fails.
    async fn discard(&self, id: i64, reason: &str) -> Result<bool, ArchiveError>;

    /// Number of entries in `status`.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError`] if the archive cannot be read.
    async fn count(&self, status: DeadLetterStatus) -> Result<u64, ArchiveError>;
}
