//! Authoritative catalog rows.
//!
//! Catalog rows are what the change stream captures. Every write through a
//! [`CatalogStore`] eventually shows up as a change record and from there as
//! a read-model document.

use crate::projection::Metadata;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Category of catalog rows created from reservations.
pub const TICKETING_CATEGORY: &str = "TICKETING";

/// Status of freshly created free-form entries.
pub const RECEIVED: &str = "RECEIVED";

/// A row in the catalog store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Row id
    pub id: String,
    /// Title
    pub title: String,
    /// Category keyword
    pub category: String,
    /// Status keyword
    pub status: String,
    /// Arbitrary metadata
    #[serde(default)]
    pub metadata: Metadata,
}

/// Errors raised by catalog stores.
#[derive(Error, Debug, Clone)]
pub enum CatalogError {
    /// The store could not be reached
    #[error("Catalog store unavailable: {0}")]
    Unavailable(String),

    /// The entry could not be encoded or decoded
    #[error("Catalog serialization error: {0}")]
    Serialization(String),
}

/// Write side of the searchable catalog.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Insert or replace the row with the same id.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] if the write fails.
    async fn upsert(&self, entry: CatalogEntry) -> Result<(), CatalogError>;

    /// Fetch a row by id.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] if the read fails.
    async fn get(&self, id: &str) -> Result<Option<CatalogEntry>, CatalogError>;
}
