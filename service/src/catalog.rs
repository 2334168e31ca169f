//! Free-form catalog entries.
//!
//! Operators add rows to the catalog directly, not only through
//! reservations. Such rows start in [`RECEIVED`] and reach the search index
//! the same way reservation rows do, through the change stream.

use sentinel_core::catalog::{CatalogEntry, CatalogError, CatalogStore, RECEIVED};
use sentinel_core::projection::Metadata;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// A request to add a catalog row.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewCatalogEntry {
    /// Title, searched by discovery
    pub title: String,
    /// Category keyword
    pub category: String,
    /// Arbitrary metadata
    #[serde(default)]
    pub metadata: Metadata,
}

/// Catalog service errors.
#[derive(Error, Debug, Clone)]
pub enum CatalogServiceError {
    /// The request was rejected before reaching the store
    #[error("Invalid catalog entry: {0}")]
    Invalid(String),

    /// The store failed
    #[error(transparent)]
    Store(#[from] CatalogError),
}

/// Creates catalog rows with generated ids.
#[derive(Clone)]
pub struct CatalogService {
    store: Arc<dyn CatalogStore>,
}

impl CatalogService {
    /// Create a service writing to `store`.
    #[must_use]
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    /// Store a new row and return it.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogServiceError::Invalid`] for a blank title or
    /// category, and [`CatalogServiceError::Store`] if the write fails.
    #[tracing::instrument(skip(self, request), fields(category = %request.category))]
    pub async fn create_entry(
        &self,
        request: NewCatalogEntry,
    ) -> Result<CatalogEntry, CatalogServiceError> {
        let title = request.title.trim();
        if title.is_empty() {
            return Err(CatalogServiceError::Invalid("title is blank".to_string()));
        }
        let category = request.category.trim();
        if category.is_empty() {
            return Err(CatalogServiceError::Invalid("category is blank".to_string()));
        }

        let entry = CatalogEntry {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            category: category.to_string(),
            status: RECEIVED.to_string(),
            metadata: request.metadata,
        };
        self.store.upsert(entry.clone()).await?;

        tracing::info!(id = %entry.id, "Catalog entry created");
        Ok(entry)
    }

    /// Fetch a row by id.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogServiceError::Store`] if the read fails.
    pub async fn entry(&self, id: &str) -> Result<Option<CatalogEntry>, CatalogServiceError> {
        Ok(self.store.get(id).await?)
    }
}
