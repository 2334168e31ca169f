//! In-memory catalog store that emits change records.
//!
//! Stands in for the catalog table plus its change-data-capture connector:
//! each write is published to the change topic as a flat
//! `{operation, before, after}` envelope keyed by row id. Row metadata is
//! serialized as a JSON string, the way a connector renders a `jsonb` column.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use async_trait::async_trait;
use sentinel_core::catalog::{CatalogEntry, CatalogError, CatalogStore};
use sentinel_core::event_bus::EventBus;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// In-memory [`CatalogStore`] publishing change records to an [`EventBus`].
#[derive(Clone)]
pub struct InMemoryCatalogStore {
    rows: Arc<Mutex<BTreeMap<String, CatalogEntry>>>,
    bus: Arc<dyn EventBus>,
    topic: String,
}

impl InMemoryCatalogStore {
    /// Create a store that publishes change records to `topic`.
    #[must_use]
    pub fn new(bus: Arc<dyn EventBus>, topic: impl Into<String>) -> Self {
        Self {
            rows: Arc::new(Mutex::new(BTreeMap::new())),
            bus,
            topic: topic.into(),
        }
    }

    /// Remove a row and publish the delete record.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Unavailable`] if the change record cannot be published.
    pub async fn remove(&self, id: &str) -> Result<bool, CatalogError> {
        let removed = self.rows.lock().unwrap().remove(id);
        match removed {
            Some(before) => {
                let envelope = json!({
                    "operation": "delete",
                    "before": row(&before)?,
                    "after": Value::Null,
                });
                self.emit(id, &envelope).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.lock().unwrap().is_empty()
    }

    async fn emit(&self, key: &str, envelope: &Value) -> Result<(), CatalogError> {
        let payload =
            serde_json::to_vec(envelope).map_err(|e| CatalogError::Serialization(e.to_string()))?;
        self.bus
            .publish(&self.topic, key, &payload)
            .await
            .map_err(|e| CatalogError::Unavailable(e.to_string()))
    }
}

fn row(entry: &CatalogEntry) -> Result<Value, CatalogError> {
    let metadata = serde_json::to_string(&entry.metadata)
        .map_err(|e| CatalogError::Serialization(e.to_string()))?;
    Ok(json!({
        "id": entry.id,
        "title": entry.title,
        "category": entry.category,
        "status": entry.status,
        "metadata": metadata,
    }))
}

#[async_trait]
impl CatalogStore for InMemoryCatalogStore {
    async fn upsert(&self, entry: CatalogEntry) -> Result<(), CatalogError> {
        let before = self
            .rows
            .lock()
            .unwrap()
            .insert(entry.id.clone(), entry.clone());
        let envelope = match before {
            Some(before) => json!({
                "operation": "update",
                "before": row(&before)?,
                "after": row(&entry)?,
            }),
            None => json!({
                "operation": "create",
                "before": Value::Null,
                "after": row(&entry)?,
            }),
        };
        self.emit(&entry.id, &envelope).await
    }

    async fn get(&self, id: &str) -> Result<Option<CatalogEntry>, CatalogError> {
        Ok(self.rows.lock().unwrap().get(id).cloned())
    }
}
