//! Catalog store backed by the `catalog_entries` table.
//!
//! The store only writes rows. Change records are produced by the capture
//! connector reading the table's replication stream, which is why the table
//! runs with `REPLICA IDENTITY FULL`: deletes then carry the whole old row.

use async_trait::async_trait;
use sentinel_core::catalog::{CatalogEntry, CatalogError, CatalogStore};
use serde_json::Value;
use sqlx::{PgPool, Row};

/// `PostgreSQL` [`CatalogStore`].
#[derive(Clone)]
pub struct PostgresCatalogStore {
    pool: PgPool,
}

impl PostgresCatalogStore {
    /// Create a store on an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Delete a row. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Unavailable`] if the delete fails.
    pub async fn remove(&self, id: &str) -> Result<bool, CatalogError> {
        let result = sqlx::query("DELETE FROM catalog_entries WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| CatalogError::Unavailable(format!("Failed to delete catalog entry: {e}")))?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl CatalogStore for PostgresCatalogStore {
    async fn upsert(&self, entry: CatalogEntry) -> Result<(), CatalogError> {
        sqlx::query(
            r"
            INSERT INTO catalog_entries (id, title, category, status, metadata)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
            SET title = EXCLUDED.title,
                category = EXCLUDED.category,
                status = EXCLUDED.status,
                metadata = EXCLUDED.metadata,
                updated_at = now()
            ",
        )
        .bind(&entry.id)
        .bind(&entry.title)
        .bind(&entry.category)
        .bind(&entry.status)
        .bind(Value::Object(entry.metadata.clone()))
        .execute(&self.pool)
        .await
        .map_err(|e| CatalogError::Unavailable(format!("Failed to save catalog entry: {e}")))?;

        tracing::debug!(id = %entry.id, status = %entry.status, "Catalog entry saved");
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<CatalogEntry>, CatalogError> {
        let row = sqlx::query(
            "SELECT id, title, category, status, metadata FROM catalog_entries WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CatalogError::Unavailable(format!("Failed to load catalog entry: {e}")))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let metadata = match row.try_get::<Value, _>("metadata") {
            Ok(Value::Object(map)) => map,
            Ok(_) => serde_json::Map::new(),
            Err(e) => return Err(CatalogError::Serialization(e.to_string())),
        };
        Ok(Some(CatalogEntry {
            id: row.get("id"),
            title: row.get("title"),
            category: row.get("category"),
            status: row.get("status"),
            metadata,
        }))
    }
}
