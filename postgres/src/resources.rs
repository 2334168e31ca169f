//! Resource store backed by the `resources` table.

use crate::{is_connection_error, sql_limit};
use async_trait::async_trait;
use sentinel_core::resource::{Resource, ResourceId, ResourceStore, ResourceStoreError};
use sqlx::{PgPool, Row};

/// `PostgreSQL` [`ResourceStore`].
///
/// `compare_and_set` locks the row with `SELECT ... FOR UPDATE` inside a
/// transaction, so concurrent callers serialize on the row and at most one of
/// them sees its expected value.
#[derive(Clone)]
pub struct PostgresResourceStore {
    pool: PgPool,
}

impl PostgresResourceStore {
    /// Create a store on an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn store_error(action: &str, e: &sqlx::Error) -> ResourceStoreError {
    if is_connection_error(e) {
        ResourceStoreError::Unavailable(format!("Failed to {action}: {e}"))
    } else {
        ResourceStoreError::Query(format!("Failed to {action}: {e}"))
    }
}

fn row_to_resource(row: &sqlx::postgres::PgRow) -> Result<Resource, ResourceStoreError> {
    let id: i64 = row
        .try_get("id")
        .map_err(|e| store_error("read resource id", &e))?;
    let reserved: bool = row
        .try_get("reserved")
        .map_err(|e| store_error("read resource flag", &e))?;
    Ok(Resource {
        id: ResourceId(id),
        reserved,
    })
}

#[async_trait]
impl ResourceStore for PostgresResourceStore {
    async fn get(&self, id: ResourceId) -> Result<Option<Resource>, ResourceStoreError> {
        let row = sqlx::query("SELECT id, reserved FROM resources WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_error("load resource", &e))?;
        row.as_ref().map(row_to_resource).transpose()
    }

    async fn put(&self, resource: Resource) -> Result<(), ResourceStoreError> {
        sqlx::query(
            r"
            INSERT INTO resources (id, reserved)
            VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE
            SET reserved = EXCLUDED.reserved, updated_at = now()
            ",
        )
        .bind(resource.id.get())
        .bind(resource.reserved)
        .execute(&self.pool)
        .await
        .map_err(|e| store_error("save resource", &e))?;
        Ok(())
    }

    async fn compare_and_set(
        &self,
        id: ResourceId,
        expected: bool,
        new: bool,
    ) -> Result<bool, ResourceStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| store_error("begin transaction", &e))?;

        let current: Option<bool> =
            sqlx::query_scalar("SELECT reserved FROM resources WHERE id = $1 FOR UPDATE")
                .bind(id.get())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| store_error("lock resource", &e))?;

        if current != Some(expected) {
            // Dropping the transaction rolls it back.
            tracing::debug!(resource_id = %id, ?current, expected, "Resource compare-and-set rejected");
            return Ok(false);
        }

        sqlx::query("UPDATE resources SET reserved = $2, updated_at = now() WHERE id = $1")
            .bind(id.get())
            .bind(new)
            .execute(&mut *tx)
            .await
            .map_err(|e| store_error("update resource", &e))?;

        tx.commit()
            .await
            .map_err(|e| store_error("commit transaction", &e))?;
        Ok(true)
    }

    async fn delete(&self, id: ResourceId) -> Result<bool, ResourceStoreError> {
        let result = sqlx::query("DELETE FROM resources WHERE id = $1")
            .bind(id.get())
            .execute(&self.pool)
            .await
            .map_err(|e| store_error("delete resource", &e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_unreserved(&self, limit: usize) -> Result<Vec<Resource>, ResourceStoreError> {
        let rows = sqlx::query(
            "SELECT id, reserved FROM resources WHERE NOT reserved ORDER BY id LIMIT $1",
        )
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error("list resources", &e))?;

        rows.iter().map(row_to_resource).collect()
    }
}
