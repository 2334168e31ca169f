//! Dead Letter Queue archive for records the projection gave up on.
//!
//! Provides persistent storage and remediation of dead letters. Each entry
//! keeps the original key and payload bytes, so it can be replayed exactly
//! as received once the cause is fixed.

use async_trait::async_trait;
use sentinel_core::dead_letter::{
    ArchiveError, ArchivedDeadLetter, DeadLetter, DeadLetterArchive, DeadLetterStatus,
};
use sqlx::{PgPool, Row};

const SELECT_COLUMNS: &str = r"
    SELECT
        id, source_topic, message_key, payload, error_message, attempts,
        failed_at, archived_at, status, resolved_at, resolved_by, resolution_notes
    FROM dead_letters
";

/// `PostgreSQL`-based Dead Letter Queue.
///
/// Entries start out `pending`, may move to `processing`, and are closed by
/// resolving or discarding them. Closed entries never change again.
///
/// # Example
///
/// ```no_run
/// use sentinel_core::dead_letter::{DeadLetterArchive, DeadLetterStatus};
/// use sentinel_postgres::DeadLetterQueue;
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let dlq = DeadLetterQueue::new(pool);
///
/// let pending = dlq.list(DeadLetterStatus::Pending, 100).await?;
/// println!("Pending dead letters: {}", pending.len());
///
/// if let Some(entry) = pending.first() {
///     dlq.mark_processing(entry.id).await?;
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DeadLetterQueue {
    pool: PgPool,
}

impl DeadLetterQueue {
    /// Create a Dead Letter Queue on an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Number of pending entries. Useful for health checks.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Unavailable`] if the query fails.
    pub async fn count_pending(&self) -> Result<u64, ArchiveError> {
        self.count(DeadLetterStatus::Pending).await
    }

    /// Close an open entry. Returns `false` if it is missing or already closed.
    async fn close(
        &self,
        id: i64,
        status: DeadLetterStatus,
        resolved_by: Option<&str>,
        notes: Option<&str>,
    ) -> Result<bool, ArchiveError> {
        let result = sqlx::query(
            r"
            UPDATE dead_letters
            SET status = $1,
                resolved_at = NOW(),
                resolved_by = $2,
                resolution_notes = $3
            WHERE id = $4 AND status IN ('pending', 'processing')
            ",
        )
        .bind(status.as_str())
        .bind(resolved_by)
        .bind(notes)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| ArchiveError::Unavailable(format!("Failed to close dead letter: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    /// Convert a database row to an [`ArchivedDeadLetter`].
    fn row_to_entry(row: &sqlx::postgres::PgRow) -> Result<ArchivedDeadLetter, ArchiveError> {
        let corrupt = |e: sqlx::Error| ArchiveError::Corrupt(e.to_string());

        let status: String = row.try_get("status").map_err(corrupt)?;
        let attempts: i32 = row.try_get("attempts").map_err(corrupt)?;
        let attempts = u32::try_from(attempts)
            .map_err(|_| ArchiveError::Corrupt(format!("negative attempt count: {attempts}")))?;

        Ok(ArchivedDeadLetter {
            id: row.try_get("id").map_err(corrupt)?,
            letter: DeadLetter {
                source_topic: row.try_get("source_topic").map_err(corrupt)?,
                key: row.try_get("message_key").map_err(corrupt)?,
                payload: row.try_get("payload").map_err(corrupt)?,
                error: row.try_get("error_message").map_err(corrupt)?,
                attempts,
                failed_at: row.try_get("failed_at").map_err(corrupt)?,
            },
            status: status.parse()?,
            archived_at: row.try_get("archived_at").map_err(corrupt)?,
            resolved_at: row.try_get("resolved_at").map_err(corrupt)?,
            resolved_by: row.try_get("resolved_by").map_err(corrupt)?,
            resolution_notes: row.try_get("resolution_notes").map_err(corrupt)?,
        })
    }
}

#[async_trait]
impl DeadLetterArchive for DeadLetterQueue {
    async fn archive(&self, letter: &DeadLetter) -> Result<i64, ArchiveError> {
        let attempts = i32::try_from(letter.attempts).unwrap_or(i32::MAX);
        let (id,): (i64,) = sqlx::query_as(
            r"
            INSERT INTO dead_letters (
                source_topic, message_key, payload, error_message, attempts, failed_at
            ) VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            ",
        )
        .bind(&letter.source_topic)
        .bind(letter.key.as_deref())
        .bind(&letter.payload)
        .bind(&letter.error)
        .bind(attempts)
        .bind(letter.failed_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ArchiveError::Unavailable(format!("Failed to archive dead letter: {e}")))?;

        tracing::warn!(
            dlq_id = id,
            source_topic = %letter.source_topic,
            key = ?letter.key,
            error = %letter.error,
            attempts = letter.attempts,
            "Record added to Dead Letter Queue"
        );

        metrics::counter!("sentinel_dlq_added_total", "topic" => letter.source_topic.clone())
            .increment(1);

        Ok(id)
    }

    async fn list(
        &self,
        status: DeadLetterStatus,
        limit: usize,
    ) -> Result<Vec<ArchivedDeadLetter>, ArchiveError> {
        #[allow(clippy::cast_possible_wrap)] // Limit is reasonable size, i64 is safe
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE status = $1 ORDER BY archived_at ASC, id ASC LIMIT $2"
        ))
        .bind(status.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ArchiveError::Unavailable(format!("Failed to list dead letters: {e}")))?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    async fn get(&self, id: i64) -> Result<Option<ArchivedDeadLetter>, ArchiveError> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ArchiveError::Unavailable(format!("Failed to load dead letter: {e}")))?;

        row.as_ref().map(Self::row_to_entry).transpose()
    }

    async fn mark_processing(&self, id: i64) -> Result<bool, ArchiveError> {
        let result = sqlx::query(
            r"
            UPDATE dead_letters
            SET status = 'processing'
            WHERE id = $1 AND status IN ('pending', 'processing')
            ",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| ArchiveError::Unavailable(format!("Failed to update dead letter: {e}")))?;

        let updated = result.rows_affected() > 0;
        if updated {
            tracing::info!(dlq_id = id, "DLQ entry marked as processing");
        }
        Ok(updated)
    }

    async fn resolve(
        &self,
        id: i64,
        resolved_by: &str,
        notes: Option<&str>,
    ) -> Result<bool, ArchiveError> {
        let closed = self
            .close(id, DeadLetterStatus::Resolved, Some(resolved_by), notes)
            .await?;
        if closed {
            tracing::info!(dlq_id = id, resolved_by, "DLQ entry marked as resolved");
            metrics::counter!("sentinel_dlq_resolved_total").increment(1);
        }
        Ok(closed)
    }

    async fn discard(&self, id: i64, reason: &str) -> Result<bool, ArchiveError> {
        let closed = self
            .close(id, DeadLetterStatus::Discarded, None, Some(reason))
            .await?;
        if closed {
            tracing::warn!(dlq_id = id, reason, "DLQ entry marked as discarded");
            metrics::counter!("sentinel_dlq_discarded_total").increment(1);
        }
        Ok(closed)
    }

    async fn count(&self, status: DeadLetterStatus) -> Result<u64, ArchiveError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM dead_letters WHERE status = $1")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| ArchiveError::Unavailable(format!("Failed to count dead letters: {e}")))?;

        Ok(u64::try_from(count).unwrap_or_default())
    }
}
