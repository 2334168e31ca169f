//! `PostgreSQL` adapters for Sentinel.
//!
//! - [`PostgresResourceStore`]: transactional resource store behind the booking flow
//! - [`PostgresCatalogStore`]: catalog rows captured by the change-data-capture connector
//! - [`PostgresDocumentIndex`]: the searchable read model
//! - [`DeadLetterQueue`]: archive of dead-lettered records
//!
//! All of them share one pool and the schema under `migrations/`.
//!
//! # Example
//!
//! ```ignore
//! use sentinel_postgres::{PostgresResourceStore, connect, migrate};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = connect("postgres://localhost/sentinel", 10).await?;
//!     migrate(&pool).await?;
//!     let resources = PostgresResourceStore::new(pool);
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod catalog;
pub mod dead_letter_queue;
pub mod index;
pub mod resources;

pub use catalog::PostgresCatalogStore;
pub use dead_letter_queue::DeadLetterQueue;
pub use index::PostgresDocumentIndex;
pub use resources::PostgresResourceStore;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Open a connection pool.
///
/// # Errors
///
/// Returns [`sqlx::Error`] if the database cannot be reached.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Apply the bundled schema migrations.
///
/// # Errors
///
/// Returns [`sqlx::migrate::MigrateError`] if a migration fails.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations applied");
    Ok(())
}

/// Whether an error means the database could not be reached, as opposed to a
/// statement being rejected.
pub(crate) const fn is_connection_error(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}

/// SQLSTATE of a database error, if there is one.
pub(crate) fn sql_state(error: &sqlx::Error) -> Option<String> {
    match error {
        sqlx::Error::Database(db) => db.code().map(std::borrow::Cow::into_owned),
        _ => None,
    }
}

/// A row count as a SQL `LIMIT`/`OFFSET` value. Counts past `i64::MAX`
/// saturate instead of wrapping negative.
pub(crate) fn sql_limit(count: usize) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_failures_count_as_connection_errors() {
        assert!(is_connection_error(&sqlx::Error::PoolTimedOut));
        assert!(is_connection_error(&sqlx::Error::PoolClosed));
        assert!(!is_connection_error(&sqlx::Error::RowNotFound));
        assert_eq!(sql_state(&sqlx::Error::RowNotFound), None);
    }

    #[test]
    fn oversized_limits_saturate() {
        assert_eq!(sql_limit(10), 10);
        assert_eq!(sql_limit(usize::MAX), i64::MAX);
    }
}
