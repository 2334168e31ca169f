//! Read model backed by the `read_model_documents` table.
//!
//! Every document stores its lowercased title tokens in a GIN-indexed array,
//! and every token ever written lands in the `read_model_tokens` vocabulary.
//! A search runs in three steps:
//!
//! 1. load the vocabulary tokens whose length any query term can reach
//! 2. keep the tokens within a term's fuzziness ([`text::term_distance`])
//! 3. let SQL find, score, order and page the documents holding those tokens
//!
//! Only the requested page leaves the database. Scoring matches
//! [`SearchHits::rank`], so results agree with every other
//! [`DocumentIndex`] implementation.

use crate::{sql_limit, sql_state};
use async_trait::async_trait;
use sentinel_core::projection::{
    DocumentIndex, IndexError, ReadModelDocument, SearchHit, SearchHits, SearchQuery,
};
use sentinel_core::text;
use serde_json::Value;
use sqlx::{PgPool, Row};

/// Table holding the documents.
pub const DOCUMENTS_TABLE: &str = "read_model_documents";

/// SQLSTATE for `undefined_table`.
const UNDEFINED_TABLE: &str = "42P01";

/// Documents holding a candidate token, scored per document as
/// `matched_terms` (distinct terms hit) and `edits` (closest token per term).
///
/// Binds: `$1` term indexes, `$2` tokens, `$3` edit distances, `$4` category.
macro_rules! ranked_documents {
    () => {
        r"
        WITH candidates AS (
            SELECT * FROM UNNEST($1::int4[], $2::text[], $3::int4[]) AS c(term, token, edits)
        ),
        per_term AS (
            SELECT d.id, c.term, MIN(c.edits) AS edits
            FROM read_model_documents d
            JOIN candidates c ON c.token = ANY (d.title_tokens)
            WHERE d.title_tokens && $2::text[]
              AND ($4::text IS NULL OR d.category = $4)
            GROUP BY d.id, c.term
        ),
        ranked AS (
            SELECT id, COUNT(*) AS matched_terms, SUM(edits) AS edits
            FROM per_term
            GROUP BY id
        )
        "
    };
}

/// One page of ranked documents plus the total. `$5` limit, `$6` offset.
const SEARCH_PAGE: &str = concat!(
    ranked_documents!(),
    r#"
        SELECT d.id, d.title, d.category, d.status, d.metadata, COUNT(*) OVER () AS total
        FROM ranked r
        JOIN read_model_documents d ON d.id = r.id
        ORDER BY r.matched_terms DESC, r.edits ASC, r.id COLLATE "C" ASC
        LIMIT $5 OFFSET $6
    "#
);

/// Total only, for pages past the end.
const SEARCH_COUNT: &str = concat!(ranked_documents!(), "SELECT COUNT(*) FROM ranked");

/// Vocabulary tokens within some query term's fuzziness, flattened into the
/// parallel arrays bound by [`SEARCH_PAGE`].
#[derive(Debug, Default, PartialEq, Eq)]
struct Candidates {
    terms: Vec<i32>,
    tokens: Vec<String>,
    edits: Vec<i32>,
}

impl Candidates {
    fn resolve(terms: &[String], vocabulary: &[String]) -> Self {
        let mut candidates = Self::default();
        for (idx, term) in terms.iter().enumerate() {
            for token in vocabulary {
                if let Some(distance) = text::term_distance(term, token) {
                    candidates.terms.push(i32::try_from(idx).unwrap_or(i32::MAX));
                    candidates.tokens.push(token.clone());
                    candidates.edits.push(i32::try_from(distance).unwrap_or(i32::MAX));
                }
            }
        }
        candidates
    }
}

/// `PostgreSQL` [`DocumentIndex`].
#[derive(Clone)]
pub struct PostgresDocumentIndex {
    pool: PgPool,
}

impl PostgresDocumentIndex {
    /// Create an index on an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// A missing table reads as a missing index. Every other failure except a
/// decode error is treated as transient.
fn index_error(action: &str, e: &sqlx::Error) -> IndexError {
    if sql_state(e).as_deref() == Some(UNDEFINED_TABLE) {
        return IndexError::IndexNotFound(DOCUMENTS_TABLE.to_string());
    }
    match e {
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            IndexError::Serialization(format!("Failed to {action}: {e}"))
        }
        _ => IndexError::Unavailable(format!("Failed to {action}: {e}")),
    }
}

fn row_to_document(row: &sqlx::postgres::PgRow) -> Result<ReadModelDocument, IndexError> {
    let decode = |e: sqlx::Error| index_error("decode document", &e);
    let metadata = match row.try_get::<Value, _>("metadata").map_err(decode)? {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    Ok(ReadModelDocument {
        id: row.try_get("id").map_err(decode)?,
        title: row.try_get("title").map_err(decode)?,
        category: row.try_get("category").map_err(decode)?,
        status: row.try_get("status").map_err(decode)?,
        metadata,
    })
}

#[async_trait]
impl DocumentIndex for PostgresDocumentIndex {
    async fn upsert(&self, document: ReadModelDocument) -> Result<(), IndexError> {
        let tokens = text::title_tokens(&document.title);
        sqlx::query(
            r"
            WITH vocabulary AS (
                INSERT INTO read_model_tokens (token)
                SELECT UNNEST($6::text[])
                ON CONFLICT (token) DO NOTHING
            )
            INSERT INTO read_model_documents (id, title, category, status, metadata, title_tokens)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE
            SET title = EXCLUDED.title,
                title_tokens = EXCLUDED.title_tokens,
                category = EXCLUDED.category,
                status = EXCLUDED.status,
                metadata = EXCLUDED.metadata,
                updated_at = now()
            ",
        )
        .bind(&document.id)
        .bind(&document.title)
        .bind(&document.category)
        .bind(&document.status)
        .bind(Value::Object(document.metadata))
        .bind(&tokens)
        .execute(&self.pool)
        .await
        .map_err(|e| index_error("save document", &e))?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), IndexError> {
        sqlx::query("DELETE FROM read_model_documents WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| index_error("delete document", &e))?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<ReadModelDocument>, IndexError> {
        let row = sqlx::query(
            "SELECT id, title, category, status, metadata FROM read_model_documents WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| index_error("load document", &e))?;
        row.as_ref().map(row_to_document).transpose()
    }

    async fn search(&self, query: &SearchQuery) -> Result<SearchHits, IndexError> {
        let terms = text::query_terms(&query.text);
        let vocabulary: Vec<String> = match text::token_length_window(&terms) {
            Some((shortest, longest)) => sqlx::query_scalar(
                "SELECT token FROM read_model_tokens WHERE token_length BETWEEN $1 AND $2",
            )
            .bind(i32::try_from(shortest).unwrap_or(i32::MAX))
            .bind(i32::try_from(longest).unwrap_or(i32::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| index_error("load search vocabulary", &e))?,
            None => Vec::new(),
        };
        let candidates = Candidates::resolve(&terms, &vocabulary);

        let rows = sqlx::query(SEARCH_PAGE)
            .bind(&candidates.terms)
            .bind(&candidates.tokens)
            .bind(&candidates.edits)
            .bind(query.category.as_deref())
            .bind(sql_limit(query.size))
            .bind(sql_limit(query.offset()))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| index_error("search documents", &e))?;

        let total: i64 = match rows.first() {
            Some(row) => row
                .try_get("total")
                .map_err(|e| index_error("decode search total", &e))?,
            // A page past the end carries no row to read the total from.
            None if query.offset() > 0 => sqlx::query_scalar(SEARCH_COUNT)
                .bind(&candidates.terms)
                .bind(&candidates.tokens)
                .bind(&candidates.edits)
                .bind(query.category.as_deref())
                .fetch_one(&self.pool)
                .await
                .map_err(|e| index_error("count documents", &e))?,
            None => 0,
        };

        let hits = rows
            .iter()
            .map(|row| {
                let document = row_to_document(row)?;
                let spans = text::match_title(&terms, &document.title)
                    .map(|found| found.matched_spans)
                    .unwrap_or_default();
                Ok(SearchHit::highlighted(document, &spans))
            })
            .collect::<Result<Vec<_>, IndexError>>()?;

        tracing::debug!(
            vocabulary = vocabulary.len(),
            candidates = candidates.tokens.len(),
            total,
            "Document search done"
        );
        Ok(SearchHits {
            total: u64::try_from(total).unwrap_or(0),
            hits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_failures_are_serialization_errors() {
        let e = sqlx::Error::Decode("bad json".into());
        assert!(matches!(
            index_error("decode document", &e),
            IndexError::Serialization(_)
        ));
        assert!(matches!(
            index_error("search documents", &sqlx::Error::PoolTimedOut),
            IndexError::Unavailable(_)
        ));
    }

    #[test]
    fn candidates_pair_each_term_with_reachable_tokens() {
        let terms = text::query_terms("saet 42");
        let vocabulary: Vec<String> = ["seat", "set", "seats", "42", "41", "concert"]
            .into_iter()
            .map(str::to_string)
            .collect();

        let candidates = Candidates::resolve(&terms, &vocabulary);

        assert_eq!(candidates.terms, [0, 0, 1]);
        assert_eq!(candidates.tokens, ["seat", "set", "42"]);
        assert_eq!(candidates.edits, [1, 1, 0]);
    }

    #[test]
    fn no_terms_means_no_candidates() {
        let vocabulary = vec!["seat".to_string()];
        assert_eq!(Candidates::resolve(&[], &vocabulary), Candidates::default());
    }
}
