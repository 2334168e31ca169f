//! Read model documents and the search index port.
//!
//! The projection consumer is the only writer of [`ReadModelDocument`]s; the
//! discovery engine only reads them. Writes are last-writer-wins by id.
//!
//! ```text
//! change stream ──► ProjectionConsumer ──upsert/delete──► DocumentIndex ◄──search── DiscoveryEngine
//! ```

use crate::text;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Semi-structured metadata attached to a document.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// The projected, queryable form of a catalog row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReadModelDocument {
    /// Document id (the catalog row id)
    pub id: String,
    /// Free-text title, fuzzy searchable
    pub title: String,
    /// Keyword category, exact match filter
    pub category: String,
    /// Status keyword
    pub status: String,
    /// Arbitrary metadata
    #[serde(default)]
    pub metadata: Metadata,
}

/// Errors raised by document indexes.
#[derive(Error, Debug, Clone)]
pub enum IndexError {
    /// The index backend could not be reached. Transient, worth retrying.
    #[error("Index unavailable: {0}")]
    Unavailable(String),

    /// The index has not been created yet
    #[error("Index not found: {0}")]
    IndexNotFound(String),

    /// A document could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// A normalised search request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchQuery {
    /// Free-text query, already trimmed and non-empty
    pub text: String,
    /// Exact category filter
    pub category: Option<String>,
    /// Zero-based page
    pub page: usize,
    /// Page size, at least one
    pub size: usize,
}

impl SearchQuery {
    /// Number of hits skipped before this page.
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.page.saturating_mul(self.size)
    }
}

/// One matching document.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SearchHit {
    /// The document
    pub document: ReadModelDocument,
    /// Highlight fragments by field name
    pub highlights: HashMap<String, Vec<String>>,
}

impl SearchHit {
    /// A hit with the given byte spans of the title highlighted.
    #[must_use]
    pub fn highlighted(document: ReadModelDocument, spans: &[(usize, usize)]) -> Self {
        let fragment = text::highlight(&document.title, spans);
        Self {
            highlights: HashMap::from([("title".to_string(), vec![fragment])]),
            document,
        }
    }
}

/// A page of results plus the total match count.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SearchHits {
    /// Total matches across all pages
    pub total: u64,
    /// Hits on the requested page
    pub hits: Vec<SearchHit>,
}

impl SearchHits {
    /// Match, order and page `documents` in process.
    ///
    /// Applies the category filter, keeps titles that match some query term,
    /// orders by [`text::TitleMatch::relevance`] then by id, and cuts out the
    /// requested page.
    #[must_use]
    pub fn rank(query: &SearchQuery, documents: impl IntoIterator<Item = ReadModelDocument>) -> Self {
        let terms = text::query_terms(&query.text);
        let mut matches: Vec<_> = documents
            .into_iter()
            .filter(|doc| {
                query
                    .category
                    .as_deref()
                    .is_none_or(|category| doc.category == category)
            })
            .filter_map(|doc| text::match_title(&terms, &doc.title).map(|found| (found, doc)))
            .collect();
        matches.sort_by(|(a, a_doc), (b, b_doc)| {
            a.relevance()
                .cmp(&b.relevance())
                .then_with(|| a_doc.id.cmp(&b_doc.id))
        });

        let total = matches.len() as u64;
        let hits = matches
            .into_iter()
            .skip(query.offset())
            .take(query.size)
            .map(|(found, document)| SearchHit::highlighted(document, &found.matched_spans))
            .collect();
        Self { total, hits }
    }
}

/// Document store with fuzzy search.
///
/// Implementations match the query against `title` with AUTO fuzziness
/// (see [`crate::text`]), keep documents where any term matches, filter by
/// exact category, and order by most matched terms, then fewest edits, then
/// id. [`SearchHits::rank`] is the reference ordering.
#[async_trait]
pub trait DocumentIndex: Send + Sync {
    /// Insert or replace the document with the same id.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] if the write fails.
    async fn upsert(&self, document: ReadModelDocument) -> Result<(), IndexError>;

    /// Remove a document. Removing a missing id is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] if the write fails.
    async fn delete(&self, id: &str) -> Result<(), IndexError>;

    /// Fetch a document by id.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] if the read fails.
    async fn get(&self, id: &str) -> Result<Option<ReadModelDocument>, IndexError>;

    /// Run a search.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::IndexNotFound`] if the index does not exist yet,
    /// other [`IndexError`] variants on backend failure.
    async fn search(&self, query: &SearchQuery) -> Result<SearchHits, IndexError>;
}
