//! Fuzzy, filtered search over the read model.

use sentinel_core::projection::{DocumentIndex, IndexError, SearchHit, SearchQuery};
use sentinel_runtime::metrics::DiscoveryMetrics;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Page size used when the caller asks for a non-positive one.
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// How a discovery request was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscoveryStatus {
    /// The index was searched
    Success,
    /// The query was blank; the index was not contacted
    EmptyQuery,
    /// The index does not exist yet
    IndexNotInitialized,
}

impl DiscoveryStatus {
    /// Wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::EmptyQuery => "EMPTY_QUERY",
            Self::IndexNotInitialized => "INDEX_NOT_INITIALIZED",
        }
    }
}

/// A page of discovery results.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResponse {
    /// Matches across all pages
    pub total_hits: u64,
    /// Hits on this page, with highlight fragments
    pub results: Vec<SearchHit>,
    /// How the request was answered
    pub status: DiscoveryStatus,
}

impl DiscoveryResponse {
    const fn empty(status: DiscoveryStatus) -> Self {
        Self {
            total_hits: 0,
            results: Vec::new(),
            status,
        }
    }
}

/// Index failures other than a missing index.
#[derive(Error, Debug, Clone)]
pub enum DiscoveryError {
    /// The index failed
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Clamp a requested page and size: negative pages become 0 and
/// non-positive sizes become `default_size`.
#[must_use]
pub fn clamp_page(page: i64, size: i64, default_size: usize) -> (usize, usize) {
    let page = usize::try_from(page).unwrap_or(0);
    let size = match usize::try_from(size) {
        Ok(size) if size > 0 => size,
        _ => default_size.max(1),
    };
    (page, size)
}

/// Read-only query side of the read model.
#[derive(Clone)]
pub struct DiscoveryEngine {
    index: Arc<dyn DocumentIndex>,
    default_page_size: usize,
}

impl DiscoveryEngine {
    /// Create an engine with the default page size.
    #[must_use]
    pub fn new(index: Arc<dyn DocumentIndex>) -> Self {
        Self {
            index,
            default_page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Use `size` when a request has no usable page size.
    #[must_use]
    pub fn with_default_page_size(mut self, size: usize) -> Self {
        self.default_page_size = size.max(1);
        self
    }

    /// Search titles for `query`, optionally restricted to `category`.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError`] on index failures other than a missing
    /// index, which is reported as [`DiscoveryStatus::IndexNotInitialized`].
    #[tracing::instrument(skip(self))]
    pub async fn discover(
        &self,
        query: &str,
        category: Option<&str>,
        page: i64,
        size: i64,
    ) -> Result<DiscoveryResponse, DiscoveryError> {
        let text = query.trim();
        if text.is_empty() {
            DiscoveryMetrics::record_query(DiscoveryStatus::EmptyQuery.as_str());
            return Ok(DiscoveryResponse::empty(DiscoveryStatus::EmptyQuery));
        }

        let (page, size) = clamp_page(page, size, self.default_page_size);
        let request = SearchQuery {
            text: text.to_string(),
            category: category.map(str::to_string),
            page,
            size,
        };

        match self.index.search(&request).await {
            Ok(hits) => {
                tracing::debug!(total = hits.total, returned = hits.hits.len(), "Discovery search done");
                DiscoveryMetrics::record_query(DiscoveryStatus::Success.as_str());
                Ok(DiscoveryResponse {
                    total_hits: hits.total,
                    results: hits.hits,
                    status: DiscoveryStatus::Success,
                })
            }
            Err(IndexError::IndexNotFound(index)) => {
                tracing::warn!(%index, "Search index not initialized");
                DiscoveryMetrics::record_query(DiscoveryStatus::IndexNotInitialized.as_str());
                Ok(DiscoveryResponse::empty(DiscoveryStatus::IndexNotInitialized))
            }
            Err(e) => {
                tracing::error!(error = %e, "Discovery search failed");
                DiscoveryMetrics::record_query("ERROR");
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use proptest::prelude::*;
    use sentinel_core::projection::ReadModelDocument;
    use sentinel_testing::InMemoryDocumentIndex;

    fn doc(id: &str, title: &str, category: &str) -> ReadModelDocument {
        ReadModelDocument {
            id: id.to_string(),
            title: title.to_string(),
            category: category.to_string(),
            status: "RESERVED".to_string(),
            metadata: serde_json::Map::new(),
        }
    }

    async fn seeded() -> InMemoryDocumentIndex {
        let index = InMemoryDocumentIndex::new();
        for n in 1..=12 {
            index
                .upsert(doc(&format!("{n:02}"), &format!("Seat Reservation: {n}"), "TICKETING"))
                .await
                .unwrap();
        }
        index.upsert(doc("c1", "Concert Night", "MUSIC")).await.unwrap();
        index
    }

    #[tokio::test]
    async fn blank_query_short_circuits() {
        let index = InMemoryDocumentIndex::new();
        let engine = DiscoveryEngine::new(Arc::new(index.clone()));

        for query in ["", "   \t"] {
            let response = engine.discover(query, None, 0, 10).await.unwrap();
            assert_eq!(response, DiscoveryResponse::empty(DiscoveryStatus::EmptyQuery));
        }
        assert_eq!(index.search_calls(), 0);
    }

    #[tokio::test]
    async fn typo_still_matches() {
        let engine = DiscoveryEngine::new(Arc::new(seeded().await));

        let response = engine.discover("saet", None, 0, 100).await.unwrap();
        assert_eq!(response.status, DiscoveryStatus::Success);
        assert_eq!(response.total_hits, 12);

        let response = engine.discover("concrt", Some("MUSIC"), 0, 10).await.unwrap();
        assert_eq!(response.total_hits, 1);
        assert_eq!(
            response.results[0].highlights["title"],
            vec!["<em>Concert</em> Night".to_string()]
        );
    }

    #[tokio::test]
    async fn any_matching_term_is_a_hit() {
        let engine = DiscoveryEngine::new(Arc::new(seeded().await));

        let response = engine.discover("seat 99", None, 0, 10).await.unwrap();
        assert_eq!(response.status, DiscoveryStatus::Success);
        assert_eq!(response.total_hits, 12);

        let response = engine.discover("seat 7", None, 0, 10).await.unwrap();
        assert_eq!(response.total_hits, 12);
        assert_eq!(response.results[0].document.id, "07");
        assert_eq!(
            response.results[0].highlights["title"],
            vec!["<em>Seat</em> Reservation: <em>7</em>".to_string()]
        );
    }

    #[tokio::test]
    async fn category_filter_is_conjunctive() {
        let engine = DiscoveryEngine::new(Arc::new(seeded().await));
        let response = engine.discover("seat", Some("MUSIC"), 0, 10).await.unwrap();
        assert_eq!(response.total_hits, 0);
        assert!(response.results.is_empty());

        // Terms are alternatives, the category is not.
        let response = engine
            .discover("seat concert", Some("MUSIC"), 0, 10)
            .await
            .unwrap();
        assert_eq!(response.total_hits, 1);
        assert_eq!(response.results[0].document.id, "c1");
    }

    #[tokio::test]
    async fn out_of_range_paging_is_clamped() {
        let engine = DiscoveryEngine::new(Arc::new(seeded().await));

        let clamped = engine.discover("seat", None, -1, 0).await.unwrap();
        let explicit = engine.discover("seat", None, 0, 10).await.unwrap();
        assert_eq!(clamped, explicit);
        assert_eq!(clamped.results.len(), 10);

        let second = engine.discover("seat", None, 1, 10).await.unwrap();
        assert_eq!(second.results.len(), 2);
        assert_eq!(second.total_hits, 12);
    }

    #[tokio::test]
    async fn missing_index_is_a_status() {
        let engine = DiscoveryEngine::new(Arc::new(InMemoryDocumentIndex::uninitialized()));
        let response = engine.discover("seat", None, 0, 10).await.unwrap();
        assert_eq!(
            response,
            DiscoveryResponse::empty(DiscoveryStatus::IndexNotInitialized)
        );
    }

    #[test]
    fn status_wire_names() {
        assert_eq!(
            serde_json::to_value(DiscoveryStatus::IndexNotInitialized).unwrap(),
            "INDEX_NOT_INITIALIZED"
        );
        assert_eq!(DiscoveryStatus::EmptyQuery.as_str(), "EMPTY_QUERY");
    }

    proptest! {
        #[test]
        fn clamp_never_yields_zero_size(page in any::<i64>(), size in any::<i64>(), default in 1usize..100) {
            let (clamped_page, clamped_size) = clamp_page(page, size, default);
            prop_assert!(clamped_size >= 1);
            if page < 0 {
                prop_assert_eq!(clamped_page, 0);
            }
            if size <= 0 {
                prop_assert_eq!(clamped_size, default);
            } else {
                prop_assert_eq!(clamped_size as i64, size);
            }
        }
    }
}
