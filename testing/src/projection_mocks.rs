//! In-memory read model testing utilities
//!
//! - [`InMemoryDocumentIndex`]: `BTreeMap`-backed document index with fuzzy search
//! - [`InMemoryDeadLetterSink`]: captures dead letters for assertions
//! - [`InMemoryDeadLetterArchive`]: dead-letter archive with status transitions

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use async_trait::async_trait;
use chrono::Utc;
use sentinel_core::dead_letter::{
    ArchiveError, ArchivedDeadLetter, DeadLetter, DeadLetterArchive, DeadLetterError,
    DeadLetterSink, DeadLetterStatus,
};
use sentinel_core::projection::{
    DocumentIndex, IndexError, ReadModelDocument, SearchHits, SearchQuery,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Notify;

/// In-memory document index for fast, deterministic testing.
///
/// Search applies the same fuzzy title matching as the production index:
/// AUTO fuzziness per term, every term required, exact category filter,
/// ordering by fewest edits then id.
///
/// # Example
///
/// ```
/// use sentinel_testing::InMemoryDocumentIndex;
/// use sentinel_core::projection::{DocumentIndex, ReadModelDocument};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let index = InMemoryDocumentIndex::new();
/// index.upsert(ReadModelDocument {
///     id: "42".into(),
///     title: "Seat Reservation: 42".into(),
///     category: "TICKETING".into(),
///     status: "RESERVED".into(),
///     metadata: Default::default(),
/// }).await?;
/// assert!(index.contains("42"));
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryDocumentIndex {
    documents: Arc<RwLock<BTreeMap<String, ReadModelDocument>>>,
    missing: Arc<AtomicBool>,
    fail_always: Arc<AtomicBool>,
    fail_next: Arc<AtomicU32>,
    write_attempts: Arc<AtomicUsize>,
    searches: Arc<AtomicUsize>,
    changed: Arc<Notify>,
}

impl InMemoryDocumentIndex {
    /// Create an empty, existing index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an index that does not exist until the first write.
    #[must_use]
    pub fn uninitialized() -> Self {
        let index = Self::default();
        index.missing.store(true, Ordering::SeqCst);
        index
    }

    /// Make every write fail with [`IndexError::Unavailable`].
    pub fn set_fail_always(&self, fail: bool) {
        self.fail_always.store(fail, Ordering::SeqCst);
    }

    /// Make the next `count` writes fail with [`IndexError::Unavailable`].
    pub fn fail_next_writes(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Number of upsert/delete calls made, failed ones included.
    #[must_use]
    pub fn write_attempts(&self) -> usize {
        self.write_attempts.load(Ordering::SeqCst)
    }

    /// Number of search calls made.
    #[must_use]
    pub fn search_calls(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    /// Check if a document exists
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.documents.read().unwrap().contains_key(id)
    }

    /// Get the number of stored documents
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.read().unwrap().len()
    }

    /// Check if the index is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.read().unwrap().is_empty()
    }

    /// Snapshot of a document, bypassing failure injection.
    #[must_use]
    pub fn document(&self, id: &str) -> Option<ReadModelDocument> {
        self.documents.read().unwrap().get(id).cloned()
    }

    /// Wait until a document with `id` is present.
    pub async fn wait_for(&self, id: &str) -> ReadModelDocument {
        loop {
            let changed = self.changed.notified();
            if let Some(document) = self.document(id) {
                return document;
            }
            changed.await;
        }
    }

    fn begin_write(&self) -> Result<(), IndexError> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_always.load(Ordering::SeqCst) {
            return Err(IndexError::Unavailable("injected outage".to_string()));
        }
        let consumed = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if consumed.is_ok() {
            return Err(IndexError::Unavailable("injected transient failure".to_string()));
        }
        self.missing.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl DocumentIndex for InMemoryDocumentIndex {
    async fn upsert(&self, document: ReadModelDocument) -> Result<(), IndexError> {
        self.begin_write()?;
        self.documents
            .write()
            .unwrap()
            .insert(document.id.clone(), document);
        self.changed.notify_waiters();
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), IndexError> {
        self.begin_write()?;
        self.documents.write().unwrap().remove(id);
        self.changed.notify_waiters();
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<ReadModelDocument>, IndexError> {
        Ok(self.document(id))
    }

    async fn search(&self, query: &SearchQuery) -> Result<SearchHits, IndexError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        if self.missing.load(Ordering::SeqCst) {
            return Err(IndexError::IndexNotFound("documents".to_string()));
        }

        let documents: Vec<ReadModelDocument> =
            self.documents.read().unwrap().values().cloned().collect();
        Ok(SearchHits::rank(query, documents))
    }
}

/// Dead-letter sink that records every letter it accepts.
#[derive(Clone, Debug, Default)]
pub struct InMemoryDeadLetterSink {
    letters: Arc<RwLock<Vec<DeadLetter>>>,
    fail: Arc<AtomicBool>,
}

impl InMemoryDeadLetterSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every hand-off fail (or succeed again).
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Letters accepted so far.
    #[must_use]
    pub fn letters(&self) -> Vec<DeadLetter> {
        self.letters.read().unwrap().clone()
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetterSink {
    async fn send(&self, letter: DeadLetter) -> Result<(), DeadLetterError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(DeadLetterError::HandOffFailed("injected failure".to_string()));
        }
        self.letters.write().unwrap().push(letter);
        Ok(())
    }
}

/// Dead-letter archive held in memory.
#[derive(Clone, Debug, Default)]
pub struct InMemoryDeadLetterArchive {
    entries: Arc<RwLock<BTreeMap<i64, ArchivedDeadLetter>>>,
    fail: Arc<AtomicBool>,
    archived: Arc<Notify>,
}

impl InMemoryDeadLetterArchive {
    /// Create an empty archive.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with [`ArchiveError::Unavailable`].
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Every entry, in archive order.
    #[must_use]
    pub fn entries(&self) -> Vec<ArchivedDeadLetter> {
        self.entries.read().unwrap().values().cloned().collect()
    }

    /// Wait until at least `count` entries are archived.
    pub async fn wait_for_entries(&self, count: usize) -> Vec<ArchivedDeadLetter> {
        loop {
            let archived = self.archived.notified();
            let entries = self.entries();
            if entries.len() >= count {
                return entries;
            }
            archived.await;
        }
    }

    fn check_available(&self) -> Result<(), ArchiveError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ArchiveError::Unavailable("injected outage".to_string()));
        }
        Ok(())
    }

    fn close(
        &self,
        id: i64,
        status: DeadLetterStatus,
        resolved_by: Option<&str>,
        notes: Option<&str>,
    ) -> Result<bool, ArchiveError> {
        self.check_available()?;
        let mut entries = self.entries.write().unwrap();
        match entries.get_mut(&id) {
            Some(entry) if !entry.status.is_closed() => {
                entry.status = status;
                entry.resolved_at = Some(Utc::now());
                entry.resolved_by = resolved_by.map(str::to_string);
                entry.resolution_notes = notes.map(str::to_string);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl DeadLetterArchive for InMemoryDeadLetterArchive {
    async fn archive(&self, letter: &DeadLetter) -> Result<i64, ArchiveError> {
        self.check_available()?;
        let id = {
            let mut entries = self.entries.write().unwrap();
            let id = entries.keys().next_back().map_or(1, |last| last + 1);
            entries.insert(
                id,
                ArchivedDeadLetter {
                    id,
                    letter: letter.clone(),
                    status: DeadLetterStatus::Pending,
                    archived_at: Utc::now(),
                    resolved_at: None,
                    resolved_by: None,
                    resolution_notes: None,
                },
            );
            id
        };
        self.archived.notify_waiters();
        Ok(id)
    }

    async fn list(
        &self,
        status: DeadLetterStatus,
        limit: usize,
    ) -> Result<Vec<ArchivedDeadLetter>, ArchiveError> {
        self.check_available()?;
        Ok(self
            .entries
            .read()
            .unwrap()
            .values()
            .filter(|entry| entry.status == status)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get(&self, id: i64) -> Result<Option<ArchivedDeadLetter>, ArchiveError> {
        self.check_available()?;
        Ok(self.entries.read().unwrap().get(&id).cloned())
    }

    async fn mark_processing(&self, id: i64) -> Result<bool, ArchiveError> {
        self.check_available()?;
        let mut entries = self.entries.write().unwrap();
        match entries.get_mut(&id) {
            Some(entry) if !entry.status.is_closed() => {
                entry.status = DeadLetterStatus::Processing;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn resolve(
        &self,
        id: i64,
        resolved_by: &str,
        notes: Option<&str>,
    ) -> Result<bool, ArchiveError> {
        self.close(id, DeadLetterStatus::Resolved, Some(resolved_by), notes)
    }

    async fn discard(&self, id: i64, reason: &str) -> Result<bool, ArchiveError> {
        self.close(id, DeadLetterStatus::Discarded, None, Some(reason))
    }

    async fn count(&self, status: DeadLetterStatus) -> Result<u64, ArchiveError> {
        self.check_available()?;
        let count = self
            .entries
            .read()
            .unwrap()
            .values()
            .filter(|entry| entry.status == status)
            .count();
        Ok(count as u64)
    }
}
