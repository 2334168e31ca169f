//! In-memory resource store.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use async_trait::async_trait;
use sentinel_core::resource::{Resource, ResourceId, ResourceStore, ResourceStoreError};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-memory [`ResourceStore`] with failure and latency injection.
///
/// # Example
///
/// ```
/// use sentinel_testing::InMemoryResourceStore;
/// use sentinel_core::resource::{ResourceId, ResourceStore};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryResourceStore::with_available([1, 2, 3]);
/// assert!(store.compare_and_set(ResourceId(1), false, true).await?);
/// assert!(!store.compare_and_set(ResourceId(1), false, true).await?);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryResourceStore {
    rows: Arc<Mutex<BTreeMap<ResourceId, Resource>>>,
    unavailable: Arc<AtomicBool>,
    latency: Arc<Mutex<Option<Duration>>>,
    read_latency: Arc<Mutex<Option<Duration>>>,
    cas_calls: Arc<AtomicUsize>,
}

impl InMemoryResourceStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding unreserved resources with the given ids.
    #[must_use]
    pub fn with_available(ids: impl IntoIterator<Item = i64>) -> Self {
        let store = Self::new();
        {
            let mut rows = store.rows.lock().unwrap();
            for id in ids {
                rows.insert(ResourceId(id), Resource::available(ResourceId(id)));
            }
        }
        store
    }

    /// Make every call fail with [`ResourceStoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every `compare_and_set` by `latency` (a slow transaction).
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock().unwrap() = latency;
    }

    /// Delay every `get` by `latency` (a slow read).
    pub fn set_read_latency(&self, latency: Option<Duration>) {
        *self.read_latency.lock().unwrap() = latency;
    }

    /// Number of `compare_and_set` calls made.
    #[must_use]
    pub fn compare_and_set_calls(&self) -> usize {
        self.cas_calls.load(Ordering::SeqCst)
    }

    /// Snapshot of a row, bypassing failure injection.
    #[must_use]
    pub fn peek(&self, id: i64) -> Option<Resource> {
        self.rows.lock().unwrap().get(&ResourceId(id)).copied()
    }

    fn check_available(&self) -> Result<(), ResourceStoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ResourceStoreError::Unavailable("injected outage".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceStore for InMemoryResourceStore {
    async fn get(&self, id: ResourceId) -> Result<Option<Resource>, ResourceStoreError> {
        self.check_available()?;
        let latency = *self.read_latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        Ok(self.rows.lock().unwrap().get(&id).copied())
    }

    async fn put(&self, resource: Resource) -> Result<(), ResourceStoreError> {
        self.check_available()?;
        self.rows.lock().unwrap().insert(resource.id, resource);
        Ok(())
    }

    async fn compare_and_set(
        &self,
        id: ResourceId,
        expected: bool,
        new: bool,
    ) -> Result<bool, ResourceStoreError> {
        self.check_available()?;
        self.cas_calls.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&id) {
            Some(row) if row.reserved == expected => {
                row.reserved = new;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, id: ResourceId) -> Result<bool, ResourceStoreError> {
        self.check_available()?;
        Ok(self.rows.lock().unwrap().remove(&id).is_some())
    }

    async fn list_unreserved(&self, limit: usize) -> Result<Vec<Resource>, ResourceStoreError> {
        self.check_available()?;
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|row| !row.reserved)
            .take(limit)
            .copied()
            .collect())
    }
}
