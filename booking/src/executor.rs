//! Atomic check-and-set of a resource's reserved flag.

use sentinel_core::resource::{Resource, ResourceId, ResourceStore, ResourceStoreError};
use std::sync::Arc;
use thiserror::Error;

/// Business result of a reservation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationResult {
    /// The resource moved from unreserved to reserved
    Applied,
    /// The resource was already reserved (possibly by a concurrent writer)
    AlreadyReserved,
}

/// Faults raised while reserving.
#[derive(Error, Debug, Clone)]
pub enum ReservationError {
    /// No resource with this id exists
    #[error("Resource {0} not found")]
    NotFound(ResourceId),

    /// The store failed
    #[error(transparent)]
    Store(#[from] ResourceStoreError),
}

/// Runs the reservation transaction against a [`ResourceStore`].
///
/// The caller holds the resource lock; the store's `compare_and_set` guards
/// the row itself.
#[derive(Clone)]
pub struct ReservationExecutor {
    store: Arc<dyn ResourceStore>,
}

impl ReservationExecutor {
    /// Create an executor over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    /// Reserve `id`: [`check`](Self::check) followed by [`commit`](Self::commit).
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::NotFound`] for unknown ids and
    /// [`ReservationError::Store`] when the store fails.
    #[tracing::instrument(skip(self), fields(resource_id = %id))]
    pub async fn reserve(&self, id: ResourceId) -> Result<ReservationResult, ReservationError> {
        if self.check(id).await? {
            tracing::debug!("Resource already reserved");
            return Ok(ReservationResult::AlreadyReserved);
        }
        self.commit(id).await
    }

    /// Whether `id` is already reserved. Reads only.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::NotFound`] for unknown ids and
    /// [`ReservationError::Store`] when the store fails.
    pub async fn check(&self, id: ResourceId) -> Result<bool, ReservationError> {
        let resource = self
            .store
            .get(id)
            .await?
            .ok_or(ReservationError::NotFound(id))?;
        Ok(resource.reserved)
    }

    /// Flip the reserved flag of `id` from false to true.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::Store`] when the store fails.
    pub async fn commit(&self, id: ResourceId) -> Result<ReservationResult, ReservationError> {
        if self.store.compare_and_set(id, false, true).await? {
            tracing::debug!(resource_id = %id, "Reservation committed");
            Ok(ReservationResult::Applied)
        } else {
            tracing::debug!(resource_id = %id, "Lost compare-and-set to a concurrent writer");
            Ok(ReservationResult::AlreadyReserved)
        }
    }

    /// Up to `limit` unreserved resources.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceStoreError`] when the store fails.
    pub async fn available(&self, limit: usize) -> Result<Vec<Resource>, ResourceStoreError> {
        self.store.list_unreserved(limit).await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use sentinel_testing::InMemoryResourceStore;

    fn executor(store: &InMemoryResourceStore) -> ReservationExecutor {
        ReservationExecutor::new(Arc::new(store.clone()))
    }

    #[tokio::test]
    async fn reserves_once() {
        let store = InMemoryResourceStore::with_available([1]);
        let executor = executor(&store);

        assert_eq!(executor.reserve(ResourceId(1)).await.unwrap(), ReservationResult::Applied);
        assert_eq!(
            executor.reserve(ResourceId(1)).await.unwrap(),
            ReservationResult::AlreadyReserved
        );
        assert_eq!(store.peek(1).map(|r| r.reserved), Some(true));
        // The second attempt saw the flag and never tried to write.
        assert_eq!(store.compare_and_set_calls(), 1);
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let store = InMemoryResourceStore::new();
        let result = executor(&store).reserve(ResourceId(9)).await;
        assert!(matches!(result, Err(ReservationError::NotFound(ResourceId(9)))));
    }

    #[tokio::test]
    async fn store_outage_is_a_fault() {
        let store = InMemoryResourceStore::with_available([1]);
        store.set_unavailable(true);
        let result = executor(&store).reserve(ResourceId(1)).await;
        assert!(matches!(result, Err(ReservationError::Store(_))));
    }

    #[tokio::test]
    async fn commit_loses_to_earlier_writer() {
        let store = InMemoryResourceStore::with_available([1]);
        let executor = executor(&store);

        assert!(!executor.check(ResourceId(1)).await.unwrap());
        assert_eq!(executor.commit(ResourceId(1)).await.unwrap(), ReservationResult::Applied);
        assert_eq!(
            executor.commit(ResourceId(1)).await.unwrap(),
            ReservationResult::AlreadyReserved
        );
        assert!(executor.check(ResourceId(1)).await.unwrap());
    }

    #[tokio::test]
    async fn lists_only_unreserved() {
        let store = InMemoryResourceStore::with_available([1, 2, 3]);
        let executor = executor(&store);
        executor.reserve(ResourceId(2)).await.unwrap();

        let ids: Vec<_> = executor
            .available(10)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id.get())
            .collect();
        assert_eq!(ids, [1, 3]);
    }
}
