//! Reservable resources and their persistence port.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Identifier of a reservable resource (a seat).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub i64);

impl ResourceId {
    /// Create a new resource id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// The raw numeric id.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ResourceId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

impl From<i64> for ResourceId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// A reservable resource.
///
/// `reserved` moves from `false` to `true` exactly once. There is no way back.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Resource id
    pub id: ResourceId,
    /// Whether the resource has been reserved
    pub reserved: bool,
}

impl Resource {
    /// A resource that has not been reserved yet.
    #[must_use]
    pub const fn available(id: ResourceId) -> Self {
        Self {
            id,
            reserved: false,
        }
    }
}

/// Errors raised by resource stores.
#[derive(Error, Debug, Clone)]
pub enum ResourceStoreError {
    /// The store could not be reached
    #[error("Resource store unavailable: {0}")]
    Unavailable(String),

    /// A query or transaction failed
    #[error("Resource store query failed: {0}")]
    Query(String),
}

/// Authoritative, transactional store of resources.
///
/// `compare_and_set` must run as a single transaction in the store: the row
/// is only written when its current `reserved` flag equals `expected`.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Load a resource.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceStoreError`] if the store fails.
    async fn get(&self, id: ResourceId) -> Result<Option<Resource>, ResourceStoreError>;

    /// Insert or overwrite a resource.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceStoreError`] if the store fails.
    async fn put(&self, resource: Resource) -> Result<(), ResourceStoreError>;

    /// Atomically set `reserved` to `new` if it currently equals `expected`.
    ///
    /// Returns `false` when the row is missing or holds another value.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceStoreError`] if the store fails.
    async fn compare_and_set(
        &self,
        id: ResourceId,
        expected: bool,
        new: bool,
    ) -> Result<bool, ResourceStoreError>;

    /// Remove a resource. Returns whether a row was removed.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceStoreError`] if the store fails.
    async fn delete(&self, id: ResourceId) -> Result<bool, ResourceStoreError>;

    /// List up to `limit` unreserved resources, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceStoreError`] if the store fails.
    async fn list_unreserved(&self, limit: usize) -> Result<Vec<Resource>, ResourceStoreError>;
}
