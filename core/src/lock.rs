//! Lease-based distributed mutual exclusion.
//!
//! A [`LockCoordinator`] hands out at most one lease per key at a time.
//! Leases expire on their own, so a holder that crashes cannot block the key
//! past its lease. Contention is not an error: a wait that runs out yields
//! [`LockAcquisition::TimedOut`].
//!
//! The caller picks the [`LockOwner`] before acquiring. If the caller is
//! interrupted mid-acquire it can still release with a provisional handle,
//! and the ownership check makes that release safe whether or not the lease
//! was actually granted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Opaque lease owner token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockOwner(pub Uuid);

impl LockOwner {
    /// A fresh random owner.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for LockOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Proof of a held lease.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockHandle {
    /// Locked key
    pub key: String,
    /// Lease owner
    pub owner: LockOwner,
    /// When the lease lapses if not released
    pub lease_expiry: DateTime<Utc>,
}

impl LockHandle {
    /// Handle for a lease that may or may not have been granted.
    ///
    /// Releasing it is safe either way: the coordinator only removes a lease
    /// held by `owner`.
    #[must_use]
    pub fn provisional(key: impl Into<String>, owner: LockOwner) -> Self {
        Self {
            key: key.into(),
            owner,
            lease_expiry: Utc::now(),
        }
    }
}

/// Result of an acquire attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LockAcquisition {
    /// The lease is held
    Acquired(LockHandle),
    /// Another owner held the key for the whole wait window
    TimedOut,
}

/// Errors raised by lock coordinators. Contention is never one of them.
#[derive(Error, Debug, Clone)]
pub enum LockError {
    /// The coordinator backend could not be reached
    #[error("Lock coordinator unavailable: {0}")]
    Unavailable(String),

    /// The backend answered with something unexpected
    #[error("Lock coordinator protocol error: {0}")]
    Protocol(String),
}

/// Distributed lease lock.
#[async_trait]
pub trait LockCoordinator: Send + Sync {
    /// Try to take the lease on `key` for `owner`, waiting at most `wait`.
    ///
    /// A granted lease expires after `lease` unless released first.
    ///
    /// # Errors
    ///
    /// Returns [`LockError`] only when the coordinator itself fails.
    async fn acquire(
        &self,
        key: &str,
        owner: LockOwner,
        wait: Duration,
        lease: Duration,
    ) -> Result<LockAcquisition, LockError>;

    /// Release a lease. Returns whether a lease held by `handle.owner` was removed.
    ///
    /// Idempotent. Never removes another owner's lease.
    ///
    /// # Errors
    ///
    /// Returns [`LockError`] only when the coordinator itself fails.
    async fn release(&self, handle: &LockHandle) -> Result<bool, LockError>;
}

/// Lease expiry timestamp for a lease starting now.
#[must_use]
pub fn lease_expiry(lease: Duration) -> DateTime<Utc> {
    let lease = chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::MAX);
    Utc::now()
        .checked_add_signed(lease)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
