//! In-memory lease lock coordinator.
//!
//! Leases live on the tokio clock, so tests can pause time and advance past a
//! lease deterministically.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use async_trait::async_trait;
use sentinel_core::lock::{
    LockAcquisition, LockCoordinator, LockError, LockHandle, LockOwner, lease_expiry,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct Lease {
    owner: LockOwner,
    expires: Instant,
}

/// In-memory [`LockCoordinator`] with a per-key lease table.
#[derive(Clone, Default)]
pub struct InMemoryLockCoordinator {
    leases: Arc<Mutex<HashMap<String, Lease>>>,
    released: Arc<Notify>,
    unavailable: Arc<AtomicBool>,
    releases: Arc<AtomicUsize>,
}

impl InMemoryLockCoordinator {
    /// Create an empty coordinator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with [`LockError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Whether `key` currently has an unexpired lease.
    #[must_use]
    pub fn is_locked(&self, key: &str) -> bool {
        self.leases
            .lock()
            .unwrap()
            .get(key)
            .is_some_and(|lease| lease.expires > Instant::now())
    }

    /// Current owner of `key`, if its lease is live.
    #[must_use]
    pub fn holder(&self, key: &str) -> Option<LockOwner> {
        self.leases
            .lock()
            .unwrap()
            .get(key)
            .filter(|lease| lease.expires > Instant::now())
            .map(|lease| lease.owner)
    }

    /// Number of release calls that removed a lease.
    #[must_use]
    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), LockError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LockError::Unavailable("injected outage".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LockCoordinator for InMemoryLockCoordinator {
    async fn acquire(
        &self,
        key: &str,
        owner: LockOwner,
        wait: Duration,
        lease: Duration,
    ) -> Result<LockAcquisition, LockError> {
        self.check_available()?;
        let deadline = Instant::now() + wait;

        loop {
            let released = self.released.notified();
            let wake_at = {
                let mut leases = self.leases.lock().unwrap();
                let now = Instant::now();
                match leases.get(key) {
                    Some(current) if current.expires > now && current.owner != owner => {
                        if now >= deadline {
                            return Ok(LockAcquisition::TimedOut);
                        }
                        deadline.min(current.expires)
                    }
                    _ => {
                        leases.insert(
                            key.to_string(),
                            Lease {
                                owner,
                                expires: now + lease,
                            },
                        );
                        return Ok(LockAcquisition::Acquired(LockHandle {
                            key: key.to_string(),
                            owner,
                            lease_expiry: lease_expiry(lease),
                        }));
                    }
                }
            };

            // Either a release or the earlier of deadline / lease expiry wakes us.
            let _ = tokio::time::timeout_at(wake_at, released).await;
        }
    }

    async fn release(&self, handle: &LockHandle) -> Result<bool, LockError> {
        self.check_available()?;
        let removed = {
            let mut leases = self.leases.lock().unwrap();
            match leases.get(&handle.key) {
                Some(lease) if lease.owner == handle.owner => {
                    leases.remove(&handle.key);
                    true
                }
                _ => false,
            }
        };
        if removed {
            self.releases.fetch_add(1, Ordering::SeqCst);
            self.released.notify_waiters();
        }
        Ok(removed)
    }
}
