//! Lease lock on top of Redis string keys.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use sentinel_core::lock::{
    LockAcquisition, LockCoordinator, LockError, LockHandle, LockOwner, lease_expiry,
};
use std::time::Duration;
use tokio::time::Instant;

/// Take the lease if free, or extend it if `owner` already holds it.
const ACQUIRE_SCRIPT: &str = r"
    if redis.call('SET', KEYS[1], ARGV[1], 'NX', 'PX', ARGV[2]) then
        return 1
    end
    if redis.call('GET', KEYS[1]) == ARGV[1] then
        redis.call('PEXPIRE', KEYS[1], ARGV[2])
        return 1
    end
    return 0
";

/// Delete the lease only if `owner` still holds it.
const RELEASE_SCRIPT: &str = r"
    if redis.call('GET', KEYS[1]) == ARGV[1] then
        return redis.call('DEL', KEYS[1])
    end
    return 0
";

/// Default pause between acquire attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// [`LockCoordinator`] backed by Redis.
#[derive(Clone)]
pub struct RedisLockCoordinator {
    /// Connection manager for connection pooling.
    conn_manager: ConnectionManager,
    acquire_script: Script,
    release_script: Script,
    poll_interval: Duration,
}

impl RedisLockCoordinator {
    /// Connect to Redis at `redis_url`.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Unavailable`] if the connection cannot be made.
    pub async fn new(redis_url: &str) -> Result<Self, LockError> {
        let client = Client::open(redis_url)
            .map_err(|e| LockError::Unavailable(format!("Failed to create Redis client: {e}")))?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            LockError::Unavailable(format!("Failed to create Redis connection manager: {e}"))
        })?;

        Ok(Self::from_connection(conn_manager))
    }

    /// Wrap an existing connection manager.
    #[must_use]
    pub fn from_connection(conn_manager: ConnectionManager) -> Self {
        Self {
            conn_manager,
            acquire_script: Script::new(ACQUIRE_SCRIPT),
            release_script: Script::new(RELEASE_SCRIPT),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Set the pause between acquire attempts while the key is held.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    async fn try_acquire(&self, key: &str, owner: LockOwner, lease_ms: u64) -> Result<bool, LockError> {
        let mut conn = self.conn_manager.clone();
        let granted: i64 = self
            .acquire_script
            .key(key)
            .arg(owner.to_string())
            .arg(lease_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| LockError::Unavailable(format!("Failed to acquire lease: {e}")))?;

        match granted {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(LockError::Protocol(format!(
                "Unexpected acquire script reply: {other}"
            ))),
        }
    }
}

#[async_trait]
impl LockCoordinator for RedisLockCoordinator {
    async fn acquire(
        &self,
        key: &str,
        owner: LockOwner,
        wait: Duration,
        lease: Duration,
    ) -> Result<LockAcquisition, LockError> {
        // PX rejects zero, so the shortest lease is one millisecond.
        let lease_ms = u64::try_from(lease.as_millis()).unwrap_or(u64::MAX).max(1);
        let deadline = Instant::now() + wait;

        loop {
            if self.try_acquire(key, owner, lease_ms).await? {
                tracing::debug!(%key, %owner, lease_ms, "Lease acquired");
                return Ok(LockAcquisition::Acquired(LockHandle {
                    key: key.to_string(),
                    owner,
                    lease_expiry: lease_expiry(lease),
                }));
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::debug!(%key, %owner, "Lease wait timed out");
                return Ok(LockAcquisition::TimedOut);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn release(&self, handle: &LockHandle) -> Result<bool, LockError> {
        let mut conn = self.conn_manager.clone();
        let removed: i64 = self
            .release_script
            .key(&handle.key)
            .arg(handle.owner.to_string())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| LockError::Unavailable(format!("Failed to release lease: {e}")))?;

        tracing::debug!(key = %handle.key, owner = %handle.owner, removed = removed == 1, "Lease release");
        Ok(removed == 1)
    }
}
