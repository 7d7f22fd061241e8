//! Named TTL locks for sync mutual exclusion
//!
//! One lock per source, held for the duration of a sync, with a TTL so a
//! crashed holder cannot wedge the source forever. Backends plug in behind
//! the [`LockBackend`] trait: Redis gives cross-process exclusion via
//! SET NX EX; the in-memory backend covers single-process deployments and
//! tests with the same semantics.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::error::SyncError;

/// A named-lock store with TTL semantics
#[async_trait]
pub trait LockBackend: Send + Sync {
    /// Try to take the named lock. `Ok(false)` means somebody else holds
    /// it; `Err` means the backend itself failed.
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<bool, SyncError>;

    /// Drop the named lock. Must be idempotent: releasing a lock nobody
    /// holds is fine, because release runs on every exit path.
    async fn release(&self, key: &str) -> Result<(), SyncError>;
}

/// Handle to a lock backend. Clones share the backend, so every holder of
/// a clone contends on the same locks.
#[derive(Clone)]
pub struct SyncLock {
    backend: Arc<dyn LockBackend>,
}

impl SyncLock {
    /// In-process lock table
    pub fn in_memory() -> Self {
        Self::with_backend(Arc::new(MemoryLockBackend::default()))
    }

    /// Locks shared through a Redis instance
    pub fn redis(url: &str) -> Result<Self, SyncError> {
        Ok(Self::with_backend(Arc::new(RedisLockBackend::new(url)?)))
    }

    /// Any other [`LockBackend`] implementation
    pub fn with_backend(backend: Arc<dyn LockBackend>) -> Self {
        Self { backend }
    }

    pub async fn acquire(&self, key: &str, ttl: Duration) -> Result<bool, SyncError> {
        self.backend.acquire(key, ttl).await
    }

    pub async fn release(&self, key: &str) -> Result<(), SyncError> {
        self.backend.release(key).await
    }
}

/// Expiry-tracking in-process lock table
#[derive(Default)]
pub struct MemoryLockBackend {
    held: Mutex<HashMap<String, Instant>>,
}

#[async_trait]
impl LockBackend for MemoryLockBackend {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<bool, SyncError> {
        let mut held = self.held.lock().await;
        let now = Instant::now();
        held.retain(|_, expires| *expires > now);
        if held.contains_key(key) {
            return Ok(false);
        }
        held.insert(key.to_string(), now + ttl);
        Ok(true)
    }

    async fn release(&self, key: &str) -> Result<(), SyncError> {
        self.held.lock().await.remove(key);
        Ok(())
    }
}

/// SET NX EX / DEL against a shared Redis instance
pub struct RedisLockBackend {
    client: redis::Client,
}

impl RedisLockBackend {
    pub fn new(url: &str) -> Result<Self, SyncError> {
        let client = redis::Client::open(url).map_err(|e| SyncError::Lock(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl LockBackend for RedisLockBackend {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<bool, SyncError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| SyncError::Lock(e.to_string()))?;
        let outcome: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| SyncError::Lock(e.to_string()))?;
        Ok(outcome.is_some())
    }

    async fn release(&self, key: &str) -> Result<(), SyncError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| SyncError::Lock(e.to_string()))?;
        let _deleted: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| SyncError::Lock(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(300);

    #[tokio::test]
    async fn second_acquire_fails_until_release() {
        let lock = SyncLock::in_memory();
        assert!(lock.acquire("sync_source_7", TTL).await.unwrap());
        assert!(!lock.acquire("sync_source_7", TTL).await.unwrap());

        lock.release("sync_source_7").await.unwrap();
        assert!(lock.acquire("sync_source_7", TTL).await.unwrap());
    }

    #[tokio::test]
    async fn different_keys_do_not_contend() {
        let lock = SyncLock::in_memory();
        assert!(lock.acquire("sync_source_1", TTL).await.unwrap());
        assert!(lock.acquire("sync_source_2", TTL).await.unwrap());
    }

    #[tokio::test]
    async fn expired_lock_can_be_retaken() {
        let lock = SyncLock::in_memory();
        assert!(lock.acquire("sync_source_1", Duration::from_millis(10)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(lock.acquire("sync_source_1", TTL).await.unwrap());
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let lock = SyncLock::in_memory();
        lock.release("never_held").await.unwrap();
        assert!(lock.acquire("never_held", TTL).await.unwrap());
        lock.release("never_held").await.unwrap();
        lock.release("never_held").await.unwrap();
    }

    #[tokio::test]
    async fn clones_contend_on_the_same_backend() {
        let lock = SyncLock::in_memory();
        let other = lock.clone();
        assert!(lock.acquire("sync_source_9", TTL).await.unwrap());
        assert!(!other.acquire("sync_source_9", TTL).await.unwrap());
        lock.release("sync_source_9").await.unwrap();
        assert!(other.acquire("sync_source_9", TTL).await.unwrap());
    }
}
