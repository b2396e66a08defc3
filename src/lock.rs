//! Distributed lock capability
//!
//! Semantics follow the Redis `SET NX EX` pattern: acquire returns whether
//! the caller obtained the lock, the TTL bounds how long a lost holder can
//! block others, and release deletes unconditionally. Known gap (shared
//! with the Redis implementation this mirrors): release does not verify
//! ownership, so a holder that outlives its TTL can delete a successor's
//! lock. The durable uniqueness keys in the store are the real safety net.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::Result;

#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Try to take the lock. `Ok(false)` means another worker holds it.
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Release the lock. Safe to call on an expired or absent lock.
    async fn release(&self, key: &str) -> Result<()>;
}

/// In-process lock table with TTL expiry
#[derive(Default)]
pub struct MemoryLock {
    held: DashMap<String, Instant>,
}

impl MemoryLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DistributedLock for MemoryLock {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut acquired = false;
        let mut entry = self.held.entry(key.to_string()).or_insert_with(|| {
            acquired = true;
            now + ttl
        });
        if !acquired && *entry <= now {
            // Previous holder expired; take over
            *entry = now + ttl;
            acquired = true;
        }
        Ok(acquired)
    }

    async fn release(&self, key: &str) -> Result<()> {
        self.held.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_is_exclusive() {
        let lock = MemoryLock::new();
        assert!(lock.acquire("k", Duration::from_secs(60)).await.unwrap());
        assert!(!lock.acquire("k", Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_frees_lock() {
        let lock = MemoryLock::new();
        assert!(lock.acquire("k", Duration::from_secs(60)).await.unwrap());
        lock.release("k").await.unwrap();
        assert!(lock.acquire("k", Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn test_ttl_expiry_allows_takeover() {
        let lock = MemoryLock::new();
        assert!(lock.acquire("k", Duration::from_millis(10)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(lock.acquire("k", Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn test_independent_keys() {
        let lock = MemoryLock::new();
        assert!(lock.acquire("a", Duration::from_secs(60)).await.unwrap());
        assert!(lock.acquire("b", Duration::from_secs(60)).await.unwrap());
    }
}
