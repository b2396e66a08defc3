//! Shared cache capability
//!
//! Production wires this to the remote cache; the memory implementation
//! backs tests and single-instance deployments. The only load-bearing use
//! in the core is the per-chain HD index counter, and even that is
//! advisory: the store's `(chain, path_index)` uniqueness is authoritative.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::Result;

/// Key of the per-chain HD index counter
pub fn hd_index_key(chain: &str) -> String {
    format!("wallet:hd_index:{}", chain)
}

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;

    /// Atomically increment a counter, returning the new value.
    /// A missing counter starts at zero, so the first call returns 1.
    async fn incr(&self, key: &str) -> Result<i64>;
}

/// In-process cache over concurrent maps
#[derive(Default)]
pub struct MemoryCache {
    values: DashMap<String, (Vec<u8>, Option<Instant>)>,
    counters: DashMap<String, i64>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if let Some(entry) = self.values.get(key) {
            let (value, expires) = entry.value();
            if expires.map_or(true, |deadline| Instant::now() < deadline) {
                return Ok(Some(value.clone()));
            }
        }
        // Expired entries are dropped lazily
        self.values
            .remove_if(key, |_, (_, expires)| {
                expires.map_or(false, |deadline| Instant::now() >= deadline)
            });
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let expires = ttl.map(|d| Instant::now() + d);
        self.values.insert(key.to_string(), (value, expires));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.values.remove(key);
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut entry = self.counters.entry(key.to_string()).or_insert(0);
        *entry += 1;
        Ok(*entry)
    }
}
