//! In-Memory Distributed Cache Gateway
//!
//! A hash-per-key store standing in for the shared cache cluster. `set`
//! merges fields into the existing hash, as `HSET` does.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use super::faults::FaultPlan;
use crate::domain::ports::{CacheError, CacheFields, DistributedCacheGateway};

/// Operations that can be forced to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheOp {
    Set,
    Get,
    Delete,
    List,
    Flush,
}

/// In-memory cache backend
pub struct InMemoryCacheGateway {
    entries: DashMap<String, CacheFields>,
    faults: FaultPlan<CacheOp>,
    gets: AtomicU64,
    sets: AtomicU64,
}

impl Default for InMemoryCacheGateway {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            faults: FaultPlan::new(),
            gets: AtomicU64::new(0),
            sets: AtomicU64::new(0),
        }
    }
}

impl InMemoryCacheGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` calls of `op`.
    pub fn fail_next(&self, op: CacheOp, times: usize) {
        self.faults.arm(op, times);
    }

    /// Disarm every pending fault.
    pub fn clear_faults(&self) {
        self.faults.clear();
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of `get_all` calls served.
    pub fn get_calls(&self) -> u64 {
        self.gets.load(Ordering::Relaxed)
    }

    /// Number of `set` calls served.
    pub fn set_calls(&self) -> u64 {
        self.sets.load(Ordering::Relaxed)
    }

    fn check(&self, op: CacheOp) -> Result<(), CacheError> {
        if self.faults.trip(op) {
            return Err(CacheError::Unavailable(format!("injected {:?} failure", op)));
        }
        Ok(())
    }
}

#[async_trait]
impl DistributedCacheGateway for InMemoryCacheGateway {
    async fn set(&self, key: &str, fields: CacheFields) -> Result<(), CacheError> {
        self.check(CacheOp::Set)?;
        self.sets.fetch_add(1, Ordering::Relaxed);
        self.entries.entry(key.to_string()).or_default().extend(fields);
        Ok(())
    }

    async fn get_all(&self, key: &str) -> Result<Option<CacheFields>, CacheError> {
        self.check(CacheOp::Get)?;
        self.gets.fetch_add(1, Ordering::Relaxed);
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.check(CacheOp::Delete)?;
        Ok(self.entries.remove(key).is_some())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        self.check(CacheOp::List)?;
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn flush_all(&self) -> Result<(), CacheError> {
        self.check(CacheOp::Flush)?;
        self.entries.clear();
        Ok(())
    }
}
