//! Volatile Store - process-local key/value table with sliding TTL
//!
//! # Design
//!
//! - One `parking_lot::RwLock` guards the value table and the expiration
//!   table together; they are never mutated independently
//! - Lazy expiration on access, plus a bounded random-sample sweep
//! - Every successful read of an expiring key pushes its deadline to
//!   `now + renewal_window`, independent of the original TTL
//!
//! Time is read from `tokio::time::Instant`, so tests can drive expiry with a
//! paused runtime clock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use rand::seq::SliceRandom;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::{DEFAULT_RENEWAL_WINDOW, DEFAULT_SWEEP_SAMPLE_SIZE};

/// Volatile store configuration
#[derive(Debug, Clone)]
pub struct VolatileConfig {
    /// Deadline extension applied on every successful read
    pub renewal_window: Duration,
    /// Maximum expiring keys inspected per sweep
    pub sweep_sample_size: usize,
}

impl Default for VolatileConfig {
    fn default() -> Self {
        Self {
            renewal_window: DEFAULT_RENEWAL_WINDOW,
            sweep_sample_size: DEFAULT_SWEEP_SAMPLE_SIZE,
        }
    }
}

/// Value table and expiration table, always locked together.
struct Table<V> {
    values: HashMap<String, V>,
    expires: HashMap<String, Instant>,
}

impl<V> Table<V> {
    fn remove(&mut self, key: &str) -> bool {
        self.expires.remove(key);
        self.values.remove(key).is_some()
    }
}

/// Thread-safe in-process store with per-key absolute expiration.
pub struct VolatileStore<V> {
    table: RwLock<Table<V>>,
    config: VolatileConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    lazy_expirations: AtomicU64,
    swept: AtomicU64,
}

impl<V: Clone> VolatileStore<V> {
    /// Create a store with default configuration
    pub fn new() -> Self {
        Self::with_config(VolatileConfig::default())
    }

    /// Create a store with custom configuration
    pub fn with_config(config: VolatileConfig) -> Self {
        Self {
            table: RwLock::new(Table {
                values: HashMap::new(),
                expires: HashMap::new(),
            }),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            lazy_expirations: AtomicU64::new(0),
            swept: AtomicU64::new(0),
        }
    }

    /// Upsert `value`. A zero `ttl_seconds` stores it without expiration,
    /// replacing any deadline the key had before.
    pub fn set(&self, key: impl Into<String>, value: V, ttl_seconds: u64) {
        let key = key.into();
        let mut table = self.table.write();
        if ttl_seconds > 0 {
            let deadline = Instant::now() + Duration::from_secs(ttl_seconds);
            table.expires.insert(key.clone(), deadline);
            trace!(key = %key, ttl_seconds, "Set expiring key");
        } else {
            table.expires.remove(&key);
            trace!(key = %key, "Set persistent key");
        }
        table.values.insert(key, value);
    }

    /// Fetch a value, expiring it lazily or renewing its deadline.
    pub fn get(&self, key: &str) -> Option<V> {
        let table = self.table.upgradable_read();

        if !table.expires.contains_key(key) {
            let value = table.values.get(key).cloned();
            self.record_lookup(value.is_some());
            return value;
        }

        // Renewal and lazy deletion both mutate the expiration table
        let mut table = RwLockUpgradableReadGuard::upgrade(table);
        let value = self.check_and_renew(&mut table, key);
        self.record_lookup(value.is_some());
        value
    }

    /// Replace the value of an existing, unexpired key.
    ///
    /// Applies the same expiry and renewal rules as [`get`](Self::get).
    /// Returns whether the update applied.
    pub fn update(&self, key: &str, value: V) -> bool {
        let mut table = self.table.write();

        if table.expires.contains_key(key) && self.check_and_renew(&mut table, key).is_none() {
            return false;
        }

        match table.values.get_mut(key) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Remove a key and its deadline. Returns whether it was present.
    pub fn delete(&self, key: &str) -> bool {
        self.table.write().remove(key)
    }

    /// Number of stored entries, possibly including expired ones not yet swept.
    pub fn count(&self) -> usize {
        self.table.read().values.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Current deadline for `key`, if it has one. Does not renew.
    pub fn deadline(&self, key: &str) -> Option<Instant> {
        self.table.read().expires.get(key).copied()
    }

    /// Sample up to `sweep_sample_size` expiring keys at random and delete the
    /// expired ones. Returns how many were deleted.
    ///
    /// Cost is bounded by the sample size, not by table size, at the price of
    /// exhaustiveness: an expired key may survive several sweeps.
    pub fn periodic_sweep(&self) -> usize {
        let mut table = self.table.write();
        if table.expires.is_empty() {
            return 0;
        }

        let mut keys: Vec<String> = table.expires.keys().cloned().collect();
        keys.shuffle(&mut rand::rng());
        keys.truncate(self.config.sweep_sample_size);

        let now = Instant::now();
        let mut removed = 0;
        for key in keys {
            let expired = table
                .expires
                .get(&key)
                .is_some_and(|deadline| now > *deadline);
            if expired && table.remove(&key) {
                debug!(key = %key, "Swept expired key");
                removed += 1;
            }
        }

        self.swept.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut table = self.table.write();
        table.values.clear();
        table.expires.clear();
    }

    /// Every stored value, in no particular order. Does not renew.
    pub fn values(&self) -> Vec<V> {
        self.table.read().values.values().cloned().collect()
    }

    /// Get configuration
    pub fn config(&self) -> &VolatileConfig {
        &self.config
    }

    /// Get store statistics
    pub fn stats(&self) -> VolatileStats {
        let table = self.table.read();
        VolatileStats {
            entries: table.values.len(),
            expiring_entries: table.expires.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            lazy_expirations: self.lazy_expirations.load(Ordering::Relaxed),
            swept: self.swept.load(Ordering::Relaxed),
        }
    }

    /// Expire or renew a key known to carry a deadline. Caller holds the write lock.
    fn check_and_renew(&self, table: &mut Table<V>, key: &str) -> Option<V> {
        let now = Instant::now();
        let deadline = *table.expires.get(key)?;

        if now > deadline {
            table.remove(key);
            self.lazy_expirations.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Key expired on access");
            return None;
        }

        table
            .expires
            .insert(key.to_string(), now + self.config.renewal_window);
        table.values.get(key).cloned()
    }

    fn record_lookup(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl<V: Clone> Default for VolatileStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Volatile store statistics
#[derive(Debug, Clone, Default)]
pub struct VolatileStats {
    /// Stored entries (including expired-but-unswept)
    pub entries: usize,
    /// Entries carrying a deadline
    pub expiring_entries: usize,
    /// Successful lookups
    pub hits: u64,
    /// Failed lookups
    pub misses: u64,
    /// Keys removed on access after their deadline
    pub lazy_expirations: u64,
    /// Keys removed by the sweep
    pub swept: u64,
}

// =============================================================================
// Tests
// =============================================================================
