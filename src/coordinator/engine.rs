//! Tiered Coordinator Engine
//!
//! Owns the cross-tier protocol. It holds no storage of its own.
//!
//! # Read path
//!
//! volatile → cache → relational. A hit records an access. A faster tier is
//! backfilled only when it reported a genuine miss; a tier that failed for
//! any other reason is left alone so the fault stays visible.
//!
//! # Write path
//!
//! Every mutation runs inside one relational transaction:
//!
//! 1. Relational statements (failure: rollback, nothing else touched)
//! 2. Cache write (failure: rollback)
//! 3. Volatile write (failure: rollback, then rebuild the cache entry from
//!    the relational tier, since the cache write cannot be undone)
//! 4. Commit, then access-count bookkeeping
//!
//! Modify, remove and restore hold the write generation lock for their
//! whole run and bump it on the way out. A lookup backfills only if the
//! generation it saw before reading is still current, so it cannot put back
//! a value that a mutation replaced or deleted while the lookup was in
//! flight.
//!
//! Reads never go through the command log, so a replica may answer a
//! lookup with data older than a write that is concurrently committing on
//! another replica. No staleness bound is exposed.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::adapters::{CacheTier, LoggingEventPublisher, RelationalTier, RelationalTxn, VolatileTier};
use crate::domain::events::DomainEvent;
use crate::domain::model::{AccessCount, Student, TierKind};
use crate::domain::ports::{CommandApplier, EntityTier, EventPublisher};
use crate::error::{Error, Result};
use crate::metrics;
use crate::volatile::VolatileStore;

// =============================================================================
// Configuration
// =============================================================================

/// Default number of hot students kept in the distributed cache
pub const DEFAULT_REWARM_TOP_N: usize = 10;

/// Configuration for the coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// How many of the most accessed students a rewarm loads into the cache
    pub rewarm_top_n: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            rewarm_top_n: DEFAULT_REWARM_TOP_N,
        }
    }
}

/// Replica state captured for log compaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub students: Vec<Student>,
    pub access_counts: Vec<AccessCount>,
}

// =============================================================================
// Coordinator
// =============================================================================

/// Read-through / write-through coordinator over the three tiers.
pub struct TieredCoordinator {
    config: CoordinatorConfig,
    store: Arc<VolatileStore<Student>>,
    volatile: Arc<dyn EntityTier>,
    cache: CacheTier,
    relational: RelationalTier,
    events: Arc<dyn EventPublisher>,
    write_generation: Mutex<u64>,
}

impl TieredCoordinator {
    /// Create a coordinator with default configuration.
    pub fn new(
        store: Arc<VolatileStore<Student>>,
        cache: CacheTier,
        relational: RelationalTier,
    ) -> Self {
        Self::with_config(store, cache, relational, CoordinatorConfig::default())
    }

    /// Create a coordinator with custom configuration.
    pub fn with_config(
        store: Arc<VolatileStore<Student>>,
        cache: CacheTier,
        relational: RelationalTier,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            config,
            volatile: Arc::new(VolatileTier::new(Arc::clone(&store))),
            store,
            cache,
            relational,
            events: Arc::new(LoggingEventPublisher::new()),
            write_generation: Mutex::new(0),
        }
    }

    /// Replace the event publisher.
    pub fn with_event_publisher(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = events;
        self
    }

    /// Replace the entity view over the volatile store.
    ///
    /// The store itself is still used for sweeping and clearing.
    pub fn with_volatile_tier(mut self, volatile: Arc<dyn EntityTier>) -> Self {
        self.volatile = volatile;
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Get the volatile store
    pub fn volatile_store(&self) -> &Arc<VolatileStore<Student>> {
        &self.store
    }

    // =========================================================================
    // Read path
    // =========================================================================

    /// Look a student up, fastest tier first.
    ///
    /// Served locally without consulting the command log. Backfill is
    /// skipped when a modify, remove or restore ran during the lookup.
    #[instrument(skip(self))]
    pub async fn lookup(&self, id: &str) -> Result<Student> {
        let generation = *self.write_generation.lock().await;

        let volatile_missed = match self.volatile.get(id).await {
            Ok(student) => {
                metrics::record_hit(TierKind::Volatile);
                self.record_access(id).await;
                debug!(id = %id, "Served from volatile tier");
                return Ok(student);
            }
            Err(e) => self.note_miss(TierKind::Volatile, id, &e),
        };

        let cache_missed = match self.cache.get(id).await {
            Ok(student) => {
                metrics::record_hit(TierKind::Cache);
                self.record_access(id).await;
                if volatile_missed {
                    self.backfill(generation, &student, &[self.volatile.as_ref()])
                        .await;
                }
                debug!(id = %id, "Served from cache tier");
                return Ok(student);
            }
            Err(e) => self.note_miss(TierKind::Cache, id, &e),
        };

        let student = self.relational.get(id).await.inspect_err(|e| {
            metrics::record_miss(TierKind::Relational, e.is_not_found());
        })?;
        metrics::record_hit(TierKind::Relational);
        self.record_access(id).await;
        let mut stale: Vec<&dyn EntityTier> = Vec::with_capacity(2);
        if volatile_missed {
            stale.push(self.volatile.as_ref());
        }
        if cache_missed {
            stale.push(&self.cache);
        }
        self.backfill(generation, &student, &stale).await;
        debug!(id = %id, "Served from relational tier");
        Ok(student)
    }

    /// Returns true when the failure was a genuine miss.
    fn note_miss(&self, tier: TierKind, id: &str, err: &Error) -> bool {
        let not_found = err.is_not_found();
        metrics::record_miss(tier, not_found);
        if !not_found {
            warn!(id = %id, tier = %tier, error = %err, "Tier read failed, will not backfill it");
        }
        not_found
    }

    async fn backfill(&self, generation: u64, student: &Student, tiers: &[&dyn EntityTier]) {
        if tiers.is_empty() {
            return;
        }
        let current = self.write_generation.lock().await;
        if *current != generation {
            debug!(id = %student.id, "Tiers written during lookup, skipping backfill");
            return;
        }
        for tier in tiers {
            match tier.put(student).await {
                Ok(()) => {
                    metrics::record_backfill(tier.kind());
                    debug!(id = %student.id, tier = %tier.kind(), "Backfilled");
                }
                Err(e) => {
                    warn!(id = %student.id, tier = %tier.kind(), error = %e, "Backfill failed");
                }
            }
        }
    }

    /// Run `write` under the generation lock, bumping it however it ends.
    async fn exclusive<T>(&self, write: impl Future<Output = Result<T>>) -> Result<T> {
        let mut generation = self.write_generation.lock().await;
        let result = write.await;
        *generation = generation.wrapping_add(1);
        result
    }

    // =========================================================================
    // Write path
    // =========================================================================

    /// Insert a new student into every tier.
    #[instrument(skip(self, student), fields(id = %student.id))]
    pub async fn create(&self, student: Student) -> Result<()> {
        let result = self.try_create(&student).await;
        metrics::record_mutation("add", result.is_ok());
        result?;

        self.record_access(&student.id).await;
        info!(id = %student.id, "Student created");
        self.publish(DomainEvent::student_created(&student.id)).await;
        Ok(())
    }

    async fn try_create(&self, student: &Student) -> Result<()> {
        let id = student.id.as_str();
        let mut txn = self.relational.begin().await?;

        if let Err(e) = txn.insert_student(student).await {
            return Err(self.abandon(txn, id, "add", e).await);
        }
        if let Err(e) = self.cache.put(student).await {
            return Err(self.abandon(txn, id, "add", e).await);
        }
        if let Err(e) = self.volatile.put(student).await {
            let e = self.abandon(txn, id, "add", e).await;
            self.compensate(id).await;
            return Err(e);
        }

        if let Err(e) = txn.commit().await {
            self.heal_after_failed_commit(id, "add", &e).await;
            return Err(e);
        }
        Ok(())
    }

    /// Merge a partial update into every tier.
    ///
    /// Non-empty attributes overwrite, supplied subjects are merged into the
    /// stored scores, and a missing cache or volatile copy is skipped.
    #[instrument(skip(self, update), fields(id = %update.id))]
    pub async fn modify(&self, update: Student) -> Result<()> {
        let result = self.exclusive(self.try_modify(&update)).await;
        metrics::record_mutation("update", result.is_ok());
        result?;

        self.record_access(&update.id).await;
        info!(id = %update.id, "Student updated");
        let subjects = update.grades.keys().cloned().collect();
        self.publish(DomainEvent::student_updated(&update.id, subjects))
            .await;
        Ok(())
    }

    async fn try_modify(&self, update: &Student) -> Result<()> {
        let id = update.id.as_str();
        let mut txn = self.relational.begin().await?;
        // Nothing has been written yet; the dropped transaction rolls back
        self.relational.ensure_exists(id).await?;

        if let Err(e) = txn.update_student(update).await {
            return Err(self.abandon(txn, id, "update", e).await);
        }

        match self.cache.merge(update).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => debug!(id = %id, "No cached copy to merge into"),
            Err(e) => return Err(self.abandon(txn, id, "update", e).await),
        }

        match self.volatile.merge(update).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => debug!(id = %id, "No volatile copy to merge into"),
            Err(e) => {
                let e = self.abandon(txn, id, "update", e).await;
                self.compensate(id).await;
                return Err(e);
            }
        }

        if let Err(e) = txn.commit().await {
            self.heal_after_failed_commit(id, "update", &e).await;
            return Err(e);
        }
        Ok(())
    }

    /// Delete a student from every tier and drop its access counter.
    #[instrument(skip(self))]
    pub async fn remove(&self, id: &str) -> Result<()> {
        let result = self.exclusive(self.try_remove(id)).await;
        metrics::record_mutation("delete", result.is_ok());
        result?;

        if let Err(e) = self.relational.drop_access_count(id).await {
            warn!(id = %id, error = %e, "Failed to drop access counter");
        }
        info!(id = %id, "Student removed");
        self.publish(DomainEvent::student_removed(id)).await;
        Ok(())
    }

    async fn try_remove(&self, id: &str) -> Result<()> {
        let mut txn = self.relational.begin().await?;
        self.relational.ensure_exists(id).await?;

        if let Err(e) = txn.delete_student(id).await {
            return Err(self.abandon(txn, id, "delete", e).await);
        }

        match self.cache.delete(id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => debug!(id = %id, "Student was not cached"),
            Err(e) => return Err(self.abandon(txn, id, "delete", e).await),
        }

        match self.volatile.delete(id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => debug!(id = %id, "Student was not in volatile tier"),
            Err(e) => {
                let e = self.abandon(txn, id, "delete", e).await;
                self.compensate(id).await;
                return Err(e);
            }
        }

        if let Err(e) = txn.commit().await {
            self.heal_after_failed_commit(id, "delete", &e).await;
            return Err(e);
        }
        Ok(())
    }

    /// Roll back `txn` and hand back the error that caused it.
    async fn abandon(&self, txn: RelationalTxn, id: &str, operation: &str, cause: Error) -> Error {
        warn!(id = %id, operation, error = %cause, "Rolling back relational transaction");
        if let Err(e) = txn.rollback().await {
            // The transaction is discarded either way
            warn!(id = %id, error = %e, "Explicit rollback failed");
        }
        self.publish(DomainEvent::rolled_back(id, operation, &cause))
            .await;
        cause
    }

    /// The faster tiers were written but the commit did not land.
    async fn heal_after_failed_commit(&self, id: &str, operation: &str, cause: &Error) {
        warn!(id = %id, operation, error = %cause, "Commit failed, healing faster tiers");
        self.publish(DomainEvent::rolled_back(id, operation, cause))
            .await;
        if let Err(e) = self.volatile.delete(id).await {
            if !e.is_not_found() {
                warn!(id = %id, error = %e, "Failed to evict volatile copy");
            }
        }
        self.compensate(id).await;
    }

    async fn compensate(&self, id: &str) {
        if let Err(e) = self.restore_cache(id).await {
            warn!(id = %id, error = %e, "Cache compensation failed, cache may diverge");
        }
    }

    /// Rebuild the cache entry for `id` from the relational tier.
    ///
    /// Deletes the cache key when the student no longer exists there.
    #[instrument(skip(self))]
    pub async fn restore_cache(&self, id: &str) -> Result<()> {
        let result = match self.relational.get(id).await {
            Ok(student) => self.cache.put(&student).await,
            Err(e) if e.is_not_found() => match self.cache.delete(id).await {
                Err(e) if !e.is_not_found() => Err(e),
                _ => Ok(()),
            },
            Err(e) => Err(e),
        };

        metrics::record_compensation(result.is_ok());
        self.publish(DomainEvent::cache_compensated(id, result.is_ok()))
            .await;
        if result.is_ok() {
            info!(id = %id, "Restored cache entry from relational tier");
        }
        result
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Replace the entire cache with the `top_n` most accessed students.
    ///
    /// Returns the loaded students, most accessed first.
    #[instrument(skip(self))]
    pub async fn rewarm_cache(&self, top_n: usize) -> Result<Vec<Student>> {
        let students: Vec<Student> = self
            .relational
            .hottest(top_n)
            .await?
            .into_iter()
            .map(|(student, _)| student)
            .collect();

        self.cache.replace_all(&students).await?;

        let ids: Vec<String> = students.iter().map(|s| s.id.clone()).collect();
        info!(count = ids.len(), "Cache rewarmed");
        self.publish(DomainEvent::cache_rewarmed(ids)).await;
        Ok(students)
    }

    /// Run one active-expiration pass over the volatile tier.
    pub async fn sweep_expired(&self) -> usize {
        let removed = self.store.periodic_sweep();
        metrics::record_swept(removed);
        debug!(removed, "Swept expired volatile keys");
        if removed > 0 {
            self.publish(DomainEvent::expired_swept(removed)).await;
        }
        removed
    }

    /// Load every cached student into the volatile tier.
    pub async fn warm_volatile_from_cache(&self) -> Result<usize> {
        let students = self.cache.list_all().await?;
        for student in &students {
            self.volatile.put(student).await?;
        }
        info!(count = students.len(), "Loaded cache into volatile tier");
        Ok(students.len())
    }

    /// Load the hottest students from the relational tier into the volatile tier.
    pub async fn warm_volatile_from_relational(&self) -> Result<usize> {
        let hottest = self.relational.hottest(self.config.rewarm_top_n).await?;
        for (student, _) in &hottest {
            self.volatile.put(student).await?;
        }
        info!(count = hottest.len(), "Loaded hot students into volatile tier");
        Ok(hottest.len())
    }

    /// Startup warm-up: the cache first, the relational tier as fallback.
    pub async fn warm_up(&self) -> Result<usize> {
        match self.warm_volatile_from_cache().await {
            Ok(count) => Ok(count),
            Err(e) => {
                warn!(error = %e, "Cache warm-up failed, falling back to relational tier");
                self.warm_volatile_from_relational().await
            }
        }
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Capture the relational contents.
    pub async fn snapshot(&self) -> Result<StateSnapshot> {
        let (students, access_counts) = self.relational.dump().await?;
        Ok(StateSnapshot {
            students,
            access_counts,
        })
    }

    /// Replace all tier contents with `snapshot`.
    ///
    /// The relational tier is rewritten in one transaction; the cache is
    /// then rewarmed from it and the volatile tier starts empty.
    #[instrument(skip(self, snapshot), fields(students = snapshot.students.len()))]
    pub async fn restore(&self, snapshot: StateSnapshot) -> Result<()> {
        self.exclusive(self.replace_state(&snapshot)).await?;
        self.rewarm_cache(self.config.rewarm_top_n).await?;

        info!(students = snapshot.students.len(), "Restored replica state from snapshot");
        self.publish(DomainEvent::snapshot_restored(snapshot.students.len()))
            .await;
        Ok(())
    }

    async fn replace_state(&self, snapshot: &StateSnapshot) -> Result<()> {
        let mut txn = self.relational.begin().await?;
        txn.replace_all(&snapshot.students, &snapshot.access_counts)
            .await?;
        txn.commit().await?;

        self.store.clear();
        self.cache.flush().await
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn record_access(&self, id: &str) {
        if let Err(e) = self.relational.record_access(id).await {
            warn!(id = %id, error = %e, "Failed to record access");
        }
    }

    async fn publish(&self, event: DomainEvent) {
        if let Err(e) = self.events.publish(event).await {
            warn!(error = %e, "Failed to publish domain event");
        }
    }
}

// =============================================================================
// Command Applier
// =============================================================================

#[async_trait]
impl CommandApplier for TieredCoordinator {
    async fn apply_create(&self, student: Student) -> Result<()> {
        self.create(student).await
    }

    async fn apply_modify(&self, update: Student) -> Result<()> {
        self.modify(update).await
    }

    async fn apply_remove(&self, id: &str) -> Result<()> {
        self.remove(id).await
    }

    async fn apply_rewarm(&self) -> Result<()> {
        self.rewarm_cache(self.config.rewarm_top_n).await.map(|_| ())
    }

    async fn apply_sweep(&self) -> Result<()> {
        self.sweep_expired().await;
        Ok(())
    }

    async fn snapshot_state(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.snapshot().await?)?)
    }

    async fn restore_state(&self, snapshot: &[u8]) -> Result<()> {
        let snapshot: StateSnapshot = serde_json::from_slice(snapshot)?;
        self.restore(snapshot).await
    }
}
