//! Tiered Coordinator Integration Tests
//!
//! Drives the read-through / write-through protocol end to end over the
//! in-memory gateways:
//! - Read path: selective backfill
//! - Write path: rollback, compensation, commit failure
//! - Maintenance: sliding TTL, sweep, rewarm, snapshot restore

use std::sync::Arc;
use std::time::Duration;

use rollcall::adapters::{
    CacheOp, CacheTier, InMemoryCacheGateway, InMemoryEventCollector, InMemoryRelationalGateway,
    RelationalOp, RelationalTier,
};
use rollcall::coordinator::{CoordinatorConfig, TieredCoordinator};
use rollcall::domain::ports::EntityTier;
use rollcall::domain::{Student, TierKind};
use rollcall::error::Error;
use rollcall::volatile::{VolatileConfig, VolatileStore};

struct Fixture {
    coordinator: TieredCoordinator,
    store: Arc<VolatileStore<Student>>,
    cache: Arc<InMemoryCacheGateway>,
    relational: Arc<InMemoryRelationalGateway>,
    events: Arc<InMemoryEventCollector>,
}

impl Fixture {
    fn new() -> Self {
        Self::with_store(VolatileStore::new(), CoordinatorConfig::default())
    }

    fn with_store(store: VolatileStore<Student>, config: CoordinatorConfig) -> Self {
        let store = Arc::new(store);
        let cache = Arc::new(InMemoryCacheGateway::new());
        let relational = Arc::new(InMemoryRelationalGateway::new());
        let events = Arc::new(InMemoryEventCollector::new());
        let coordinator = TieredCoordinator::with_config(
            store.clone(),
            CacheTier::new(cache.clone()),
            RelationalTier::new(relational.clone()),
            config,
        )
        .with_event_publisher(events.clone());

        Self {
            coordinator,
            store,
            cache,
            relational,
            events,
        }
    }

    fn cache_tier(&self) -> CacheTier {
        CacheTier::new(self.cache.clone())
    }

    fn cached(&self, id: &str) -> bool {
        self.cache.contains_key(&CacheTier::key(id))
    }
}

fn ada() -> Student {
    Student::new("s1", "Ada", "f", "1A")
        .with_grade("math", 91.0)
        .with_grade("art", 77.0)
}

// =============================================================================
// Read Path
// =============================================================================

mod read_path {
    use super::*;

    #[tokio::test]
    async fn test_volatile_hit_touches_no_other_tier() {
        let f = Fixture::new();
        f.coordinator.create(ada()).await.unwrap();
        let cache_reads = f.cache.get_calls();
        let relational_reads = f.relational.student_reads();

        let found = f.coordinator.lookup("s1").await.unwrap();

        assert_eq!(found, ada());
        assert_eq!(f.cache.get_calls(), cache_reads);
        assert_eq!(f.relational.student_reads(), relational_reads);
    }

    #[tokio::test]
    async fn test_cache_hit_backfills_volatile_only() {
        let f = Fixture::new();
        f.coordinator.create(ada()).await.unwrap();
        f.store.clear();
        let relational_reads = f.relational.student_reads();

        let found = f.coordinator.lookup("s1").await.unwrap();

        assert_eq!(found.name, "Ada");
        assert_eq!(f.relational.student_reads(), relational_reads);
        assert!(f.store.get("s1").is_some());
    }

    #[tokio::test]
    async fn test_relational_hit_backfills_both_tiers() {
        let f = Fixture::new();
        f.coordinator.create(ada()).await.unwrap();
        f.store.clear();
        f.cache_tier().flush().await.unwrap();

        let found = f.coordinator.lookup("s1").await.unwrap();

        assert_eq!(found.grades.get("math"), Some(&91.0));
        assert!(f.cached("s1"));
        assert!(f.store.get("s1").is_some());
    }

    #[tokio::test]
    async fn test_failing_cache_read_is_not_backfilled() {
        let f = Fixture::new();
        f.coordinator.create(ada()).await.unwrap();
        f.store.clear();
        f.cache.fail_next(CacheOp::Get, 1);
        let writes = f.cache.set_calls();

        let found = f.coordinator.lookup("s1").await.unwrap();

        assert_eq!(found.id, "s1");
        assert_eq!(f.cache.set_calls(), writes);
        assert!(f.store.get("s1").is_some());
    }

    #[tokio::test]
    async fn test_unknown_student_is_not_found() {
        let f = Fixture::new();
        let err = f.coordinator.lookup("ghost").await.unwrap_err();

        assert!(err.is_not_found());
        assert!(f.store.is_empty());
        assert!(f.cache.is_empty());
    }

    #[tokio::test]
    async fn test_lookup_counts_accesses() {
        let f = Fixture::new();
        f.coordinator.create(ada()).await.unwrap();
        let before = f.relational.access_count_of("s1").unwrap();

        f.coordinator.lookup("s1").await.unwrap();
        f.coordinator.lookup("s1").await.unwrap();

        assert_eq!(f.relational.access_count_of("s1"), Some(before + 2));
    }
}

// =============================================================================
// Concurrent Reads and Writes
// =============================================================================

mod concurrency {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use rollcall::domain::ports::{CacheError, CacheFields, DistributedCacheGateway};
    use tokio::sync::Notify;

    /// Holds the first armed read after it has fetched its value, until released.
    struct PausingCache {
        inner: Arc<InMemoryCacheGateway>,
        armed: AtomicBool,
        read: Notify,
        resume: Notify,
    }

    impl PausingCache {
        fn new() -> Self {
            Self {
                inner: Arc::new(InMemoryCacheGateway::new()),
                armed: AtomicBool::new(false),
                read: Notify::new(),
                resume: Notify::new(),
            }
        }
    }

    #[async_trait]
    impl DistributedCacheGateway for PausingCache {
        async fn set(&self, key: &str, fields: CacheFields) -> Result<(), CacheError> {
            self.inner.set(key, fields).await
        }

        async fn get_all(&self, key: &str) -> Result<Option<CacheFields>, CacheError> {
            let fields = self.inner.get_all(key).await?;
            if self.armed.swap(false, Ordering::SeqCst) {
                self.read.notify_one();
                self.resume.notified().await;
            }
            Ok(fields)
        }

        async fn delete(&self, key: &str) -> Result<bool, CacheError> {
            self.inner.delete(key).await
        }

        async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
            self.inner.list_keys(prefix).await
        }

        async fn flush_all(&self) -> Result<(), CacheError> {
            self.inner.flush_all().await
        }
    }

    async fn paused_lookup() -> (
        Arc<TieredCoordinator>,
        Arc<VolatileStore<Student>>,
        Arc<PausingCache>,
        tokio::task::JoinHandle<rollcall::Result<Student>>,
    ) {
        let store = Arc::new(VolatileStore::new());
        let cache = Arc::new(PausingCache::new());
        let coordinator = Arc::new(TieredCoordinator::new(
            store.clone(),
            CacheTier::new(cache.clone()),
            RelationalTier::new(Arc::new(InMemoryRelationalGateway::new())),
        ));
        coordinator.create(ada()).await.unwrap();
        store.clear();

        cache.armed.store(true, Ordering::SeqCst);
        let reader = coordinator.clone();
        let lookup = tokio::spawn(async move { reader.lookup("s1").await });
        cache.read.notified().await;
        (coordinator, store, cache, lookup)
    }

    #[tokio::test]
    async fn test_lookup_does_not_backfill_value_modified_meanwhile() {
        let (coordinator, store, cache, lookup) = paused_lookup().await;

        coordinator
            .modify(Student::new("s1", "Ada Lovelace", "", ""))
            .await
            .unwrap();
        cache.resume.notify_one();

        // Served the value it read, but left no copy of it behind
        assert_eq!(lookup.await.unwrap().unwrap().name, "Ada");
        assert!(store.get("s1").is_none());
        assert_eq!(coordinator.lookup("s1").await.unwrap().name, "Ada Lovelace");
        assert_eq!(store.get("s1").unwrap().name, "Ada Lovelace");
    }

    #[tokio::test]
    async fn test_lookup_does_not_resurrect_removed_student() {
        let (coordinator, store, cache, lookup) = paused_lookup().await;

        coordinator.remove("s1").await.unwrap();
        cache.resume.notify_one();

        assert_eq!(lookup.await.unwrap().unwrap().name, "Ada");
        assert!(store.get("s1").is_none());
        assert!(coordinator.lookup("s1").await.unwrap_err().is_not_found());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_lookups_count_every_access() {
        let f = Arc::new(Fixture::new());
        f.coordinator.create(ada()).await.unwrap();
        let before = f.relational.access_count_of("s1").unwrap();

        let readers: Vec<_> = (0..100)
            .map(|_| {
                let f = f.clone();
                tokio::spawn(async move { f.coordinator.lookup("s1").await })
            })
            .collect();
        for reader in readers {
            reader.await.unwrap().unwrap();
        }

        assert_eq!(f.relational.access_count_of("s1"), Some(before + 100));
    }
}

// =============================================================================
// Write Path
// =============================================================================

mod write_path {
    use super::*;

    #[tokio::test]
    async fn test_create_writes_every_tier() {
        let f = Fixture::new();
        f.coordinator.create(ada()).await.unwrap();

        assert!(f.relational.has_student("s1"));
        assert!(f.cached("s1"));
        assert_eq!(f.store.get("s1"), Some(ada()));
        assert_eq!(f.events.events_of_type("StudentCreated").len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_create_leaves_original() {
        let f = Fixture::new();
        f.coordinator.create(ada()).await.unwrap();

        let err = f
            .coordinator
            .create(Student::new("s1", "Impostor", "m", "9Z"))
            .await
            .unwrap_err();

        assert!(!err.is_not_found());
        assert_eq!(f.coordinator.lookup("s1").await.unwrap().name, "Ada");
        assert_eq!(f.relational.student_count(), 1);
    }

    #[tokio::test]
    async fn test_cache_failure_rolls_back_create() {
        let f = Fixture::new();
        f.cache.fail_next(CacheOp::Set, 1);

        let err = f.coordinator.create(ada()).await.unwrap_err();

        assert_eq!(err.kind(), rollcall::error::ErrorKind::Backend);
        assert!(!f.relational.has_student("s1"));
        assert!(!f.cached("s1"));
        assert!(f.store.is_empty());
        assert_eq!(f.relational.rollbacks(), 1);
        assert_eq!(f.events.events_of_type("MutationRolledBack").len(), 1);
    }

    #[tokio::test]
    async fn test_commit_failure_heals_faster_tiers() {
        let f = Fixture::new();
        f.relational.fail_next(RelationalOp::Commit, 1);

        let err = f.coordinator.create(ada()).await.unwrap_err();

        assert!(matches!(err, Error::Backend { tier: TierKind::Relational, .. }));
        assert!(!f.relational.has_student("s1"));
        assert!(!f.cached("s1"));
        assert!(f.store.get("s1").is_none());
        assert_eq!(f.events.events_of_type("CacheCompensated").len(), 1);
    }

    #[tokio::test]
    async fn test_modify_merges_partial_update() {
        let f = Fixture::new();
        f.coordinator.create(ada()).await.unwrap();

        f.coordinator
            .modify(Student::new("s1", "", "", "2B").with_grade("math", 95.0))
            .await
            .unwrap();

        let stored = f.coordinator.lookup("s1").await.unwrap();
        assert_eq!(stored.name, "Ada");
        assert_eq!(stored.class, "2B");
        assert_eq!(stored.grades.get("math"), Some(&95.0));
        assert_eq!(stored.grades.get("art"), Some(&77.0));

        let cached = f.cache_tier().get("s1").await.unwrap();
        assert_eq!(cached, stored);
    }

    #[tokio::test]
    async fn test_modify_skips_missing_faster_copies() {
        let f = Fixture::new();
        f.coordinator.create(ada()).await.unwrap();
        f.store.clear();
        f.cache_tier().flush().await.unwrap();

        f.coordinator
            .modify(Student::new("s1", "Ada Lovelace", "", ""))
            .await
            .unwrap();

        assert!(f.store.get("s1").is_none());
        assert!(!f.cached("s1"));
        assert_eq!(f.coordinator.lookup("s1").await.unwrap().name, "Ada Lovelace");
    }

    #[tokio::test]
    async fn test_modify_unknown_student_is_not_found() {
        let f = Fixture::new();
        let err = f
            .coordinator
            .modify(Student::new("ghost", "x", "", ""))
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(f.relational.commits(), 0);
    }

    #[tokio::test]
    async fn test_remove_clears_every_tier() {
        let f = Fixture::new();
        f.coordinator.create(ada()).await.unwrap();

        f.coordinator.remove("s1").await.unwrap();

        assert!(!f.relational.has_student("s1"));
        assert!(!f.cached("s1"));
        assert!(f.store.is_empty());
        assert_eq!(f.relational.access_count_of("s1"), None);
        assert!(f.coordinator.lookup("s1").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_remove_tolerates_uncached_student() {
        let f = Fixture::new();
        f.coordinator.create(ada()).await.unwrap();
        f.cache_tier().flush().await.unwrap();

        f.coordinator.remove("s1").await.unwrap();
        assert!(!f.relational.has_student("s1"));
    }

    #[tokio::test]
    async fn test_remove_cache_failure_keeps_student() {
        let f = Fixture::new();
        f.coordinator.create(ada()).await.unwrap();
        f.cache.fail_next(CacheOp::Delete, 1);

        assert!(f.coordinator.remove("s1").await.is_err());

        assert!(f.relational.has_student("s1"));
        assert_eq!(f.coordinator.lookup("s1").await.unwrap(), ada());
    }

    #[tokio::test]
    async fn test_restore_cache_from_relational() {
        let f = Fixture::new();
        f.coordinator.create(ada()).await.unwrap();
        f.cache_tier().flush().await.unwrap();

        f.coordinator.restore_cache("s1").await.unwrap();
        assert!(f.cached("s1"));

        f.coordinator.remove("s1").await.unwrap();
        f.cache_tier().put(&ada()).await.unwrap();
        f.coordinator.restore_cache("s1").await.unwrap();
        assert!(!f.cached("s1"));
    }
}

// =============================================================================
// Maintenance
// =============================================================================

mod maintenance {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_reads_slide_the_deadline() {
        let store = VolatileStore::with_config(VolatileConfig {
            renewal_window: Duration::from_secs(30),
            sweep_sample_size: 10,
        });
        let f = Fixture::with_store(store, CoordinatorConfig::default());
        f.coordinator.create(ada().with_expiration(10)).await.unwrap();

        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(f.store.get("s1").is_some());

        // Renewed to 30s from the read, well past the original 10s
        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(f.store.get("s1").is_some());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(f.store.get("s1").is_none());
        assert!(f.relational.has_student("s1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_only_expired() {
        let f = Fixture::new();
        f.coordinator.create(ada().with_expiration(5)).await.unwrap();
        f.coordinator
            .create(Student::new("s2", "Bo", "m", "1B"))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;
        let removed = f.coordinator.sweep_expired().await;

        assert_eq!(removed, 1);
        assert!(f.store.get("s2").is_some());
        assert_eq!(f.store.count(), 1);
    }

    #[tokio::test]
    async fn test_rewarm_keeps_hottest_only() {
        let f = Fixture::with_store(
            VolatileStore::new(),
            CoordinatorConfig { rewarm_top_n: 2 },
        );
        for (id, reads) in [("s1", 1), ("s2", 5), ("s3", 3)] {
            f.coordinator
                .create(Student::new(id, id.to_uppercase(), "f", "1A"))
                .await
                .unwrap();
            for _ in 0..reads {
                f.coordinator.lookup(id).await.unwrap();
            }
        }

        let loaded = f.coordinator.rewarm_cache(2).await.unwrap();

        let ids: Vec<&str> = loaded.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["s2", "s3"]);
        assert!(!f.cached("s1"));
        assert!(f.cached("s2"));
        assert!(f.cached("s3"));
        assert_eq!(f.cache.len(), 2);
    }

    #[tokio::test]
    async fn test_warm_up_falls_back_to_relational() {
        let f = Fixture::new();
        f.coordinator.create(ada()).await.unwrap();
        f.store.clear();
        f.cache.fail_next(CacheOp::List, 1);

        let loaded = f.coordinator.warm_up().await.unwrap();

        assert_eq!(loaded, 1);
        assert!(f.store.get("s1").is_some());
    }

    #[tokio::test]
    async fn test_snapshot_restores_into_fresh_replica() {
        let source = Fixture::new();
        source.coordinator.create(ada()).await.unwrap();
        source
            .coordinator
            .create(Student::new("s2", "Bo", "m", "1B"))
            .await
            .unwrap();
        source.coordinator.lookup("s2").await.unwrap();
        let snapshot = source.coordinator.snapshot().await.unwrap();

        let target = Fixture::new();
        target
            .coordinator
            .create(Student::new("stale", "Old", "m", "0"))
            .await
            .unwrap();
        target.coordinator.restore(snapshot).await.unwrap();

        assert_eq!(target.relational.student_count(), 2);
        assert!(!target.relational.has_student("stale"));
        assert!(target.store.is_empty());
        assert!(target.cached("s2"));
        assert_eq!(
            target.relational.access_count_of("s2"),
            source.relational.access_count_of("s2")
        );
        assert_eq!(target.coordinator.lookup("s1").await.unwrap(), ada());
    }
}
