//! Replica Assembly
//!
//! Wires the tiers, the coordinator and the command log into replicas that
//! share one in-process [`LocalConsensus`]. Each replica owns its own
//! backends, so convergence between them comes only from the log.
//!
//! ```text
//!            submit                       apply (every replica)
//! ReplicaNode ────► ReplicatedCommandLog ──► LocalConsensus ──► CommandStateMachine
//!      │                                                              │
//!      └──── lookup (local, not logged) ──► TieredCoordinator ◄───────┘
//! ```

use std::sync::Arc;

use tracing::{field, info, info_span, Instrument, Span};

use crate::adapters::{
    CacheTier, CompositeEventPublisher, InMemoryCacheGateway, InMemoryEventCollector,
    InMemoryRelationalGateway, LoggingEventPublisher, RelationalTier,
};
use crate::config::NodeConfig;
use crate::coordinator::TieredCoordinator;
use crate::domain::model::Student;
use crate::error::Result;
use crate::replication::{CommandStateMachine, LocalConsensus, ReplicatedCommandLog};
use crate::scheduler::Scheduler;
use crate::volatile::VolatileStore;

/// One replica: its tiers, its coordinator, and its handle on the log.
///
/// Everything the replica does, including commands applied on behalf of
/// other replicas, runs inside a `replica` span carrying the node id.
#[derive(Clone)]
pub struct ReplicaNode {
    id: u64,
    node_id: String,
    span: Span,
    coordinator: Arc<TieredCoordinator>,
    log: ReplicatedCommandLog,
    cache: Arc<InMemoryCacheGateway>,
    relational: Arc<InMemoryRelationalGateway>,
    events: Arc<InMemoryEventCollector>,
}

impl ReplicaNode {
    /// Build a replica over fresh in-memory backends and join it to `consensus`.
    pub async fn join(consensus: &LocalConsensus, config: &NodeConfig) -> Result<Self> {
        let cache = Arc::new(InMemoryCacheGateway::new());
        let relational = Arc::new(InMemoryRelationalGateway::new());
        let events = Arc::new(InMemoryEventCollector::new());

        let publisher = CompositeEventPublisher::new()
            .with_shared(Arc::new(LoggingEventPublisher::new()))
            .with_shared(events.clone());

        let coordinator = Arc::new(
            TieredCoordinator::with_config(
                Arc::new(VolatileStore::with_config(config.volatile())),
                CacheTier::new(cache.clone()),
                RelationalTier::new(relational.clone()),
                config.coordinator(),
            )
            .with_event_publisher(Arc::new(publisher)),
        );

        let span = info_span!("replica", node = %config.node_id, replica = field::Empty);
        let machine =
            Arc::new(CommandStateMachine::new(coordinator.clone()).with_span(span.clone()));
        let replica = consensus.join(machine).instrument(span.clone()).await?;
        let id = replica.id();
        span.record("replica", id);
        let log = ReplicatedCommandLog::with_config(Arc::new(replica), config.replication());

        let warmed = coordinator.warm_up().instrument(span.clone()).await?;
        span.in_scope(|| info!(warmed, "Replica ready"));

        Ok(Self {
            id,
            node_id: config.node_id.clone(),
            span,
            coordinator,
            log,
            cache,
            relational,
            events,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Identifier of the process hosting this replica.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Read through this replica's tiers.
    ///
    /// Reads are not ordered by the log, so a lagging replica may return a
    /// value older than a write already acknowledged elsewhere.
    pub async fn lookup(&self, id: &str) -> Result<Student> {
        self.coordinator.lookup(id).instrument(self.span.clone()).await
    }

    pub async fn create(&self, student: Student) -> Result<()> {
        self.log.create(student).instrument(self.span.clone()).await
    }

    pub async fn modify(&self, update: Student) -> Result<()> {
        self.log.modify(update).instrument(self.span.clone()).await
    }

    pub async fn remove(&self, id: &str) -> Result<()> {
        self.log.remove(id).instrument(self.span.clone()).await
    }

    /// Rewarm the cache on every replica.
    pub async fn reload_cache(&self) -> Result<()> {
        self.log.reload_cache().instrument(self.span.clone()).await
    }

    /// Sweep the volatile tier on every replica.
    pub async fn periodic_delete(&self) -> Result<()> {
        self.log.periodic_delete().instrument(self.span.clone()).await
    }

    /// Scheduler that submits maintenance through this replica's log handle.
    pub fn scheduler(&self, config: &NodeConfig) -> Scheduler {
        Scheduler::new(self.log.clone(), config.scheduler()).with_span(self.span.clone())
    }

    pub fn coordinator(&self) -> &Arc<TieredCoordinator> {
        &self.coordinator
    }

    pub fn log(&self) -> &ReplicatedCommandLog {
        &self.log
    }

    pub fn cache_gateway(&self) -> &Arc<InMemoryCacheGateway> {
        &self.cache
    }

    pub fn relational_gateway(&self) -> &Arc<InMemoryRelationalGateway> {
        &self.relational
    }

    pub fn events(&self) -> &Arc<InMemoryEventCollector> {
        &self.events
    }
}

/// A group of replicas over one shared log.
pub struct LocalCluster {
    config: NodeConfig,
    consensus: LocalConsensus,
    nodes: Vec<ReplicaNode>,
}

impl LocalCluster {
    /// Start `config.replicas` replicas, generating a node id if none was set.
    pub async fn start(mut config: NodeConfig) -> Result<Self> {
        config.validate()?;
        config.ensure_node_id();
        let consensus = LocalConsensus::new(config.snapshot_threshold);
        let mut cluster = Self {
            config,
            consensus,
            nodes: Vec::new(),
        };
        for _ in 0..cluster.config.replicas {
            cluster.add_replica().await?;
        }
        info!(
            node = %cluster.config.node_id,
            replicas = cluster.nodes.len(),
            "Cluster started"
        );
        Ok(cluster)
    }

    /// Join one more replica. It catches up from the log before returning.
    pub async fn add_replica(&mut self) -> Result<ReplicaNode> {
        let node = ReplicaNode::join(&self.consensus, &self.config).await?;
        self.nodes.push(node.clone());
        Ok(node)
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn consensus(&self) -> &LocalConsensus {
        &self.consensus
    }

    pub fn nodes(&self) -> &[ReplicaNode] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> Option<&ReplicaNode> {
        self.nodes.get(index)
    }

    /// Wait until every replica has applied every ordered command.
    pub async fn settle(&self) {
        self.consensus.settle().await;
    }
}
