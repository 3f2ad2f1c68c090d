//! In-Process Consensus Provider
//!
//! A replicated log shared by N state machines in one process. It gives the
//! ordering contract the command log relies on without running an election:
//! every replica applies every entry exactly once, in index order, and the
//! replica that submitted an entry receives its own apply response.
//!
//! ```text
//! submit ──► [order: append under lock] ──► spawn replicate
//!                   (bounded by timeout)         │
//!                                                ▼
//!                       replica 1 ◄── catch_up ──┼── catch_up ──► replica N
//!                                                │
//!                                     compact behind snapshot
//! ```
//!
//! The timeout covers ordering only. An entry that was appended is applied
//! everywhere even if its submitter stopped waiting.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::domain::ports::{ConsensusError, ConsensusProvider, StateMachine};
use crate::error::Result;

#[derive(Clone)]
struct LogEntry {
    index: u64,
    origin: u64,
    payload: Arc<Vec<u8>>,
}

#[derive(Clone)]
struct LogSnapshot {
    index: u64,
    data: Arc<Vec<u8>>,
}

struct Replica {
    id: u64,
    machine: Arc<dyn StateMachine>,
    applied: AtomicU64,
    /// Serializes applies on this replica
    apply_lock: tokio::sync::Mutex<()>,
}

struct LogState {
    entries: VecDeque<LogEntry>,
    next_index: u64,
    snapshot: Option<LogSnapshot>,
    replicas: Vec<Arc<Replica>>,
}

impl LogState {
    fn entry(&self, index: u64) -> Option<LogEntry> {
        let first = self.entries.front()?.index;
        if index < first {
            return None;
        }
        self.entries.get((index - first) as usize).cloned()
    }
}

struct Cluster {
    state: tokio::sync::Mutex<LogState>,
    waiters: Mutex<HashMap<u64, oneshot::Sender<Vec<u8>>>>,
    quorum_lost: AtomicBool,
    ordering_delay: Mutex<Duration>,
    next_replica: AtomicU64,
    snapshot_threshold: usize,
}

/// Shared in-process log. Cloning yields another handle to the same log.
#[derive(Clone)]
pub struct LocalConsensus {
    cluster: Arc<Cluster>,
}

impl LocalConsensus {
    /// Create an empty log that compacts after `snapshot_threshold` entries.
    pub fn new(snapshot_threshold: usize) -> Self {
        Self {
            cluster: Arc::new(Cluster {
                state: tokio::sync::Mutex::new(LogState {
                    entries: VecDeque::new(),
                    next_index: 1,
                    snapshot: None,
                    replicas: Vec::new(),
                }),
                waiters: Mutex::new(HashMap::new()),
                quorum_lost: AtomicBool::new(false),
                ordering_delay: Mutex::new(Duration::ZERO),
                next_replica: AtomicU64::new(1),
                snapshot_threshold: snapshot_threshold.max(1),
            }),
        }
    }

    /// Register a state machine as a new replica.
    ///
    /// A replica joining after compaction restores the latest snapshot and
    /// then replays the retained tail of the log.
    pub async fn join(&self, machine: Arc<dyn StateMachine>) -> Result<LocalReplica> {
        let cluster = &self.cluster;
        let replica = Arc::new(Replica {
            id: cluster.next_replica.fetch_add(1, Ordering::Relaxed),
            machine,
            applied: AtomicU64::new(0),
            apply_lock: tokio::sync::Mutex::new(()),
        });

        {
            // Registered under the log lock so compaction never truncates past it
            let guard = replica.apply_lock.lock().await;
            let snapshot = {
                let mut state = cluster.state.lock().await;
                let snapshot = state.snapshot.clone();
                if let Some(s) = &snapshot {
                    replica.applied.store(s.index, Ordering::Release);
                }
                state.replicas.push(Arc::clone(&replica));
                snapshot
            };

            if let Some(snapshot) = snapshot {
                if let Err(e) = replica.machine.restore(&snapshot.data).await {
                    cluster
                        .state
                        .lock()
                        .await
                        .replicas
                        .retain(|r| r.id != replica.id);
                    return Err(e);
                }
                info!(replica = replica.id, index = snapshot.index, "Replica restored from snapshot");
            }
            drop(guard);
        }

        cluster.catch_up(&replica).await;
        info!(replica = replica.id, "Replica joined");
        Ok(LocalReplica {
            cluster: Arc::clone(cluster),
            id: replica.id,
        })
    }

    /// Simulate losing (or regaining) a quorum.
    pub fn set_quorum_lost(&self, lost: bool) {
        self.cluster.quorum_lost.store(lost, Ordering::SeqCst);
    }

    /// Delay every ordering step by `delay`.
    pub fn set_ordering_delay(&self, delay: Duration) {
        *self.cluster.ordering_delay.lock() = delay;
    }

    /// Index of the last appended entry, 0 when empty.
    pub async fn last_index(&self) -> u64 {
        self.cluster.state.lock().await.next_index - 1
    }

    /// Number of entries retained after compaction.
    pub async fn retained_entries(&self) -> usize {
        self.cluster.state.lock().await.entries.len()
    }

    /// Index covered by the latest snapshot.
    pub async fn snapshot_index(&self) -> Option<u64> {
        self.cluster
            .state
            .lock()
            .await
            .snapshot
            .as_ref()
            .map(|s| s.index)
    }

    /// Wait until every replica has applied every appended entry.
    pub async fn settle(&self) {
        self.cluster.replicate().await;
    }
}

impl Cluster {
    async fn append(
        &self,
        origin: u64,
        payload: Vec<u8>,
    ) -> std::result::Result<oneshot::Receiver<Vec<u8>>, ConsensusError> {
        let delay = *self.ordering_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().await;
        if !state.replicas.iter().any(|r| r.id == origin) {
            return Err(ConsensusError::Closed);
        }
        let index = state.next_index;
        state.next_index += 1;

        let (tx, rx) = oneshot::channel();
        self.waiters.lock().insert(index, tx);
        state.entries.push_back(LogEntry {
            index,
            origin,
            payload: Arc::new(payload),
        });
        debug!(index, origin, "Appended log entry");
        Ok(rx)
    }

    async fn replicate(&self) {
        let replicas = self.state.lock().await.replicas.clone();
        join_all(replicas.iter().map(|replica| self.catch_up(replica))).await;
        self.maybe_compact().await;
    }

    /// Apply every entry `replica` has not seen yet, in order.
    async fn catch_up(&self, replica: &Replica) {
        let _guard = replica.apply_lock.lock().await;
        loop {
            let next = replica.applied.load(Ordering::Acquire) + 1;
            let Some(entry) = self.state.lock().await.entry(next) else {
                break;
            };

            let response = replica.machine.apply(entry.index, &entry.payload).await;
            replica.applied.store(entry.index, Ordering::Release);

            if entry.origin == replica.id {
                if let Some(waiter) = self.waiters.lock().remove(&entry.index) {
                    // The submitter may have stopped waiting
                    let _ = waiter.send(response);
                }
            }
        }
    }

    async fn maybe_compact(&self) {
        let source = {
            let state = self.state.lock().await;
            if state.entries.len() < self.snapshot_threshold {
                return;
            }
            match state.replicas.first() {
                Some(replica) => Arc::clone(replica),
                None => return,
            }
        };

        let (index, data) = {
            let _guard = source.apply_lock.lock().await;
            let index = source.applied.load(Ordering::Acquire);
            match source.machine.snapshot().await {
                Ok(data) => (index, data),
                Err(e) => {
                    warn!(error = %e, "Snapshot failed, log not compacted");
                    return;
                }
            }
        };

        let mut state = self.state.lock().await;
        let floor = state
            .replicas
            .iter()
            .map(|r| r.applied.load(Ordering::Acquire))
            .min()
            .unwrap_or(index)
            .min(index);

        if state.snapshot.as_ref().map_or(true, |s| s.index < index) {
            state.snapshot = Some(LogSnapshot {
                index,
                data: Arc::new(data),
            });
        }
        while state.entries.front().is_some_and(|e| e.index <= floor) {
            state.entries.pop_front();
        }
        info!(
            snapshot_index = index,
            retained = state.entries.len(),
            "Compacted replicated log"
        );
    }
}

/// One replica's handle on the shared log.
#[derive(Clone)]
pub struct LocalReplica {
    cluster: Arc<Cluster>,
    id: u64,
}

impl LocalReplica {
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[async_trait]
impl ConsensusProvider for LocalReplica {
    async fn submit(
        &self,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> std::result::Result<Vec<u8>, ConsensusError> {
        if self.cluster.quorum_lost.load(Ordering::SeqCst) {
            return Err(ConsensusError::QuorumLost);
        }

        let receiver = tokio::time::timeout(timeout, self.cluster.append(self.id, payload))
            .await
            .map_err(|_| ConsensusError::Timeout(timeout))??;

        let cluster = Arc::clone(&self.cluster);
        tokio::spawn(async move { cluster.replicate().await });

        receiver.await.map_err(|_| ConsensusError::Closed)
    }
}
