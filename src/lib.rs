//! Rollcall - Tiered Student-Record Storage
//!
//! Student records live in three tiers of decreasing speed and increasing
//! durability. Reads go through the tiers fastest first and backfill the
//! tiers that missed; writes go through all three inside one relational
//! transaction. Every mutation and maintenance task is ordered by a
//! replicated command log, so all replicas apply the same sequence.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  Scheduler ──┐                                                    │
//! │  Client ─────┴──► ReplicatedCommandLog ──► Consensus (ordering)   │
//! │                                                 │                 │
//! │                       every replica ◄───────────┘                 │
//! │                            │                                      │
//! │                   TieredCoordinator                               │
//! │        ┌───────────────┬───┴───────────┬────────────────┐         │
//! │        ▼               ▼               ▼                          │
//! │   VolatileStore    CacheTier     RelationalTier                   │
//! │   (in-process)   (distributed)   (source of truth)                │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`adapters`] - Tier adapters, in-memory gateways, event publishers
//! - [`config`] - YAML node configuration
//! - [`coordinator`] - Read-through / write-through protocol
//! - [`domain`] - Entities, ports and domain events
//! - [`error`] - Error types
//! - [`metrics`] - Prometheus counters
//! - [`node`] - Replica assembly over the in-process log
//! - [`replication`] - Command schema, command log, local consensus
//! - [`scheduler`] - Periodic rewarm and sweep
//! - [`volatile`] - Process-local TTL store

pub mod adapters;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod node;
pub mod replication;
pub mod scheduler;
pub mod volatile;

// Re-export commonly used types
pub use config::NodeConfig;
pub use coordinator::{CoordinatorConfig, TieredCoordinator};
pub use domain::model::Student;
pub use error::{Error, Result};
pub use node::{LocalCluster, ReplicaNode};
pub use replication::{Command, LocalConsensus, Operation, ReplicatedCommandLog};
pub use scheduler::Scheduler;
pub use volatile::VolatileStore;
