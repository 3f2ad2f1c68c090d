//! Replicated Command Log
//!
//! Every mutation, and both maintenance actions, are ordered through a
//! consensus provider before any tier is touched:
//!
//! ```text
//! ┌────────────┐  Command   ┌───────────────────┐  apply(index)  ┌──────────────────┐
//! │ Submitter  │ ─────────► │ ConsensusProvider │ ─────────────► │ CommandStateMach │
//! │ (any node) │ ◄───────── │  (total order)    │   on every     │  → Coordinator   │
//! └────────────┘  outcome   └───────────────────┘   replica      └──────────────────┘
//! ```
//!
//! Reads do not pass through here.

mod command;
mod local;
mod log;

use std::time::Duration;

pub use command::{ApplyOutcome, Command, Operation};
pub use local::{LocalConsensus, LocalReplica};
pub use log::{CommandStateMachine, ReplicatedCommandLog};

/// Default bound on waiting for a command to be ordered
pub const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_millis(500);

/// Default number of retained entries that triggers compaction
pub const DEFAULT_SNAPSHOT_THRESHOLD: usize = 1024;

/// Configuration for the command log
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// How long `submit` waits for the command to be ordered
    pub submit_timeout: Duration,

    /// Retained entries before the log is compacted behind a snapshot
    pub snapshot_threshold: usize,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            submit_timeout: DEFAULT_SUBMIT_TIMEOUT,
            snapshot_threshold: DEFAULT_SNAPSHOT_THRESHOLD,
        }
    }
}
