//! Domain Ports (DDD Port/Adapter Pattern)
//!
//! This module defines the abstractions the tiered coordinator depends on.
//! External collaborators (the relational store, the distributed cache and
//! the consensus provider) are reached only through these traits, and each
//! has its own raw error type. Adapters translate those raw errors into the
//! crate [`Error`](crate::error::Error) taxonomy.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Domain Layer                            │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Ports (Traits)                    │    │
//! │  │ EntityTier │ RelationalGateway │ CacheGateway │ ... │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Infrastructure Layer                       │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                  Adapters (Impls)                    │    │
//! │  │ VolatileTier │ CacheTier │ RelationalTier │ InMemory │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use super::events::DomainEvent;
use super::model::{AccessCount, GradeRow, Student, StudentRow, TierKind};
use crate::error::Result;

// =============================================================================
// Entity Tier Port
// =============================================================================

/// Generic entity operations over a non-transactional tier.
///
/// Implementations must report absence as `Error::NotFound` and every other
/// failure as a backend error, so callers can tell a miss from a fault.
#[async_trait]
pub trait EntityTier: Send + Sync {
    /// Which tier this is.
    fn kind(&self) -> TierKind;

    /// Fetch a student.
    async fn get(&self, id: &str) -> Result<Student>;

    /// Unconditionally store a student.
    async fn put(&self, student: &Student) -> Result<()>;

    /// Merge a partial update into the stored copy and return the result.
    ///
    /// Fails with `NotFound` when there is nothing to merge into.
    async fn merge(&self, update: &Student) -> Result<Student>;

    /// Delete a student. Fails with `NotFound` when absent.
    async fn delete(&self, id: &str) -> Result<()>;
}

// =============================================================================
// Relational Gateway Port
// =============================================================================

/// Raw errors reported by a relational backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RelationalError {
    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("connection failure: {0}")]
    Connection(String),

    #[error("transaction failure: {0}")]
    Transaction(String),
}

/// Typed statements accepted by the relational system of record.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// `insert into student ...`; fails on duplicate id
    InsertStudent(StudentRow),
    /// `insert into grade ...`
    InsertGrade(GradeRow),
    /// Update scalar attributes; empty strings and a zero TTL keep the stored value
    UpdateStudent(StudentRow),
    /// Update the score if the subject exists, insert it otherwise
    UpsertGrade(GradeRow),
    /// `delete from student where id = ?`
    DeleteStudent { id: String },
    /// `delete from grade where student_id = ?`
    DeleteGrades { student_id: String },
    /// Create a counter with count 1
    InsertAccessCount { student_id: String },
    /// `insert ... on duplicate key update count = count + 1`
    IncrementAccessCount { student_id: String },
    /// Overwrite a counter
    UpdateAccessCount(AccessCount),
    /// Drop a counter
    DeleteAccessCount { student_id: String },
    /// Remove every row from every table
    Truncate,
}

/// An open relational transaction.
///
/// Dropping a transaction without calling [`commit`](RelationalTx::commit)
/// must roll it back. Callers roll back explicitly on known failures and
/// rely on drop for every other exit path.
#[async_trait]
pub trait RelationalTx: Send {
    /// Execute a statement inside the transaction.
    async fn exec(&mut self, statement: Statement) -> std::result::Result<(), RelationalError>;

    /// Make every statement visible atomically.
    async fn commit(self: Box<Self>) -> std::result::Result<(), RelationalError>;

    /// Discard every statement.
    async fn rollback(self: Box<Self>) -> std::result::Result<(), RelationalError>;
}

/// Port for the relational system of record.
#[async_trait]
pub trait RelationalGateway: Send + Sync {
    /// Open a transaction.
    async fn begin(&self) -> std::result::Result<Box<dyn RelationalTx>, RelationalError>;

    /// Execute a single auto-committed statement.
    async fn execute(&self, statement: Statement) -> std::result::Result<(), RelationalError>;

    /// Fetch the `student` row for `id`.
    async fn fetch_student(
        &self,
        id: &str,
    ) -> std::result::Result<Option<StudentRow>, RelationalError>;

    /// Fetch every `grade` row for `student_id`.
    async fn fetch_grades(
        &self,
        student_id: &str,
    ) -> std::result::Result<Vec<GradeRow>, RelationalError>;

    /// Fetch the access counter for `student_id`.
    async fn fetch_access_count(
        &self,
        student_id: &str,
    ) -> std::result::Result<Option<AccessCount>, RelationalError>;

    /// The `limit` highest counters, highest first.
    async fn top_access_counts(
        &self,
        limit: usize,
    ) -> std::result::Result<Vec<AccessCount>, RelationalError>;

    /// Every counter.
    async fn list_access_counts(&self) -> std::result::Result<Vec<AccessCount>, RelationalError>;

    /// Every student id.
    async fn list_student_ids(&self) -> std::result::Result<Vec<String>, RelationalError>;
}

// =============================================================================
// Distributed Cache Gateway Port
// =============================================================================

/// Field map stored under one cache key.
pub type CacheFields = HashMap<String, String>;

/// Raw errors reported by a distributed cache client.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    #[error("cache request timed out after {0:?}")]
    Timeout(Duration),

    #[error("cache protocol error: {0}")]
    Protocol(String),
}

/// Port for the shared distributed cache.
#[async_trait]
pub trait DistributedCacheGateway: Send + Sync {
    /// Store (merge) fields under `key`.
    async fn set(&self, key: &str, fields: CacheFields) -> std::result::Result<(), CacheError>;

    /// Fetch every field under `key`; `None` when the key is absent.
    async fn get_all(&self, key: &str) -> std::result::Result<Option<CacheFields>, CacheError>;

    /// Delete `key`; returns whether it existed.
    async fn delete(&self, key: &str) -> std::result::Result<bool, CacheError>;

    /// List keys starting with `prefix`.
    async fn list_keys(&self, prefix: &str) -> std::result::Result<Vec<String>, CacheError>;

    /// Remove every key.
    async fn flush_all(&self) -> std::result::Result<(), CacheError>;
}

// =============================================================================
// Consensus Port
// =============================================================================

/// Errors a consensus provider reports locally to the submitter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConsensusError {
    #[error("this replica is not the leader")]
    NotLeader,

    #[error("command was not ordered within {0:?}")]
    Timeout(Duration),

    #[error("quorum lost")]
    QuorumLost,

    #[error("consensus provider shut down")]
    Closed,
}

/// Port for an off-the-shelf replicated log.
#[async_trait]
pub trait ConsensusProvider: Send + Sync {
    /// Append `payload`, replicate it, and wait at most `timeout` for it to be
    /// durably ordered. Returns the originating replica's apply response.
    async fn submit(
        &self,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> std::result::Result<Vec<u8>, ConsensusError>;
}

/// Callback surface a consensus provider drives on every replica.
#[async_trait]
pub trait StateMachine: Send + Sync {
    /// Apply the committed entry at `index`. Called exactly once per entry,
    /// in log order.
    async fn apply(&self, index: u64, payload: &[u8]) -> Vec<u8>;

    /// Serialize the current state for log compaction.
    async fn snapshot(&self) -> Result<Vec<u8>>;

    /// Replace the current state with a snapshot.
    async fn restore(&self, snapshot: &[u8]) -> Result<()>;
}

// =============================================================================
// Command Applier Port
// =============================================================================

/// The minimal apply-surface the coordinator exposes to the command log.
///
/// This is the only path by which replicated commands reach the tiers.
#[async_trait]
pub trait CommandApplier: Send + Sync {
    async fn apply_create(&self, student: Student) -> Result<()>;

    async fn apply_modify(&self, update: Student) -> Result<()>;

    async fn apply_remove(&self, id: &str) -> Result<()>;

    async fn apply_rewarm(&self) -> Result<()>;

    async fn apply_sweep(&self) -> Result<()>;

    async fn snapshot_state(&self) -> Result<Vec<u8>>;

    async fn restore_state(&self, snapshot: &[u8]) -> Result<()>;
}

// =============================================================================
// Event Publisher Port
// =============================================================================

/// Port for publishing domain events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a domain event.
    async fn publish(&self, event: DomainEvent) -> Result<()>;
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_error_display() {
        assert_eq!(
            RelationalError::Constraint("duplicate key s1".into()).to_string(),
            "constraint violation: duplicate key s1"
        );
        assert_eq!(
            CacheError::Timeout(Duration::from_millis(50)).to_string(),
            "cache request timed out after 50ms"
        );
        assert_eq!(
            ConsensusError::Timeout(Duration::from_millis(500)).to_string(),
            "command was not ordered within 500ms"
        );
    }
}
