//! Domain Events
//!
//! Immutable records of significant tier-protocol occurrences: committed
//! mutations, rollbacks, compensations and background maintenance.
//!
//! # Example
//!
//! ```ignore
//! let event = DomainEvent::student_created("s1");
//! event_publisher.publish(event).await?;
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Domain event representing a significant occurrence in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    // =========================================================================
    // Mutation Events
    // =========================================================================
    /// A student was committed to all tiers.
    StudentCreated {
        student_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A partial update was committed.
    StudentUpdated {
        student_id: String,
        subjects: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// A student was removed from all tiers.
    StudentRemoved {
        student_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A mutation was abandoned and its relational transaction rolled back.
    MutationRolledBack {
        student_id: String,
        operation: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// The cache copy was rebuilt from the system of record after a failure.
    CacheCompensated {
        student_id: String,
        succeeded: bool,
        timestamp: DateTime<Utc>,
    },

    // =========================================================================
    // Maintenance Events
    // =========================================================================
    /// The distributed cache was replaced with the hottest students.
    CacheRewarmed {
        student_ids: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// The volatile tier sweep removed expired keys.
    ExpiredKeysSwept {
        removed: usize,
        timestamp: DateTime<Utc>,
    },

    /// Replica state was replaced from a snapshot.
    SnapshotRestored {
        students: usize,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Get the event type as a string.
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::StudentCreated { .. } => "StudentCreated",
            DomainEvent::StudentUpdated { .. } => "StudentUpdated",
            DomainEvent::StudentRemoved { .. } => "StudentRemoved",
            DomainEvent::MutationRolledBack { .. } => "MutationRolledBack",
            DomainEvent::CacheCompensated { .. } => "CacheCompensated",
            DomainEvent::CacheRewarmed { .. } => "CacheRewarmed",
            DomainEvent::ExpiredKeysSwept { .. } => "ExpiredKeysSwept",
            DomainEvent::SnapshotRestored { .. } => "SnapshotRestored",
        }
    }

    /// Get the student this event concerns, if any.
    pub fn student_id(&self) -> Option<&str> {
        match self {
            DomainEvent::StudentCreated { student_id, .. }
            | DomainEvent::StudentUpdated { student_id, .. }
            | DomainEvent::StudentRemoved { student_id, .. }
            | DomainEvent::MutationRolledBack { student_id, .. }
            | DomainEvent::CacheCompensated { student_id, .. } => Some(student_id),
            _ => None,
        }
    }

    pub fn student_created(student_id: impl Into<String>) -> Self {
        DomainEvent::StudentCreated {
            student_id: student_id.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn student_updated(student_id: impl Into<String>, subjects: Vec<String>) -> Self {
        DomainEvent::StudentUpdated {
            student_id: student_id.into(),
            subjects,
            timestamp: Utc::now(),
        }
    }

    pub fn student_removed(student_id: impl Into<String>) -> Self {
        DomainEvent::StudentRemoved {
            student_id: student_id.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn rolled_back(
        student_id: impl Into<String>,
        operation: impl Into<String>,
        reason: impl std::fmt::Display,
    ) -> Self {
        DomainEvent::MutationRolledBack {
            student_id: student_id.into(),
            operation: operation.into(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn cache_compensated(student_id: impl Into<String>, succeeded: bool) -> Self {
        DomainEvent::CacheCompensated {
            student_id: student_id.into(),
            succeeded,
            timestamp: Utc::now(),
        }
    }

    pub fn cache_rewarmed(student_ids: Vec<String>) -> Self {
        DomainEvent::CacheRewarmed {
            student_ids,
            timestamp: Utc::now(),
        }
    }

    pub fn expired_swept(removed: usize) -> Self {
        DomainEvent::ExpiredKeysSwept {
            removed,
            timestamp: Utc::now(),
        }
    }

    pub fn snapshot_restored(students: usize) -> Self {
        DomainEvent::SnapshotRestored {
            students,
            timestamp: Utc::now(),
        }
    }
}
