//! Command Schema
//!
//! The unit carried by the replicated log, and the apply outcome returned to
//! the submitting replica.
//!
//! Wire form: `{"operation": "...", "entity": {...}, "id": "..."}`. Which of
//! `entity` and `id` is present depends only on the operation.

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::domain::model::Student;
use crate::error::{Error, ErrorKind, Result};

/// Replicated operation tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    Add,
    Update,
    Delete,
    ReloadCacheData,
    PeriodicDelete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Add => "add",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::ReloadCacheData => "reloadCacheData",
            Operation::PeriodicDelete => "periodicDelete",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable replicated command.
///
/// Only the constructors build commands, so `entity` is set exactly for
/// `add`/`update` and `id` exactly for `delete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    operation: Operation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    entity: Option<Student>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
}

impl Command {
    pub fn add(student: Student) -> Self {
        Self::with_entity(Operation::Add, student)
    }

    pub fn update(student: Student) -> Self {
        Self::with_entity(Operation::Update, student)
    }

    pub fn delete(id: impl Into<String>) -> Self {
        Self {
            operation: Operation::Delete,
            entity: None,
            id: Some(id.into()),
        }
    }

    pub fn reload_cache() -> Self {
        Self::bare(Operation::ReloadCacheData)
    }

    pub fn periodic_delete() -> Self {
        Self::bare(Operation::PeriodicDelete)
    }

    fn with_entity(operation: Operation, student: Student) -> Self {
        Self {
            operation,
            entity: Some(student),
            id: None,
        }
    }

    fn bare(operation: Operation) -> Self {
        Self {
            operation,
            entity: None,
            id: None,
        }
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn entity(&self) -> Option<&Student> {
        self.entity.as_ref()
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Consume the command, yielding its payloads.
    pub fn into_parts(self) -> (Operation, Option<Student>, Option<String>) {
        (self.operation, self.entity, self.id)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode and check that the payloads match the operation.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let command: Command = serde_json::from_slice(bytes)
            .map_err(|e| Error::Replication(format!("undecodable command: {}", e)))?;

        let well_formed = match command.operation {
            Operation::Add | Operation::Update => command.entity.is_some() && command.id.is_none(),
            Operation::Delete => command.entity.is_none() && command.id.is_some(),
            Operation::ReloadCacheData | Operation::PeriodicDelete => {
                command.entity.is_none() && command.id.is_none()
            }
        };
        if !well_formed {
            return Err(Error::Replication(format!(
                "malformed {} command",
                command.operation
            )));
        }
        Ok(command)
    }
}

/// Result of applying a command, as returned to the submitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ApplyOutcome {
    Applied,
    Rejected { kind: ErrorKind, message: String },
}

impl ApplyOutcome {
    pub fn from_result(result: &Result<()>) -> Self {
        match result {
            Ok(()) => ApplyOutcome::Applied,
            Err(e) => ApplyOutcome::Rejected {
                kind: e.kind(),
                message: e.to_string(),
            },
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match serde_json::to_vec(self) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "Failed to encode apply outcome");
                Vec::new()
            }
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::Replication(format!("undecodable apply response: {}", e)))
    }

    pub fn into_result(self) -> Result<()> {
        match self {
            ApplyOutcome::Applied => Ok(()),
            ApplyOutcome::Rejected { kind, message } => Err(Error::Rejected { kind, message }),
        }
    }
}
