//! Error types for Rollcall
//!
//! Every failure is classified into one of three kinds (see [`ErrorKind`]).
//! The coordinator gates its fallback and tolerance logic on the kind, never
//! on the rendered message.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::TierKind;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification used by the tiered read/write protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The record is absent from the queried tier
    NotFound,
    /// Any I/O, serialization or constraint failure
    Backend,
    /// The command log could not order the mutation
    Replication,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::NotFound => write!(f, "not_found"),
            ErrorKind::Backend => write!(f, "backend"),
            ErrorKind::Replication => write!(f, "replication"),
        }
    }
}

/// Errors that can occur in Rollcall
#[derive(Error, Debug)]
pub enum Error {
    /// Record missing from a tier
    #[error("Student {id} not found in {tier} tier")]
    NotFound { tier: TierKind, id: String },

    /// Backend failure in a tier
    #[error("{tier} tier failure: {reason}")]
    Backend { tier: TierKind, reason: String },

    /// Consensus submission failed or timed out
    #[error("Replication error: {0}")]
    Replication(String),

    /// A replicated command was ordered but the state machine rejected it
    #[error("Command rejected ({kind}): {message}")]
    Rejected { kind: ErrorKind, message: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a not-found error in `tier`.
    pub fn not_found(tier: TierKind, id: impl Into<String>) -> Self {
        Error::NotFound {
            tier,
            id: id.into(),
        }
    }

    /// Shorthand for a backend error in `tier`.
    pub fn backend(tier: TierKind, reason: impl std::fmt::Display) -> Self {
        Error::Backend {
            tier,
            reason: reason.to_string(),
        }
    }

    /// Classify this error into the three-way taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Replication(_) => ErrorKind::Replication,
            Error::Rejected { kind, .. } => *kind,
            Error::Backend { .. }
            | Error::Serialization(_)
            | Error::Config(_)
            | Error::Io(_)
            | Error::Internal(_) => ErrorKind::Backend,
        }
    }

    /// True when the error means "absent", as opposed to "broken".
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}
