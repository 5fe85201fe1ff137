//! Error types for subscription-set operations.

use crate::types::{Query, SetVersion};
use thiserror::Error;

/// Main error type for subscription-set operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("Duplicate anonymous query: {0}")]
    DuplicateUnnamedQuery(Query),

    #[error("Subscription name already used by a different query: {0}")]
    NameConflict(String),

    #[error("Invalid filter for {query}: {reason}")]
    InvalidFilterSyntax { query: Query, reason: String },

    #[error("Server rejected subscription set {version:?}: {reason}")]
    ServerRejected { version: SetVersion, reason: String },

    #[error("Subscription set {0:?} was superseded before it synchronized")]
    Superseded(SetVersion),

    #[error("Session closed")]
    SessionClosed,

    #[error("Timed out waiting for synchronization")]
    Timeout,

    #[error("Unknown subscription set version: {0:?} (latest is {1:?})")]
    UnknownVersion(SetVersion, SetVersion),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

/// Result type for subscription-set operations.
pub type Result<T> = std::result::Result<T, SyncError>;
