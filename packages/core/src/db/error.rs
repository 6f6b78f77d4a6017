//! Node Store Error Types
//!
//! Errors raised by the node store, sessions and the transaction coordinator.
//! Provider-level callers see them wrapped in
//! [`RepositoryError`](crate::services::RepositoryError).

use crate::models::{NodeId, ValidationError, VersionLabel};
use std::path::PathBuf;
use thiserror::Error;

/// Node store operation errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// Node identifier does not exist (or was removed)
    #[error("Node not found: {id}")]
    NodeNotFound { id: NodeId },

    /// Path does not resolve to a node
    #[error("Path not found: {path}")]
    PathNotFound { path: String },

    /// Find-or-create hit an existing node of a different type
    #[error("Node at {path} has type {existing}, requested {requested}")]
    NodeTypeConflict {
        path: String,
        existing: String,
        requested: String,
    },

    /// Node type tag is not registered
    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    /// Structural change that would corrupt the tree
    #[error("Invalid structure: {0}")]
    InvalidStructure(String),

    /// Malformed path or node data
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Mutation attempted in a read-only context or on a materialized version
    #[error("Mutation rejected: {0}")]
    ReadOnly(String),

    /// Illegal transaction lifecycle use
    #[error("Illegal transaction state: {0}")]
    TransactionState(String),

    /// Optimistic concurrency conflict, the caller may retry
    #[error("Concurrent modification of node {node_id}: expected revision {expected}, found {actual}")]
    ConcurrentModification {
        node_id: NodeId,
        expected: u64,
        actual: u64,
    },

    /// Version label not present in the node's history
    #[error("Version {label} not found for node {node_id}")]
    VersionNotFound { node_id: NodeId, label: VersionLabel },

    /// Storage file could not be read or written
    #[error("Persistence failed for {path}: {source}")]
    Persistence {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Storage file contents could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Create a node not found error
    pub fn node_not_found(id: NodeId) -> Self {
        Self::NodeNotFound { id }
    }

    /// Create a path not found error
    pub fn path_not_found(path: impl ToString) -> Self {
        Self::PathNotFound {
            path: path.to_string(),
        }
    }

    /// Create a read-only violation error
    pub fn read_only(operation: impl Into<String>) -> Self {
        Self::ReadOnly(operation.into())
    }

    /// Create a transaction state error
    pub fn transaction_state(msg: impl Into<String>) -> Self {
        Self::TransactionState(msg.into())
    }

    /// Create a concurrent modification error
    pub fn concurrent_modification(node_id: NodeId, expected: u64, actual: u64) -> Self {
        Self::ConcurrentModification {
            node_id,
            expected,
            actual,
        }
    }

    /// Create a persistence error
    pub fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }

    pub fn is_concurrent_modification(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. })
    }
}
