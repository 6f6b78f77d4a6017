//! Service Layer Error Types
//!
//! This module defines error types for service-layer operations. Providers
//! report every failure as a [`RepositoryError`], so callers never have to
//! match on store-specific error types unless they want the distinction.

use crate::behaviors::RegistryError;
use crate::db::StoreError;
use crate::mapper::MappingError;
use crate::models::ValidationError;
use thiserror::Error;

/// Query compilation and execution errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// A filter refers to a bind variable that was not supplied
    #[error("Unbound query variable: {0}")]
    UnboundVariable(String),

    /// Operator needs a value the filter does not carry
    #[error("Filter on {field} with operator {operator} requires a value")]
    MissingValue { field: String, operator: String },

    /// Operator/field combination the query engine does not handle
    #[error("Unsupported query construct: {0}")]
    Unsupported(String),

    /// Scope path is malformed
    #[error("Invalid query scope '{path}': {reason}")]
    InvalidScope { path: String, reason: String },

    /// Filter string could not be parsed
    #[error("Invalid filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },
}

impl QueryError {
    /// Create an invalid filter error
    pub fn invalid_filter(filter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidFilter {
            filter: filter.into(),
            reason: reason.into(),
        }
    }
}

/// Provider-level errors
///
/// Wraps every lower-layer failure. Mapping errors that merely carry a store
/// failure are unwrapped into [`RepositoryError::Store`].
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// Store operation failed
    #[error("Store operation failed: {0}")]
    Store(#[from] StoreError),

    /// Entity projection or property coercion failed
    #[error("Entity mapping failed: {0}")]
    Mapping(MappingError),

    /// Query failed to compile or run
    #[error("Query failed: {0}")]
    Query(#[from] QueryError),

    /// Node type registry is inconsistent
    #[error("Node type registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Input validation failed
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Operation is not valid for the entity's type
    #[error("Operation {operation} is not supported for {node_type}")]
    UnsupportedOperation { operation: String, node_type: String },

    /// Repository configuration is invalid
    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

impl From<MappingError> for RepositoryError {
    fn from(err: MappingError) -> Self {
        match err {
            MappingError::Store(store) => Self::Store(store),
            other => Self::Mapping(other),
        }
    }
}

impl RepositoryError {
    /// Create an unsupported operation error
    pub fn unsupported(operation: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            operation: operation.into(),
            node_type: node_type.into(),
        }
    }

    /// Whether the caller may retry the unit of work
    ///
    /// Only optimistic-concurrency conflicts are retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(err) if err.is_concurrent_modification())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NodeId;

    #[test]
    fn test_mapping_store_errors_are_unwrapped() {
        let id = NodeId::new();
        let err: RepositoryError = MappingError::Store(StoreError::node_not_found(id)).into();
        assert!(matches!(err, RepositoryError::Store(StoreError::NodeNotFound { .. })));

        let err: RepositoryError = MappingError::UnknownNodeType("x:y".into()).into();
        assert!(matches!(err, RepositoryError::Mapping(_)));
    }

    #[test]
    fn test_only_conflicts_are_retryable() {
        let id = NodeId::new();
        let conflict: RepositoryError = StoreError::concurrent_modification(id, 1, 2).into();
        assert!(conflict.is_retryable());

        let missing: RepositoryError = StoreError::node_not_found(id).into();
        assert!(!missing.is_retryable());
        assert!(!RepositoryError::unsupported("delete", "tba:jobExecution").is_retryable());
    }
}
