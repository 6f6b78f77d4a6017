//! Entity Mapping Error Types

use crate::db::StoreError;
use crate::models::{NodeId, PropertyType};
use thiserror::Error;

/// Errors raised while projecting nodes onto entities or coercing properties
#[derive(Error, Debug)]
pub enum MappingError {
    /// Node type tag is not the requested entity type or one of its subtypes
    #[error("Node {node_id} has type {found}, which cannot be mapped to {expected}")]
    IncompatibleNodeType {
        node_id: NodeId,
        found: String,
        expected: String,
    },

    /// Stored value cannot be coerced to the requested type
    #[error("Property {property} holds a {found} value, which cannot be read as {expected}")]
    TypeMismatch {
        property: String,
        expected: PropertyType,
        found: PropertyType,
    },

    /// Required property is absent
    #[error("Node {node_id} is missing required property {property}")]
    MissingProperty { node_id: NodeId, property: String },

    /// Node type tag is not registered
    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    /// Store failure while reading or writing through the session
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MappingError {
    /// Create an incompatible node type error
    pub fn incompatible(node_id: NodeId, found: impl Into<String>, expected: impl Into<String>) -> Self {
        Self::IncompatibleNodeType {
            node_id,
            found: found.into(),
            expected: expected.into(),
        }
    }

    /// Create a type mismatch error
    pub fn type_mismatch(property: impl Into<String>, expected: PropertyType, found: PropertyType) -> Self {
        Self::TypeMismatch {
            property: property.into(),
            expected,
            found,
        }
    }
}
