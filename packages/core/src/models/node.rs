//! Universal Node Model
//!
//! Every piece of metadata in the repository is stored as a [`Node`]: an
//! addressable unit with a stable identifier, a node-type tag, a typed property
//! map and an ordered list of children. Typed domain objects (categories,
//! feeds, datasources, job executions) are views over nodes, see
//! [`crate::mapper`].
//!
//! # Identity
//!
//! - `id` is a UUID v4 and is never reused, not even after the node is removed
//! - The hierarchical path is derived from the parent chain and the node name,
//!   so only sibling names have to be unique
//!
//! # Concurrency
//!
//! `revision` is bumped by the store on every commit that touches the node and
//! is the token used for optimistic concurrency control.

use crate::models::PropertyValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Node type tag of the repository root
pub const ROOT_NODE_TYPE: &str = "nt:root";

/// Node type tag of intermediate path segments created by find-or-create
pub const FOLDER_NODE_TYPE: &str = "nt:folder";

/// Validation errors for node data and paths
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid node type: {0}")]
    InvalidNodeType(String),

    #[error("Invalid node ID format: {0}")]
    InvalidId(String),

    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Properties validation failed: {0}")]
    InvalidProperties(String),
}

impl ValidationError {
    /// Create an invalid path error
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Stable opaque node identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Generate a fresh identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for NodeId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for NodeId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| ValidationError::InvalidId(s.to_string()))
    }
}

/// Universal node structure
///
/// # Fields
///
/// - `id`: Unique identifier, stable across moves
/// - `name`: Path segment under the parent (empty for the root)
/// - `node_type`: Type tag resolved through the node-type registry
/// - `parent`: Parent node, `None` only for the root
/// - `properties`: Typed property map, ordered by name
/// - `children`: Ordered child identifiers
/// - `revision`: Commit counter for optimistic concurrency (0 until first commit)
/// - `removed`: Tombstone flag, removed nodes are invisible to lookups
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub node_type: String,
    pub parent: Option<NodeId>,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
    #[serde(default)]
    pub children: Vec<NodeId>,
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    #[serde(default)]
    pub removed: bool,
}

impl Node {
    /// Create a new, not yet committed node
    pub fn new(name: impl Into<String>, node_type: impl Into<String>, parent: Option<NodeId>) -> Self {
        let now = Utc::now();
        Self {
            id: NodeId::new(),
            name: name.into(),
            node_type: node_type.into(),
            parent,
            properties: BTreeMap::new(),
            children: Vec::new(),
            revision: 0,
            created_at: now,
            modified_at: now,
            removed: false,
        }
    }

    /// Create the repository root node
    pub fn root() -> Self {
        Self::new("", ROOT_NODE_TYPE, None)
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    /// Validate structural invariants of the node
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.node_type.is_empty() {
            return Err(ValidationError::MissingField("node_type".to_string()));
        }
        if self.parent.is_some() && self.name.is_empty() {
            return Err(ValidationError::MissingField("name".to_string()));
        }
        if self.parent == Some(self.id) || self.children.contains(&self.id) {
            return Err(ValidationError::InvalidId(format!(
                "node {} references itself",
                self.id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_node_is_uncommitted() {
        let node = Node::new("feeds", FOLDER_NODE_TYPE, Some(NodeId::new()));
        assert_eq!(node.revision, 0);
        assert!(!node.removed);
        assert!(node.children.is_empty());
        assert!(node.validate().is_ok());
    }

    #[test]
    fn test_root_has_no_parent() {
        let root = Node::root();
        assert!(root.is_root());
        assert_eq!(root.node_type, ROOT_NODE_TYPE);
        assert!(root.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_self_parent() {
        let mut node = Node::new("loop", FOLDER_NODE_TYPE, None);
        node.parent = Some(node.id);
        assert!(matches!(node.validate(), Err(ValidationError::InvalidId(_))));
    }

    #[test]
    fn test_validate_rejects_unnamed_child() {
        let node = Node::new("", FOLDER_NODE_TYPE, Some(NodeId::new()));
        assert_eq!(
            node.validate(),
            Err(ValidationError::MissingField("name".to_string()))
        );
    }

    #[test]
    fn test_node_id_parse() {
        let id = NodeId::new();
        let parsed: NodeId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<NodeId>().is_err());
    }
}
