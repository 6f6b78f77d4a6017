//! Version records
//!
//! Every successful commit appends one immutable [`Version`] to the history of
//! each node it touched. The first commit of a node appends two entries: the
//! implicit `root` version, which captures an empty property map, and `1.0`.
//! Later commits increment the minor component unless the node was marked as a
//! milestone, in which case the major component is incremented.

use crate::models::{Node, NodeId, PropertyValue, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Per-node version label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum VersionLabel {
    /// Implicit base version created at first persistence
    Root,
    Numbered { major: u32, minor: u32 },
}

impl VersionLabel {
    pub fn new(major: u32, minor: u32) -> Self {
        Self::Numbered { major, minor }
    }

    /// Label following `self`
    pub fn successor(&self, milestone: bool) -> Self {
        match (self, milestone) {
            (Self::Root, _) => Self::new(1, 0),
            (Self::Numbered { major, .. }, true) => Self::new(major + 1, 0),
            (Self::Numbered { major, minor }, false) => Self::new(*major, minor + 1),
        }
    }
}

impl fmt::Display for VersionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => f.write_str("root"),
            Self::Numbered { major, minor } => write!(f, "{}.{}", major, minor),
        }
    }
}

impl FromStr for VersionLabel {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "root" || s == "jcr:rootVersion" {
            return Ok(Self::Root);
        }
        let invalid = || ValidationError::InvalidProperties(format!("invalid version label '{}'", s));
        let (major, minor) = s.split_once('.').ok_or_else(invalid)?;
        Ok(Self::Numbered {
            major: major.parse().map_err(|_| invalid())?,
            minor: minor.parse().map_err(|_| invalid())?,
        })
    }
}

impl TryFrom<String> for VersionLabel {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<VersionLabel> for String {
    fn from(value: VersionLabel) -> Self {
        value.to_string()
    }
}

/// Node state captured at commit time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrozenNode {
    pub id: NodeId,
    pub name: String,
    pub node_type: String,
    pub path: String,
    #[serde(default)]
    pub parent: Option<NodeId>,
    pub properties: BTreeMap<String, PropertyValue>,
    pub children: Vec<NodeId>,
    #[serde(default)]
    pub removed: bool,
}

impl FrozenNode {
    pub fn capture(node: &Node, path: String) -> Self {
        Self {
            id: node.id,
            name: node.name.clone(),
            node_type: node.node_type.clone(),
            path,
            parent: node.parent,
            properties: node.properties.clone(),
            children: node.children.clone(),
            removed: node.removed,
        }
    }

    /// Empty state used for the root version
    fn base(&self) -> Self {
        Self {
            properties: BTreeMap::new(),
            children: Vec::new(),
            removed: false,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Version {
    pub label: VersionLabel,
    pub created_at: DateTime<Utc>,
    /// Repository revision of the commit that recorded this version
    #[serde(default)]
    pub revision: u64,
    pub state: FrozenNode,
}

/// Append-only version history of one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionHistory {
    pub node_id: NodeId,
    versions: Vec<Version>,
}

impl VersionHistory {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            versions: Vec::new(),
        }
    }

    /// Versions, oldest first
    pub fn versions(&self) -> &[Version] {
        &self.versions
    }

    pub fn labels(&self) -> Vec<VersionLabel> {
        self.versions.iter().map(|v| v.label).collect()
    }

    pub fn latest(&self) -> Option<&Version> {
        self.versions.last()
    }

    pub fn get(&self, label: &VersionLabel) -> Option<&Version> {
        self.versions.iter().find(|v| &v.label == label)
    }

    /// Latest version recorded at or before repository revision `revision`
    pub fn as_of(&self, revision: u64) -> Option<&Version> {
        self.versions.iter().rev().find(|v| v.revision <= revision)
    }

    /// Append the state captured by a commit and return its label
    pub fn append(
        &mut self,
        state: FrozenNode,
        milestone: bool,
        created_at: DateTime<Utc>,
        revision: u64,
    ) -> VersionLabel {
        let previous = match self.versions.last() {
            Some(version) => version.label,
            None => {
                self.versions.push(Version {
                    label: VersionLabel::Root,
                    created_at,
                    revision,
                    state: state.base(),
                });
                VersionLabel::Root
            }
        };
        let label = previous.successor(milestone);
        self.versions.push(Version {
            label,
            created_at,
            revision,
            state,
        });
        label
    }
}

/// Old and new value of one property between two versions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyChange {
    pub old: Option<PropertyValue>,
    pub new: Option<PropertyValue>,
}

/// Property delta between two versions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyDiff {
    pub changes: BTreeMap<String, PropertyChange>,
}

impl PropertyDiff {
    /// Compute the changes that turn `from` into `to`
    pub fn between(
        from: &BTreeMap<String, PropertyValue>,
        to: &BTreeMap<String, PropertyValue>,
    ) -> Self {
        let mut changes = BTreeMap::new();
        for name in from.keys().chain(to.keys()) {
            let old = from.get(name);
            let new = to.get(name);
            if old != new {
                changes.insert(
                    name.clone(),
                    PropertyChange {
                        old: old.cloned(),
                        new: new.cloned(),
                    },
                );
            }
        }
        Self { changes }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&PropertyChange> {
        self.changes.get(name)
    }

    /// Replay the diff on top of `properties`
    pub fn apply_to(
        &self,
        properties: &BTreeMap<String, PropertyValue>,
    ) -> BTreeMap<String, PropertyValue> {
        let mut result = properties.clone();
        for (name, change) in &self.changes {
            match &change.new {
                Some(value) => {
                    result.insert(name.clone(), value.clone());
                }
                None => {
                    result.remove(name);
                }
            }
        }
        result
    }
}
