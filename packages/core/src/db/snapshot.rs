//! Committed repository state
//!
//! A [`Snapshot`] is an immutable view of every node, the node-type index and
//! all version histories at one commit. It is built on `im` persistent maps,
//! so cloning it for a new session or deriving the next commit's state shares
//! structure with the previous one instead of copying it.
//!
//! When a storage path is configured the snapshot is written as JSON after
//! every commit. The file is written next to the target and then renamed over
//! it, so a crash never leaves a half-written repository behind.

use crate::db::StoreError;
use crate::models::{Node, NodeId, NodePath, VersionHistory};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;

const STORAGE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub(crate) revision: u64,
    pub(crate) root_id: NodeId,
    pub(crate) nodes: im::HashMap<NodeId, Arc<Node>>,
    pub(crate) types: im::HashMap<String, im::HashSet<NodeId>>,
    pub(crate) histories: im::HashMap<NodeId, Arc<VersionHistory>>,
}

impl Snapshot {
    /// Empty repository holding only the root node
    pub fn new() -> Self {
        let root = Node::root();
        let mut snapshot = Self {
            revision: 0,
            root_id: root.id,
            nodes: im::HashMap::new(),
            types: im::HashMap::new(),
            histories: im::HashMap::new(),
        };
        snapshot.put(root);
        snapshot
    }

    /// Commit counter of this snapshot
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn root_id(&self) -> NodeId {
        self.root_id
    }

    pub fn node_count(&self) -> usize {
        self.nodes.values().filter(|n| !n.removed).count()
    }

    pub(crate) fn get(&self, id: &NodeId) -> Option<&Arc<Node>> {
        self.nodes.get(id)
    }

    pub(crate) fn history(&self, id: &NodeId) -> Option<&Arc<VersionHistory>> {
        self.histories.get(id)
    }

    /// Insert or replace a node and keep the type index in step
    pub(crate) fn put(&mut self, node: Node) {
        let mut ids = self.types.get(&node.node_type).cloned().unwrap_or_default();
        if node.removed {
            ids.remove(&node.id);
        } else {
            ids.insert(node.id);
        }
        self.types.insert(node.node_type.clone(), ids);
        self.nodes.insert(node.id, Arc::new(node));
    }

    /// Live node identifiers carrying exactly `node_type`
    pub(crate) fn ids_of_type(&self, node_type: &str) -> Vec<NodeId> {
        self.types
            .get(node_type)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Path of a node, following parent links of removed nodes too
    pub(crate) fn path_of(&self, id: NodeId) -> Option<NodePath> {
        let mut segments = Vec::new();
        let mut current = self.nodes.get(&id)?;
        while let Some(parent) = current.parent {
            segments.push(current.name.clone());
            current = self.nodes.get(&parent)?;
        }
        segments.reverse();
        Some(NodePath::from_segments(segments))
    }

    /// Load a snapshot written by [`Snapshot::save`], `None` if the file does not exist
    pub fn load(path: &Path) -> Result<Option<Self>, StoreError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::persistence(path, e)),
        };
        let stored: StoredRepository = serde_json::from_slice(&bytes)?;
        if stored.format_version != STORAGE_FORMAT_VERSION {
            return Err(StoreError::InvalidStructure(format!(
                "unsupported storage format version {}",
                stored.format_version
            )));
        }

        let mut snapshot = Self {
            revision: stored.revision,
            root_id: stored.root_id,
            nodes: im::HashMap::new(),
            types: im::HashMap::new(),
            histories: im::HashMap::new(),
        };
        for node in stored.nodes {
            snapshot.put(node);
        }
        if snapshot.nodes.get(&snapshot.root_id).is_none() {
            return Err(StoreError::InvalidStructure(
                "stored repository has no root node".to_string(),
            ));
        }
        for history in stored.histories {
            snapshot.histories.insert(history.node_id, Arc::new(history));
        }
        Ok(Some(snapshot))
    }

    /// Write the snapshot atomically to `path`
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let stored = StoredRepository {
            format_version: STORAGE_FORMAT_VERSION,
            revision: self.revision,
            root_id: self.root_id,
            nodes: self.nodes.values().map(|n| n.as_ref().clone()).collect(),
            histories: self.histories.values().map(|h| h.as_ref().clone()).collect(),
        };
        let bytes = serde_json::to_vec(&stored)?;

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| StoreError::persistence(dir, e))?;
        }
        let staging = path.with_extension("tmp");
        fs::write(&staging, bytes).map_err(|e| StoreError::persistence(&staging, e))?;
        fs::rename(&staging, path).map_err(|e| StoreError::persistence(path, e))?;
        Ok(())
    }

    /// Node types present in the snapshot, used to validate the registry at startup
    pub(crate) fn node_types(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredRepository {
    format_version: u32,
    revision: u64,
    root_id: NodeId,
    nodes: Vec<Node>,
    histories: Vec<VersionHistory>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FrozenNode, FOLDER_NODE_TYPE};
    use chrono::Utc;
    use tempfile::TempDir;

    fn with_child(snapshot: &mut Snapshot, name: &str) -> NodeId {
        let child = Node::new(name, FOLDER_NODE_TYPE, Some(snapshot.root_id));
        let id = child.id;
        let mut root = snapshot.get(&snapshot.root_id).unwrap().as_ref().clone();
        root.children.push(id);
        snapshot.put(root);
        snapshot.put(child);
        id
    }

    #[test]
    fn test_type_index_tracks_removal() {
        let mut snapshot = Snapshot::new();
        let id = with_child(&mut snapshot, "metadata");
        assert_eq!(snapshot.ids_of_type(FOLDER_NODE_TYPE), vec![id]);

        let mut node = snapshot.get(&id).unwrap().as_ref().clone();
        node.removed = true;
        snapshot.put(node);
        assert!(snapshot.ids_of_type(FOLDER_NODE_TYPE).is_empty());
        assert_eq!(snapshot.node_count(), 1);
    }

    #[test]
    fn test_clone_is_isolated() {
        let mut snapshot = Snapshot::new();
        let frozen = snapshot.clone();
        with_child(&mut snapshot, "metadata");
        assert_eq!(frozen.node_count(), 1);
        assert_eq!(snapshot.node_count(), 2);
    }

    #[test]
    fn test_path_of() {
        let mut snapshot = Snapshot::new();
        let id = with_child(&mut snapshot, "metadata");
        assert_eq!(snapshot.path_of(id).unwrap().to_string(), "/metadata");
        assert_eq!(snapshot.path_of(snapshot.root_id).unwrap().to_string(), "/");
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("repo").join("metadata.json");

        let mut snapshot = Snapshot::new();
        let id = with_child(&mut snapshot, "metadata");
        let mut history = VersionHistory::new(id);
        let node = snapshot.get(&id).unwrap().as_ref().clone();
        history.append(FrozenNode::capture(&node, "/metadata".into()), false, Utc::now(), 1);
        snapshot.histories.insert(id, Arc::new(history));
        snapshot.revision = 3;
        snapshot.save(&path).unwrap();

        let loaded = Snapshot::load(&path).unwrap().unwrap();
        assert_eq!(loaded.revision(), 3);
        assert_eq!(loaded.root_id(), snapshot.root_id());
        assert_eq!(loaded.ids_of_type(FOLDER_NODE_TYPE), vec![id]);
        assert_eq!(loaded.history(&id).unwrap().versions().len(), 2);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        assert!(Snapshot::load(&temp_dir.path().join("absent.json"))
            .unwrap()
            .is_none());
    }
}
