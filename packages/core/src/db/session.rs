//! Transaction-scoped view of the node store
//!
//! A [`Session`] pairs the committed snapshot it was opened on with an overlay
//! of pending mutations. Reads consult the overlay first (read-your-writes) and
//! fall back to the snapshot, so a session never observes commits that happened
//! after it started.
//!
//! Sessions are handed out by the transaction coordinator
//! ([`MetadataAccess`](crate::db::MetadataAccess)) and borrowed by every
//! provider call and every entity view. They are intentionally `!Sync`: a
//! session belongs to a single thread of control.

use crate::behaviors::NodeTypeRegistry;
use crate::db::{Snapshot, StoreError, StoreMetrics};
use crate::models::{
    Node, NodeId, NodePath, PropertyUpdates, ValidationError, VersionHistory, FOLDER_NODE_TYPE,
};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Unit-of-work mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Mutations are buffered and applied on commit
    ReadWrite,
    /// Any mutation faults immediately
    ReadOnly,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct SessionSettings {
    pub(crate) strict_paths: bool,
    pub(crate) max_page_size: usize,
}

/// Mutations buffered by a read-write session
#[derive(Debug, Default)]
pub(crate) struct PendingChanges {
    /// Working copies of every touched node
    pub(crate) nodes: HashMap<NodeId, Node>,
    /// Committed revision each node had when first touched, `None` for new nodes
    pub(crate) base_revisions: HashMap<NodeId, Option<u64>>,
    /// Touch order
    pub(crate) touched: Vec<NodeId>,
    pub(crate) milestones: HashSet<NodeId>,
}

impl PendingChanges {
    pub(crate) fn is_empty(&self) -> bool {
        self.touched.is_empty()
    }
}

pub struct Session {
    mode: SessionMode,
    base: Arc<Snapshot>,
    pending: RefCell<PendingChanges>,
    /// Reference targets resolved in this session, keyed by target id
    resolved: RefCell<HashMap<NodeId, String>>,
    registry: Arc<NodeTypeRegistry>,
    metrics: Arc<StoreMetrics>,
    settings: SessionSettings,
}

impl Session {
    pub(crate) fn new(
        mode: SessionMode,
        base: Arc<Snapshot>,
        registry: Arc<NodeTypeRegistry>,
        metrics: Arc<StoreMetrics>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            mode,
            base,
            pending: RefCell::new(PendingChanges::default()),
            resolved: RefCell::new(HashMap::new()),
            registry,
            metrics,
            settings,
        }
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn is_read_only(&self) -> bool {
        self.mode == SessionMode::ReadOnly
    }

    /// Revision of the committed snapshot this session reads from
    pub fn base_revision(&self) -> u64 {
        self.base.revision()
    }

    pub fn root_id(&self) -> NodeId {
        self.base.root_id()
    }

    pub fn registry(&self) -> &NodeTypeRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &StoreMetrics {
        &self.metrics
    }

    pub fn max_page_size(&self) -> usize {
        self.settings.max_page_size
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.pending.borrow().is_empty()
    }

    fn ensure_writable(&self, operation: &str) -> Result<(), StoreError> {
        match self.mode {
            SessionMode::ReadWrite => Ok(()),
            SessionMode::ReadOnly => Err(StoreError::read_only(format!(
                "{} is not allowed in a read-only context",
                operation
            ))),
        }
    }

    /// Run `f` against the visible state of a live node
    pub(crate) fn with_node<R>(&self, id: NodeId, f: impl FnOnce(&Node) -> R) -> Option<R> {
        let pending = self.pending.borrow();
        let node = match pending.nodes.get(&id) {
            Some(node) => node,
            None => self.base.get(&id)?.as_ref(),
        };
        if node.removed {
            return None;
        }
        Some(f(node))
    }

    /// Look up a node by identifier
    ///
    /// Unknown and removed identifiers yield `None`.
    pub fn by_id(&self, id: NodeId) -> Option<Node> {
        self.with_node(id, Node::clone)
    }

    /// Resolve an absolute path
    pub fn resolve(&self, path: &NodePath) -> Option<Node> {
        self.resolve_id(path).and_then(|id| self.by_id(id))
    }

    /// Resolve a path given as a string
    pub fn resolve_str(&self, path: &str) -> Result<Option<Node>, StoreError> {
        Ok(self.resolve(&NodePath::parse(path)?))
    }

    pub fn resolve_id(&self, path: &NodePath) -> Option<NodeId> {
        path.segments()
            .iter()
            .try_fold(self.root_id(), |current, name| self.child_id(current, name))
    }

    pub(crate) fn child_ids(&self, id: NodeId) -> Vec<NodeId> {
        let children = self.with_node(id, |n| n.children.clone()).unwrap_or_default();
        children
            .into_iter()
            .filter(|child| self.with_node(*child, |_| ()).is_some())
            .collect()
    }

    pub(crate) fn child_id(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        let children = self.with_node(parent, |n| n.children.clone())?;
        children
            .into_iter()
            .find(|child| self.with_node(*child, |n| n.name == name).unwrap_or(false))
    }

    /// Live children in order
    pub fn children(&self, id: NodeId) -> Vec<Node> {
        self.child_ids(id)
            .into_iter()
            .filter_map(|child| self.by_id(child))
            .collect()
    }

    /// Every live node below `id`, depth first
    pub(crate) fn descendant_ids(&self, id: NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        let mut stack = self.child_ids(id);
        stack.reverse();
        while let Some(next) = stack.pop() {
            result.push(next);
            let mut children = self.child_ids(next);
            children.reverse();
            stack.extend(children);
        }
        result
    }

    /// Absolute path of a live node
    pub fn path_of(&self, id: NodeId) -> Option<NodePath> {
        let mut segments = Vec::new();
        let (mut name, mut parent) = self.with_node(id, |n| (n.name.clone(), n.parent))?;
        while let Some(parent_id) = parent {
            segments.push(name);
            (name, parent) = self.with_node(parent_id, |n| (n.name.clone(), n.parent))?;
        }
        segments.reverse();
        Some(NodePath::from_segments(segments))
    }

    /// Candidate identifiers of the given node types, including nodes created in this session
    pub(crate) fn ids_of_types(&self, node_types: &[String]) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for node_type in node_types {
            for id in self.base.ids_of_type(node_type) {
                if seen.insert(id) {
                    ids.push(id);
                }
            }
        }
        let pending = self.pending.borrow();
        for id in &pending.touched {
            let matches = pending
                .nodes
                .get(id)
                .map(|n| node_types.contains(&n.node_type))
                .unwrap_or(false);
            if matches && seen.insert(*id) {
                ids.push(*id);
            }
        }
        ids
    }

    /// Every known identifier, used by full scans
    pub(crate) fn all_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.base.nodes.keys().copied().collect();
        let pending = self.pending.borrow();
        ids.extend(
            pending
                .touched
                .iter()
                .filter(|id| self.base.get(id).is_none())
                .copied(),
        );
        ids
    }

    /// Committed version history of a node
    pub fn history(&self, id: NodeId) -> Option<Arc<VersionHistory>> {
        self.base.history(&id).cloned()
    }

    /// Node type of a reference target, cached for the lifetime of the session
    pub(crate) fn resolve_reference(&self, target: NodeId) -> Option<String> {
        if let Some(node_type) = self.resolved.borrow().get(&target) {
            return Some(node_type.clone());
        }
        let node_type = self.with_node(target, |n| n.node_type.clone())?;
        tracing::debug!(target = %target, node_type = %node_type, "Resolved reference");
        self.resolved.borrow_mut().insert(target, node_type.clone());
        Some(node_type)
    }

    /// Apply `f` to the working copy of a live node, copying it into the
    /// pending overlay on first touch
    fn mutate<R>(&self, id: NodeId, f: impl FnOnce(&mut Node) -> R) -> Result<R, StoreError> {
        let mut pending = self.pending.borrow_mut();
        let PendingChanges {
            nodes,
            base_revisions,
            touched,
            ..
        } = &mut *pending;

        let node = match nodes.entry(id) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => {
                let committed = self
                    .base
                    .get(&id)
                    .filter(|n| !n.removed)
                    .ok_or_else(|| StoreError::node_not_found(id))?;
                base_revisions.insert(id, Some(committed.revision));
                touched.push(id);
                entry.insert(committed.as_ref().clone())
            }
        };
        if node.removed {
            return Err(StoreError::node_not_found(id));
        }
        Ok(f(node))
    }

    fn create_child(&self, parent: NodeId, name: &str, node_type: &str) -> Result<Node, StoreError> {
        let node = Node::new(name, node_type, Some(parent));
        node.validate()?;
        self.mutate(parent, |p| p.children.push(node.id))?;

        let mut pending = self.pending.borrow_mut();
        pending.base_revisions.insert(node.id, None);
        pending.touched.push(node.id);
        pending.nodes.insert(node.id, node.clone());
        tracing::debug!(node_id = %node.id, node_type = %node_type, name = %name, "Created node");
        Ok(node)
    }

    fn ensure_folders(&self, mut current: NodeId, segments: &[String]) -> Result<NodeId, StoreError> {
        for segment in segments {
            current = match self.child_id(current, segment) {
                Some(existing) => existing,
                None => self.create_child(current, segment, FOLDER_NODE_TYPE)?.id,
            };
        }
        Ok(current)
    }

    /// Resolve `parent_path/relative_path`, creating it if absent
    ///
    /// Missing intermediate segments of `relative_path` are created as folders.
    /// A missing `parent_path` faults with [`StoreError::PathNotFound`] in strict
    /// mode and is created as folders otherwise. An existing final node whose
    /// type is not `node_type` (or a subtype of it) faults with
    /// [`StoreError::NodeTypeConflict`].
    pub fn find_or_create(
        &self,
        parent_path: &NodePath,
        relative_path: &NodePath,
        node_type: &str,
    ) -> Result<Node, StoreError> {
        self.ensure_writable("find_or_create")?;
        if !self.registry.contains(node_type) {
            return Err(StoreError::UnknownNodeType(node_type.to_string()));
        }
        let Some(name) = relative_path.name() else {
            return Err(ValidationError::invalid_path(
                relative_path.to_string(),
                "relative path must name a node",
            )
            .into());
        };

        let parent = match self.resolve_id(parent_path) {
            Some(id) => id,
            None if self.settings.strict_paths => {
                return Err(StoreError::path_not_found(parent_path));
            }
            None => self.ensure_folders(self.root_id(), parent_path.segments())?,
        };
        let intermediate = &relative_path.segments()[..relative_path.depth() - 1];
        let parent = self.ensure_folders(parent, intermediate)?;

        match self.child_id(parent, name) {
            Some(existing) => {
                let node = self
                    .by_id(existing)
                    .ok_or_else(|| StoreError::node_not_found(existing))?;
                if !self.registry.is_a(&node.node_type, node_type) {
                    return Err(StoreError::NodeTypeConflict {
                        path: parent_path.join(relative_path).to_string(),
                        existing: node.node_type,
                        requested: node_type.to_string(),
                    });
                }
                Ok(node)
            }
            None => self.create_child(parent, name, node_type),
        }
    }

    /// Find-or-create with string paths
    pub fn find_or_create_at(
        &self,
        parent_path: &str,
        relative_path: &str,
        node_type: &str,
    ) -> Result<Node, StoreError> {
        self.find_or_create(
            &NodePath::parse(parent_path)?,
            &NodePath::parse(relative_path)?,
            node_type,
        )
    }

    /// Partial property update, returns whether anything changed
    ///
    /// Unmentioned keys are left untouched and `None` clears a key. An update
    /// that changes nothing does not touch the node, so it produces no version.
    pub fn set_properties(&self, id: NodeId, updates: &PropertyUpdates) -> Result<bool, StoreError> {
        self.ensure_writable("set_properties")?;
        let changed = self
            .with_node(id, |node| {
                updates
                    .iter()
                    .any(|(name, value)| node.properties.get(name) != value)
            })
            .ok_or_else(|| StoreError::node_not_found(id))?;
        if !changed {
            return Ok(false);
        }

        self.mutate(id, |node| {
            for (name, value) in updates.iter() {
                match value {
                    Some(value) => {
                        node.properties.insert(name.to_string(), value.clone());
                    }
                    None => {
                        node.properties.remove(name);
                    }
                }
            }
        })?;
        Ok(true)
    }

    /// Move (and optionally rename) a node below a new parent
    pub fn move_node(&self, id: NodeId, new_parent: NodeId, new_name: &str) -> Result<(), StoreError> {
        self.ensure_writable("move_node")?;
        NodePath::root().child(new_name)?;

        let old_parent = self
            .with_node(id, |n| n.parent)
            .ok_or_else(|| StoreError::node_not_found(id))?
            .ok_or_else(|| StoreError::InvalidStructure("the root node cannot be moved".into()))?;
        if self.with_node(new_parent, |_| ()).is_none() {
            return Err(StoreError::node_not_found(new_parent));
        }

        let mut cursor = Some(new_parent);
        while let Some(current) = cursor {
            if current == id {
                return Err(StoreError::InvalidStructure(format!(
                    "cannot move node {} below itself",
                    id
                )));
            }
            cursor = self.with_node(current, |n| n.parent).flatten();
        }
        if let Some(existing) = self.child_id(new_parent, new_name) {
            if existing != id {
                return Err(StoreError::InvalidStructure(format!(
                    "node {} already has a child named '{}'",
                    new_parent, new_name
                )));
            }
        }

        if old_parent != new_parent {
            self.mutate(old_parent, |p| p.children.retain(|c| *c != id))?;
            self.mutate(new_parent, |p| p.children.push(id))?;
        }
        self.mutate(id, |n| {
            n.parent = Some(new_parent);
            n.name = new_name.to_string();
        })
    }

    /// Tombstone a node and its subtree, returns the number of removed nodes
    ///
    /// The subtree is detached from its parent and becomes invisible to
    /// lookups and queries. Version histories are kept and identifiers are
    /// never handed out again.
    pub fn remove(&self, id: NodeId) -> Result<usize, StoreError> {
        self.ensure_writable("remove")?;
        let parent = self
            .with_node(id, |n| n.parent)
            .ok_or_else(|| StoreError::node_not_found(id))?
            .ok_or_else(|| StoreError::InvalidStructure("the root node cannot be removed".into()))?;

        let mut subtree = vec![id];
        subtree.extend(self.descendant_ids(id));
        for node_id in &subtree {
            self.mutate(*node_id, |n| n.removed = true)?;
        }
        self.mutate(parent, |p| p.children.retain(|c| *c != id))?;

        let mut resolved = self.resolved.borrow_mut();
        for node_id in &subtree {
            resolved.remove(node_id);
        }
        tracing::debug!(node_id = %id, removed = subtree.len(), "Removed subtree");
        Ok(subtree.len())
    }

    /// Make the next version of this node a major version
    pub fn mark_milestone(&self, id: NodeId) -> Result<(), StoreError> {
        self.ensure_writable("mark_milestone")?;
        self.mutate(id, |_| ())?;
        self.pending.borrow_mut().milestones.insert(id);
        Ok(())
    }

    /// Check that a node can take part in the next commit
    ///
    /// Returns whether the node already has pending changes. Pending changes are
    /// always part of the next commit, so there is nothing else to do.
    pub fn ensure_pending(&self, id: NodeId) -> Result<bool, StoreError> {
        self.ensure_writable("save")?;
        if self.with_node(id, |_| ()).is_none() {
            return Err(StoreError::node_not_found(id));
        }
        Ok(self.pending.borrow().nodes.contains_key(&id))
    }

    pub(crate) fn take_changes(&self) -> PendingChanges {
        std::mem::take(&mut *self.pending.borrow_mut())
    }

    /// Drop all pending changes
    pub(crate) fn discard(&self) {
        self.take_changes();
        self.resolved.borrow_mut().clear();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("mode", &self.mode)
            .field("base_revision", &self.base.revision())
            .field("pending", &self.pending.borrow().touched.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RepositoryConfig;
    use crate::db::NodeStore;

    fn store(config: RepositoryConfig) -> NodeStore {
        NodeStore::open(config, Arc::new(NodeTypeRegistry::standard())).unwrap()
    }

    fn path(p: &str) -> NodePath {
        NodePath::parse(p).unwrap()
    }

    #[test]
    fn test_find_or_create_creates_intermediate_folders() {
        let store = store(RepositoryConfig::default());
        let session = store.session(SessionMode::ReadWrite);
        let node = session
            .find_or_create(&path("/"), &path("a/b/c"), "tba:category")
            .unwrap();

        let folder = session.resolve(&path("/a/b")).unwrap();
        assert_eq!(folder.node_type, FOLDER_NODE_TYPE);
        assert_eq!(session.path_of(node.id).unwrap().to_string(), "/a/b/c");

        let again = session
            .find_or_create(&path("/a"), &path("b/c"), "tba:category")
            .unwrap();
        assert_eq!(again.id, node.id);
    }

    #[test]
    fn test_strict_paths_reject_missing_parent() {
        let strict = store(RepositoryConfig::default());
        let session = strict.session(SessionMode::ReadWrite);
        let err = session
            .find_or_create(&path("/missing"), &path("x"), FOLDER_NODE_TYPE)
            .unwrap_err();
        assert!(matches!(err, StoreError::PathNotFound { .. }));

        let lenient = store(RepositoryConfig {
            strict_paths: false,
            ..RepositoryConfig::default()
        });
        let session = lenient.session(SessionMode::ReadWrite);
        let node = session
            .find_or_create(&path("/missing"), &path("x"), FOLDER_NODE_TYPE)
            .unwrap();
        assert_eq!(session.path_of(node.id).unwrap().to_string(), "/missing/x");
    }

    #[test]
    fn test_existing_node_of_other_type_conflicts() {
        let store = store(RepositoryConfig::default());
        let session = store.session(SessionMode::ReadWrite);
        session
            .find_or_create(&path("/"), &path("metadata"), FOLDER_NODE_TYPE)
            .unwrap();
        let err = session
            .find_or_create(&path("/"), &path("metadata"), "tba:category")
            .unwrap_err();
        assert!(matches!(err, StoreError::NodeTypeConflict { .. }));

        let err = session
            .find_or_create(&path("/"), &path("other"), "acme:unknown")
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownNodeType(_)));
    }

    #[test]
    fn test_set_properties_is_partial() {
        let store = store(RepositoryConfig::default());
        let session = store.session(SessionMode::ReadWrite);
        let node = session
            .find_or_create(&path("/"), &path("n"), FOLDER_NODE_TYPE)
            .unwrap();

        let updates = PropertyUpdates::new().set("a", 1).set("b", "x");
        assert!(session.set_properties(node.id, &updates).unwrap());
        assert!(!session.set_properties(node.id, &updates).unwrap());

        let updates = PropertyUpdates::new().set("a", 2).clear("b");
        assert!(session.set_properties(node.id, &updates).unwrap());
        let node = session.by_id(node.id).unwrap();
        assert_eq!(node.properties.len(), 1);
        assert_eq!(node.properties["a"].to_string(), "2");
    }

    #[test]
    fn test_move_node_renames_and_reparents() {
        let store = store(RepositoryConfig::default());
        let session = store.session(SessionMode::ReadWrite);
        let leaf = session
            .find_or_create(&path("/"), &path("a/leaf"), FOLDER_NODE_TYPE)
            .unwrap();
        let b = session
            .find_or_create(&path("/"), &path("b"), FOLDER_NODE_TYPE)
            .unwrap();

        session.move_node(leaf.id, b.id, "moved").unwrap();
        assert_eq!(session.path_of(leaf.id).unwrap().to_string(), "/b/moved");
        assert!(session.resolve(&path("/a/leaf")).is_none());
        assert!(session.children(session.resolve_id(&path("/a")).unwrap()).is_empty());

        // rename in place
        session.move_node(leaf.id, b.id, "renamed").unwrap();
        assert_eq!(session.children(b.id).len(), 1);
        assert_eq!(session.resolve(&path("/b/renamed")).unwrap().id, leaf.id);
    }

    #[test]
    fn test_move_node_rejects_invalid_targets() {
        let store = store(RepositoryConfig::default());
        let session = store.session(SessionMode::ReadWrite);
        let a = session
            .find_or_create(&path("/"), &path("a"), FOLDER_NODE_TYPE)
            .unwrap();
        let child = session
            .find_or_create(&path("/a"), &path("child"), FOLDER_NODE_TYPE)
            .unwrap();
        session
            .find_or_create(&path("/"), &path("taken"), FOLDER_NODE_TYPE)
            .unwrap();

        let below_itself = session.move_node(a.id, child.id, "a").unwrap_err();
        assert!(matches!(below_itself, StoreError::InvalidStructure(_)));

        let occupied = session.move_node(child.id, session.root_id(), "taken").unwrap_err();
        assert!(matches!(occupied, StoreError::InvalidStructure(_)));

        let root = session.move_node(session.root_id(), a.id, "root").unwrap_err();
        assert!(matches!(root, StoreError::InvalidStructure(_)));

        assert_eq!(session.path_of(child.id).unwrap().to_string(), "/a/child");
    }

    #[test]
    fn test_remove_hides_subtree() {
        let store = store(RepositoryConfig::default());
        let session = store.session(SessionMode::ReadWrite);
        let a = session
            .find_or_create(&path("/"), &path("a/b/c"), FOLDER_NODE_TYPE)
            .unwrap();
        let top = session.resolve_id(&path("/a")).unwrap();

        assert_eq!(session.remove(top).unwrap(), 3);
        assert!(session.by_id(a.id).is_none());
        assert!(session.path_of(a.id).is_none());
        assert!(session.resolve(&path("/a")).is_none());
        assert!(matches!(
            session.remove(session.root_id()),
            Err(StoreError::InvalidStructure(_))
        ));
    }

    #[test]
    fn test_read_only_session_rejects_writes() {
        let store = store(RepositoryConfig::default());
        let session = store.session(SessionMode::ReadOnly);
        let err = session
            .find_or_create(&path("/"), &path("a"), FOLDER_NODE_TYPE)
            .unwrap_err();
        assert!(matches!(err, StoreError::ReadOnly(_)));
        assert!(!session.has_pending_changes());
    }
}
