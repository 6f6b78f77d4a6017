//! Entity Mapper
//!
//! Binds nodes to strongly typed domain objects ("entities"). An entity is a
//! thin view holding a [`NodeObject`]: the node identifier plus the session it
//! was read through. Because the view borrows the session, an entity cannot
//! outlive the unit of work that produced it.
//!
//! # Architecture
//!
//! - **Projection**: [`project`] checks the node's type tag against
//!   [`Entity::NODE_TYPE`] through the node-type registry, so a subtype node
//!   projects onto its supertype's entity
//! - **Typed accessors**: property reads coerce the stored value through
//!   [`FromProperty`] and report [`MappingError::TypeMismatch`] when that is
//!   impossible
//! - **Relationships**: reference properties are resolved by identifier on
//!   access; the session caches resolved targets until it ends
//! - **Frozen views**: entities materialized at a past version read from the
//!   captured state and reject writes; children and references of a frozen
//!   view resolve to the versions that were current at the same revision
//!
//! # Examples
//!
//! ```rust
//! use metastore_core::models::Category;
//! use metastore_core::services::{CategoryProvider, RepositoryError};
//! use metastore_core::{Repository, RepositoryConfig};
//!
//! # fn main() -> anyhow::Result<()> {
//! let repository = Repository::open(RepositoryConfig::default())?;
//! let mut access = repository.access();
//!
//! access.commit(|session| {
//!     let category: Category = CategoryProvider.ensure_category(session, "my_category")?;
//!     category.set_title("My Category")?;
//!     Ok::<_, RepositoryError>(())
//! })?;
//! # Ok(())
//! # }
//! ```

mod error;

pub use error::MappingError;

use crate::behaviors::AnyEntity;
use crate::db::{Session, StoreError};
use crate::models::{
    FromProperty, FrozenNode, Node, NodeId, NodePath, PropertyUpdates, PropertyValue,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Typed view over one node
pub trait Entity<'s>: Sized {
    /// Node type tag this entity maps (subtypes are accepted too)
    const NODE_TYPE: &'static str;

    /// Whether providers may delete entities of this type
    const REMOVABLE: bool = true;

    /// Extra constructor arguments for entities that need more than the node
    type Args: Default + Clone;

    fn from_object(object: NodeObject<'s>, args: Self::Args) -> Self;

    fn object(&self) -> &NodeObject<'s>;

    fn id(&self) -> NodeId {
        self.object().id()
    }
}

fn check_compatible(
    session: &Session,
    node_id: NodeId,
    node_type: &str,
    expected: &str,
) -> Result<(), MappingError> {
    if !session.registry().contains(node_type) {
        return Err(MappingError::UnknownNodeType(node_type.to_string()));
    }
    if session.registry().is_a(node_type, expected) {
        Ok(())
    } else {
        Err(MappingError::incompatible(node_id, node_type, expected))
    }
}

/// Project a node onto entity type `E`
pub fn project<'s, E: Entity<'s>>(
    session: &'s Session,
    node: &Node,
    args: E::Args,
) -> Result<E, MappingError> {
    check_compatible(session, node.id, &node.node_type, E::NODE_TYPE)?;
    Ok(E::from_object(NodeObject::live(session, node.id), args))
}

/// Look up a node by identifier and project it, `None` if it does not exist
pub fn find_projection<'s, E: Entity<'s>>(
    session: &'s Session,
    id: NodeId,
    args: E::Args,
) -> Result<Option<E>, MappingError> {
    let Some(node_type) = session.with_node(id, |n| n.node_type.clone()) else {
        return Ok(None);
    };
    check_compatible(session, id, &node_type, E::NODE_TYPE)?;
    Ok(Some(E::from_object(NodeObject::live(session, id), args)))
}

/// Project a version captured at repository revision `revision` onto entity type `E`
pub(crate) fn project_frozen<'s, E: Entity<'s>>(
    session: &'s Session,
    state: Arc<FrozenNode>,
    revision: u64,
    args: E::Args,
) -> Result<E, MappingError> {
    check_compatible(session, state.id, &state.node_type, E::NODE_TYPE)?;
    Ok(E::from_object(NodeObject::frozen(session, state, revision), args))
}

/// Captured node state and the revision it is pinned to
#[derive(Clone)]
struct Pinned {
    state: Arc<FrozenNode>,
    revision: u64,
}

/// Node handle backing every entity
#[derive(Clone)]
pub struct NodeObject<'s> {
    session: &'s Session,
    id: NodeId,
    frozen: Option<Pinned>,
}

impl<'s> NodeObject<'s> {
    pub(crate) fn live(session: &'s Session, id: NodeId) -> Self {
        Self {
            session,
            id,
            frozen: None,
        }
    }

    pub(crate) fn frozen(session: &'s Session, state: Arc<FrozenNode>, revision: u64) -> Self {
        Self {
            session,
            id: state.id,
            frozen: Some(Pinned { state, revision }),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn session(&self) -> &'s Session {
        self.session
    }

    /// Whether this view is pinned to a past version
    pub fn is_frozen(&self) -> bool {
        self.frozen.is_some()
    }

    fn read<R>(&self, f: impl FnOnce(&FrozenOrLive<'_>) -> R) -> Result<R, MappingError> {
        match &self.frozen {
            Some(Pinned { state, .. }) => Ok(f(&FrozenOrLive {
                name: &state.name,
                node_type: &state.node_type,
                properties: &state.properties,
            })),
            None => self
                .session
                .with_node(self.id, |node| {
                    f(&FrozenOrLive {
                        name: &node.name,
                        node_type: &node.node_type,
                        properties: &node.properties,
                    })
                })
                .ok_or_else(|| StoreError::node_not_found(self.id).into()),
        }
    }

    pub fn name(&self) -> Result<String, MappingError> {
        self.read(|n| n.name.to_string())
    }

    pub fn node_type(&self) -> Result<String, MappingError> {
        self.read(|n| n.node_type.to_string())
    }

    pub fn path(&self) -> Result<NodePath, MappingError> {
        match &self.frozen {
            Some(Pinned { state, .. }) => Ok(NodePath::parse(&state.path).map_err(StoreError::from)?),
            None => self
                .session
                .path_of(self.id)
                .ok_or_else(|| StoreError::node_not_found(self.id).into()),
        }
    }

    /// All properties
    pub fn properties(&self) -> Result<BTreeMap<String, PropertyValue>, MappingError> {
        self.read(|n| n.properties.clone())
    }

    /// Read a property coerced to `T`, `None` if absent
    pub fn property<T: FromProperty>(&self, name: &str) -> Result<Option<T>, MappingError> {
        let value = self.read(|n| n.properties.get(name).cloned())?;
        value
            .map(|value| {
                T::from_property(&value)
                    .ok_or_else(|| MappingError::type_mismatch(name, T::TYPE, value.property_type()))
            })
            .transpose()
    }

    /// Read a property that must be present
    pub fn required_property<T: FromProperty>(&self, name: &str) -> Result<T, MappingError> {
        self.property(name)?
            .ok_or_else(|| MappingError::MissingProperty {
                node_id: self.id,
                property: name.to_string(),
            })
    }

    fn ensure_live(&self) -> Result<(), MappingError> {
        if self.is_frozen() {
            return Err(StoreError::read_only("materialized versions are immutable").into());
        }
        Ok(())
    }

    /// Apply a partial update, returns whether anything changed
    pub fn set_properties(&self, updates: &PropertyUpdates) -> Result<bool, MappingError> {
        self.ensure_live()?;
        Ok(self.session.set_properties(self.id, updates)?)
    }

    pub fn set_property(&self, name: &str, value: impl Into<PropertyValue>) -> Result<(), MappingError> {
        self.set_properties(&PropertyUpdates::new().set(name, value))
            .map(|_| ())
    }

    pub fn clear_property(&self, name: &str) -> Result<(), MappingError> {
        self.set_properties(&PropertyUpdates::new().clear(name))
            .map(|_| ())
    }

    /// Point reference property `name` at `target`
    pub fn set_reference(&self, name: &str, target: NodeId) -> Result<(), MappingError> {
        self.set_property(name, PropertyValue::Reference(target))
    }

    /// Node `id` as seen from this view
    ///
    /// Live views see the session's current state. Frozen views see the
    /// version of `id` that was current at their pinned revision, and nothing
    /// for nodes that did not exist yet or were already removed.
    fn related(&self, id: NodeId) -> Option<NodeObject<'s>> {
        match &self.frozen {
            None => self
                .session
                .with_node(id, |_| ())
                .map(|_| NodeObject::live(self.session, id)),
            Some(Pinned { revision, .. }) => {
                let history = self.session.history(id)?;
                let version = history.as_of(*revision)?;
                if version.state.removed {
                    return None;
                }
                Some(NodeObject::frozen(
                    self.session,
                    Arc::new(version.state.clone()),
                    *revision,
                ))
            }
        }
    }

    /// Project this node onto entity type `E` with default arguments
    pub fn project<E: Entity<'s>>(self) -> Result<E, MappingError> {
        let node_type = self.node_type()?;
        check_compatible(self.session, self.id, &node_type, E::NODE_TYPE)?;
        Ok(E::from_object(self, E::Args::default()))
    }

    /// Resolve reference property `name` as entity `E`
    ///
    /// A dangling reference (target removed or never committed) yields `None`.
    pub fn reference<E: Entity<'s>>(&self, name: &str) -> Result<Option<E>, MappingError> {
        match self.reference_object(name)? {
            Some(object) => object.project().map(Some),
            None => Ok(None),
        }
    }

    /// Resolve reference property `name` to whatever entity the registry builds for it
    pub fn reference_any(&self, name: &str) -> Result<Option<AnyEntity<'s>>, MappingError> {
        match self.reference_object(name)? {
            Some(object) => object.entity().map(Some),
            None => Ok(None),
        }
    }

    fn reference_object(&self, name: &str) -> Result<Option<NodeObject<'s>>, MappingError> {
        let Some(target) = self.property::<NodeId>(name)? else {
            return Ok(None);
        };
        if self.is_frozen() {
            return Ok(self.related(target));
        }
        if self.session.resolve_reference(target).is_none() {
            return Ok(None);
        }
        Ok(Some(NodeObject::live(self.session, target)))
    }

    /// Parent of this node, `None` for the root
    pub fn parent_object(&self) -> Option<NodeObject<'s>> {
        let parent = match &self.frozen {
            Some(Pinned { state, .. }) => state.parent,
            None => self.session.with_node(self.id, |n| n.parent).flatten(),
        };
        self.related(parent?)
    }

    /// Named child of this node
    pub fn child_object(&self, name: &str) -> Result<Option<NodeObject<'s>>, MappingError> {
        match &self.frozen {
            None => Ok(self
                .session
                .child_id(self.id, name)
                .map(|id| NodeObject::live(self.session, id))),
            Some(Pinned { state, .. }) => {
                for id in &state.children {
                    if let Some(child) = self.related(*id) {
                        if child.name()? == name {
                            return Ok(Some(child));
                        }
                    }
                }
                Ok(None)
            }
        }
    }

    /// Named child projected as `E`, `None` if there is no such child
    pub fn child<E: Entity<'s>>(&self, name: &str) -> Result<Option<E>, MappingError> {
        match self.child_object(name)? {
            Some(object) => object.project().map(Some),
            None => Ok(None),
        }
    }

    /// Children whose type is `E::NODE_TYPE` or a subtype, in order
    pub fn children<E: Entity<'s>>(&self) -> Result<Vec<E>, MappingError> {
        let ids = match &self.frozen {
            Some(Pinned { state, .. }) => state.children.clone(),
            None => self.session.child_ids(self.id),
        };
        let mut result = Vec::new();
        for id in ids {
            let Some(child) = self.related(id) else {
                continue;
            };
            if self.session.registry().is_a(&child.node_type()?, E::NODE_TYPE) {
                result.push(E::from_object(child, E::Args::default()));
            }
        }
        Ok(result)
    }

    /// Construct the registered entity variant for this node
    pub fn entity(&self) -> Result<AnyEntity<'s>, MappingError> {
        self.session.registry().construct(self.clone())
    }
}

impl std::fmt::Debug for NodeObject<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeObject")
            .field("id", &self.id)
            .field("frozen", &self.is_frozen())
            .finish()
    }
}

/// Borrowed node fields shared by live and frozen reads
struct FrozenOrLive<'a> {
    name: &'a str,
    node_type: &'a str,
    properties: &'a BTreeMap<String, PropertyValue>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behaviors::NodeTypeRegistry;
    use crate::config::RepositoryConfig;
    use crate::db::{NodeStore, SessionMode};
    use crate::models::{PropertyType, FOLDER_NODE_TYPE};

    struct Folder<'s> {
        object: NodeObject<'s>,
    }

    impl<'s> Entity<'s> for Folder<'s> {
        const NODE_TYPE: &'static str = FOLDER_NODE_TYPE;
        type Args = ();

        fn from_object(object: NodeObject<'s>, _args: ()) -> Self {
            Self { object }
        }

        fn object(&self) -> &NodeObject<'s> {
            &self.object
        }
    }

    fn store() -> NodeStore {
        NodeStore::open(
            RepositoryConfig::default(),
            Arc::new(NodeTypeRegistry::standard()),
        )
        .unwrap()
    }

    #[test]
    fn test_project_checks_node_type() {
        let store = store();
        let session = store.session(SessionMode::ReadWrite);
        let folder = session.find_or_create_at("/", "metadata", FOLDER_NODE_TYPE).unwrap();
        let root = session.by_id(session.root_id()).unwrap();

        assert!(project::<Folder>(&session, &folder, ()).is_ok());
        let err = project::<Folder>(&session, &root, ()).err().unwrap();
        assert!(matches!(err, MappingError::IncompatibleNodeType { .. }));
        assert!(find_projection::<Folder>(&session, NodeId::new(), ())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_typed_property_access() {
        let store = store();
        let session = store.session(SessionMode::ReadWrite);
        let node = session.find_or_create_at("/", "metadata", FOLDER_NODE_TYPE).unwrap();
        let folder: Folder = project(&session, &node, ()).unwrap();
        let object = folder.object();

        object.set_property("count", "17").unwrap();
        object.set_property("flag", true).unwrap();
        assert_eq!(object.property::<i64>("count").unwrap(), Some(17));
        assert_eq!(object.property::<String>("count").unwrap(), Some("17".into()));
        assert_eq!(object.property::<i64>("absent").unwrap(), None);

        let err = object.property::<i64>("flag").unwrap_err();
        assert!(matches!(
            err,
            MappingError::TypeMismatch {
                expected: PropertyType::Long,
                found: PropertyType::Boolean,
                ..
            }
        ));
        assert!(matches!(
            object.required_property::<String>("absent"),
            Err(MappingError::MissingProperty { .. })
        ));

        object.clear_property("count").unwrap();
        assert_eq!(object.property::<i64>("count").unwrap(), None);
    }

    #[test]
    fn test_reference_resolution_is_weak() {
        let store = store();
        let session = store.session(SessionMode::ReadWrite);
        let a = session.find_or_create_at("/", "a", FOLDER_NODE_TYPE).unwrap();
        let b = session.find_or_create_at("/", "b", FOLDER_NODE_TYPE).unwrap();
        let a: Folder = project(&session, &a, ()).unwrap();
        let b_view: Folder = project(&session, &b, ()).unwrap();

        // Cycles are fine, references are plain identifiers
        a.object().set_reference("peer", b.id).unwrap();
        b_view.object().set_reference("peer", a.id()).unwrap();

        let peer = a.object().reference::<Folder>("peer").unwrap().unwrap();
        assert_eq!(peer.id(), b.id);

        session.remove(b.id).unwrap();
        assert!(a.object().reference::<Folder>("peer").unwrap().is_none());
    }

    #[test]
    fn test_frozen_view_rejects_writes() {
        let store = store();
        let session = store.session(SessionMode::ReadWrite);
        let node = session.find_or_create_at("/", "metadata", FOLDER_NODE_TYPE).unwrap();
        let state = Arc::new(FrozenNode::capture(&node, "/metadata".into()));
        let frozen: Folder = project_frozen(&session, state, 0, ()).unwrap();

        assert!(frozen.object().is_frozen());
        assert_eq!(frozen.object().path().unwrap().to_string(), "/metadata");
        let err = frozen.object().set_property("x", 1).unwrap_err();
        assert!(matches!(err, MappingError::Store(StoreError::ReadOnly(_))));
    }
}
