//! Versioning Service
//!
//! Read access to the version histories maintained by the node store. Every
//! successful commit appends one version per touched node; the first commit of
//! a node also records the empty `root` version. Histories only contain
//! committed state, so changes pending in the current session are not visible
//! here until they are committed.

use crate::db::{Session, StoreError};
use crate::mapper::{project_frozen, Entity};
use crate::models::{NodeId, PropertyDiff, Version, VersionLabel};
use crate::services::RepositoryError;
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
pub struct VersionService<'s> {
    session: &'s Session,
}

impl<'s> VersionService<'s> {
    pub fn new(session: &'s Session) -> Self {
        Self { session }
    }

    /// Version labels of a node, oldest first
    ///
    /// Empty for nodes that were never committed.
    pub fn versions_of(&self, id: NodeId) -> Vec<VersionLabel> {
        self.session
            .history(id)
            .map(|history| history.labels())
            .unwrap_or_default()
    }

    /// Label of the most recent version
    pub fn base_version(&self, id: NodeId) -> Option<VersionLabel> {
        self.session
            .history(id)
            .and_then(|history| history.latest().map(|v| v.label))
    }

    pub fn version(&self, id: NodeId, label: &VersionLabel) -> Result<Version, StoreError> {
        self.session
            .history(id)
            .and_then(|history| history.get(label).cloned())
            .ok_or(StoreError::VersionNotFound {
                node_id: id,
                label: *label,
            })
    }

    /// Read-only entity pinned to the state captured at `label`
    pub fn materialize_at<E: Entity<'s>>(
        &self,
        id: NodeId,
        label: &VersionLabel,
    ) -> Result<E, RepositoryError> {
        self.materialize_at_with(id, label, E::Args::default())
    }

    /// [`materialize_at`](Self::materialize_at) with explicit constructor arguments
    pub fn materialize_at_with<E: Entity<'s>>(
        &self,
        id: NodeId,
        label: &VersionLabel,
        args: E::Args,
    ) -> Result<E, RepositoryError> {
        let version = self.version(id, label)?;
        Ok(project_frozen(
            self.session,
            Arc::new(version.state),
            version.revision,
            args,
        )?)
    }

    /// Property changes from version `from` to version `to`
    pub fn diff(
        &self,
        id: NodeId,
        from: &VersionLabel,
        to: &VersionLabel,
    ) -> Result<PropertyDiff, StoreError> {
        let from = self.version(id, from)?;
        let to = self.version(id, to)?;
        Ok(PropertyDiff::between(
            &from.state.properties,
            &to.state.properties,
        ))
    }

    /// Property changes of an entity between two versions
    pub fn diff_entity<E: Entity<'s>>(
        &self,
        entity: &E,
        from: &VersionLabel,
        to: &VersionLabel,
    ) -> Result<PropertyDiff, StoreError> {
        self.diff(entity.id(), from, to)
    }
}
