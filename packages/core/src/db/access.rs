//! Transaction Coordinator
//!
//! [`MetadataAccess`] is the per-thread handle through which every unit of
//! work runs. It offers two modes:
//!
//! - [`MetadataAccess::commit`]: read-write. On normal return the pending
//!   mutations are applied and versioned; on error nothing survives and the
//!   error is returned unchanged.
//! - [`MetadataAccess::read`]: read-only, pinned to the snapshot current at
//!   begin. Mutation attempts fault immediately.
//!
//! All three entry points take `&mut self`, so a unit of work cannot start
//! another one on the same handle: nesting is rejected by the borrow checker.
//! Each thread of control obtains its own handle from
//! [`Repository::access`](crate::Repository::access).
//!
//! # Examples
//!
//! ```rust
//! use metastore_core::db::StoreError;
//! use metastore_core::{Repository, RepositoryConfig};
//!
//! # fn main() -> anyhow::Result<()> {
//! let repository = Repository::open(RepositoryConfig::default())?;
//! let mut access = repository.access();
//!
//! let id = access.commit(|session| {
//!     let node = session.find_or_create_at("/", "metadata/categories", "nt:folder")?;
//!     Ok::<_, StoreError>(node.id)
//! })?;
//!
//! let found = access.read(|session| Ok::<_, StoreError>(session.by_id(id).is_some()))?;
//! assert!(found);
//! # Ok(())
//! # }
//! ```

use crate::db::{CommitSummary, NodeStore, Session, SessionMode, StoreError};
use std::sync::Arc;

/// Lifecycle of the unit of work on one handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// No unit of work has run, or the last read completed
    Idle,
    /// A unit of work is running
    Active,
    /// The last unit of work committed
    Committed,
    /// The last unit of work failed or was rolled back
    Failed,
}

/// Per-thread entry point for units of work
pub struct MetadataAccess {
    store: Arc<NodeStore>,
    state: TransactionState,
}

impl MetadataAccess {
    pub(crate) fn new(store: Arc<NodeStore>) -> Self {
        Self {
            store,
            state: TransactionState::Idle,
        }
    }

    /// Outcome of the most recent unit of work
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Begin a unit of work and return its guard
    ///
    /// Dropping the guard without calling [`ActiveTransaction::commit`]
    /// discards all pending mutations.
    pub fn begin(&mut self, mode: SessionMode) -> ActiveTransaction<'_> {
        let session = self.store.session(mode);
        self.state = TransactionState::Active;
        tracing::debug!(mode = ?mode, revision = session.base_revision(), "Began transaction");
        ActiveTransaction {
            access: self,
            session,
            finished: false,
        }
    }

    /// Run `work` in a read-write context and commit it
    ///
    /// Errors raised by `work` abort the unit of work and are returned
    /// unchanged. Commit-time failures, such as
    /// [`StoreError::ConcurrentModification`], are converted into `E`.
    pub fn commit<T, E, F>(&mut self, work: F) -> Result<T, E>
    where
        F: FnOnce(&Session) -> Result<T, E>,
        E: From<StoreError>,
    {
        let transaction = self.begin(SessionMode::ReadWrite);
        let value = work(transaction.session())?;
        transaction.commit()?;
        Ok(value)
    }

    /// Run `work` in a read-only context pinned to the current snapshot
    pub fn read<T, E, F>(&mut self, work: F) -> Result<T, E>
    where
        F: FnOnce(&Session) -> Result<T, E>,
    {
        let transaction = self.begin(SessionMode::ReadOnly);
        let value = work(transaction.session())?;
        transaction.finish_read();
        Ok(value)
    }
}

impl Clone for MetadataAccess {
    /// A fresh, idle handle on the same repository
    fn clone(&self) -> Self {
        Self::new(self.store.clone())
    }
}

/// An active unit of work
///
/// Holds the handle mutably for its whole lifetime.
pub struct ActiveTransaction<'a> {
    access: &'a mut MetadataAccess,
    session: Session,
    finished: bool,
}

impl ActiveTransaction<'_> {
    /// Context for every provider and store call in this unit of work
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn mode(&self) -> SessionMode {
        self.session.mode()
    }

    pub fn state(&self) -> TransactionState {
        self.access.state
    }

    /// Apply pending mutations and create versions for every touched node
    pub fn commit(mut self) -> Result<CommitSummary, StoreError> {
        self.finished = true;
        if self.session.is_read_only() {
            self.access.state = TransactionState::Failed;
            return Err(StoreError::transaction_state(
                "commit called on a read-only context",
            ));
        }

        match self.access.store.commit(self.session.take_changes()) {
            Ok(summary) => {
                self.access.state = TransactionState::Committed;
                Ok(summary)
            }
            Err(e) => {
                self.access.state = TransactionState::Failed;
                self.access.store.metrics().record_rollback();
                Err(e)
            }
        }
    }

    /// Discard pending mutations
    pub fn rollback(self) {
        // Drop does the work
    }

    fn finish_read(mut self) {
        self.finished = true;
        self.access.state = TransactionState::Idle;
    }
}

impl Drop for ActiveTransaction<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if self.session.has_pending_changes() {
            tracing::debug!("Rolling back uncommitted changes");
        }
        self.session.discard();
        self.access.state = TransactionState::Failed;
        self.access.store.metrics().record_rollback();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behaviors::NodeTypeRegistry;
    use crate::config::RepositoryConfig;
    use crate::models::PropertyUpdates;

    fn access() -> MetadataAccess {
        let store = NodeStore::open(
            RepositoryConfig::default(),
            Arc::new(NodeTypeRegistry::standard()),
        )
        .unwrap();
        MetadataAccess::new(Arc::new(store))
    }

    #[test]
    fn test_commit_success_transitions_to_committed() {
        let mut access = access();
        assert_eq!(access.state(), TransactionState::Idle);

        let id = access
            .commit(|session| {
                session
                    .find_or_create_at("/", "metadata", "nt:folder")
                    .map(|n| n.id)
            })
            .unwrap();
        assert_eq!(access.state(), TransactionState::Committed);

        let visible = access
            .read(|session| Ok::<_, StoreError>(session.by_id(id).is_some()))
            .unwrap();
        assert!(visible);
        assert_eq!(access.state(), TransactionState::Idle);
    }

    #[test]
    fn test_failed_unit_of_work_discards_everything() {
        let mut access = access();
        let result: Result<(), StoreError> = access.commit(|session| {
            session.find_or_create_at("/", "metadata", "nt:folder")?;
            Err(StoreError::transaction_state("abort"))
        });
        assert!(matches!(result, Err(StoreError::TransactionState(_))));
        assert_eq!(access.state(), TransactionState::Failed);

        let found = access
            .read(|session| session.resolve_str("/metadata"))
            .unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn test_read_rejects_mutation() {
        let mut access = access();
        let result = access.read(|session| session.find_or_create_at("/", "metadata", "nt:folder"));
        assert!(matches!(result, Err(StoreError::ReadOnly(_))));
        assert_eq!(access.state(), TransactionState::Failed);
    }

    #[test]
    fn test_guard_rollback_on_drop() {
        let mut access = access();
        {
            let tx = access.begin(SessionMode::ReadWrite);
            assert_eq!(tx.state(), TransactionState::Active);
            tx.session()
                .find_or_create_at("/", "metadata", "nt:folder")
                .unwrap();
        }
        assert_eq!(access.state(), TransactionState::Failed);
        let found = access
            .read(|session| session.resolve_str("/metadata"))
            .unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn test_commit_of_read_context_is_a_state_error() {
        let mut access = access();
        let tx = access.begin(SessionMode::ReadOnly);
        let err = tx.commit().unwrap_err();
        assert!(matches!(err, StoreError::TransactionState(_)));
    }

    #[test]
    fn test_read_is_pinned_to_its_snapshot() {
        let mut writer = access();
        let mut reader = writer.clone();
        let id = writer
            .commit(|session| session.find_or_create_at("/", "metadata", "nt:folder").map(|n| n.id))
            .unwrap();

        let tx = reader.begin(SessionMode::ReadOnly);
        writer
            .commit(|session| {
                session.set_properties(id, &PropertyUpdates::new().set("owner", "ops"))
            })
            .unwrap();
        assert!(tx.session().by_id(id).unwrap().property("owner").is_none());
        drop(tx);

        let owner = reader
            .read(|session| Ok::<_, StoreError>(session.by_id(id).unwrap().properties.get("owner").cloned()))
            .unwrap();
        assert_eq!(owner, Some("ops".into()));
    }
}
