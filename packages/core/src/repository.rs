//! Repository composition root
//!
//! [`Repository`] wires configuration, the node-type registry and the node
//! store together. It is cheap to clone and is meant to be shared between
//! threads; every thread of control asks it for its own
//! [`MetadataAccess`] handle to run units of work.
//!
//! # Examples
//!
//! ```rust
//! use metastore_core::services::{CategoryProvider, RepositoryError};
//! use metastore_core::{Repository, RepositoryConfig};
//!
//! # fn main() -> anyhow::Result<()> {
//! let repository = Repository::open(RepositoryConfig::default())?;
//! let mut access = repository.access();
//!
//! access.commit(|session| {
//!     let category = CategoryProvider.ensure_category(session, "my_category")?;
//!     category.set_title("My Category")?;
//!     Ok::<_, RepositoryError>(())
//! })?;
//!
//! assert_eq!(repository.metrics().commits, 1);
//! # Ok(())
//! # }
//! ```

use crate::behaviors::NodeTypeRegistry;
use crate::config::RepositoryConfig;
use crate::db::{EventSink, MetadataAccess, MetadataEvent, MetricsSnapshot, NodeStore};
use crate::services::RepositoryError;
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Clone)]
pub struct Repository {
    store: Arc<NodeStore>,
}

impl Repository {
    /// Open a repository with the standard metadata node types
    pub fn open(config: RepositoryConfig) -> Result<Self, RepositoryError> {
        Self::open_with_registry(config, NodeTypeRegistry::standard())
    }

    /// Open a repository with a custom node-type registry
    ///
    /// Fails if the configuration is invalid or if the persisted state holds
    /// nodes whose type `registry` does not know.
    pub fn open_with_registry(
        config: RepositoryConfig,
        registry: NodeTypeRegistry,
    ) -> Result<Self, RepositoryError> {
        config.validate().map_err(RepositoryError::Configuration)?;

        let store = NodeStore::open(config, Arc::new(registry))?;
        store.registry().validate_persisted(store.snapshot().node_types())?;

        tracing::info!(
            revision = store.snapshot().revision(),
            persistent = store.config().storage_path.is_some(),
            "Opened metadata repository"
        );
        Ok(Self {
            store: Arc::new(store),
        })
    }

    /// A fresh, idle transaction handle for the calling thread
    pub fn access(&self) -> MetadataAccess {
        MetadataAccess::new(self.store.clone())
    }

    pub fn subscribe_to_events(&self) -> broadcast::Receiver<MetadataEvent> {
        self.store.subscribe()
    }

    /// Register a sink notified after every successful commit
    pub fn add_event_sink(&self, sink: Arc<dyn EventSink>) {
        self.store.add_event_sink(sink);
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.store.metrics().snapshot()
    }

    pub fn registry(&self) -> &NodeTypeRegistry {
        self.store.registry()
    }

    pub fn config(&self) -> &RepositoryConfig {
        self.store.config()
    }

    /// Revision of the latest committed snapshot
    pub fn revision(&self) -> u64 {
        self.store.snapshot().revision()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_rejects_invalid_config() {
        let config = RepositoryConfig {
            max_page_size: 0,
            ..Default::default()
        };
        let result = Repository::open(config);
        assert!(matches!(result, Err(RepositoryError::Configuration(_))));
    }

    #[test]
    fn test_open_in_memory() {
        let repository = Repository::open(RepositoryConfig::default()).unwrap();
        assert_eq!(repository.revision(), 0);
        assert!(repository.registry().contains("tba:feed"));
    }
}
