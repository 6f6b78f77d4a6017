//! Persistence Tests
//!
//! Repositories configured with a storage path write every commit to disk
//! and reload it, including version histories, when opened again.

#[cfg(test)]
mod persistence_tests {
    use anyhow::Result;
    use metastore_core::behaviors::{NodeTypeRegistry, RegistryError};
    use metastore_core::db::StoreError;
    use metastore_core::mapper::Entity;
    use metastore_core::models::{Feed, VersionLabel};
    use metastore_core::services::{
        DatasourceProvider, EntityProvider, FeedProvider, RepositoryError, VersionService,
    };
    use metastore_core::{Repository, RepositoryConfig};
    use std::path::PathBuf;
    use tempfile::TempDir;

    /// Helper to create a storage location that is removed with the guard
    fn create_storage() -> Result<(PathBuf, TempDir)> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("repository.json");
        Ok((path, temp_dir))
    }

    #[test]
    fn test_reopen_restores_state_and_history() -> Result<()> {
        let (path, _temp_dir) = create_storage()?;

        let feed_id = {
            let repository = Repository::open(RepositoryConfig::persistent(&path))?;
            let mut access = repository.access();
            let id = access.commit(|session| {
                let feed = FeedProvider.ensure_feed_by_name(session, "c1", "f1")?;
                feed.object().set_property("prop1", "a")?;
                let hive =
                    DatasourceProvider.ensure_hive_table_datasource(session, "orders", "sales", "orders")?;
                FeedProvider.ensure_feed_source(session, &feed, &hive.as_datasource())?;
                Ok::<_, RepositoryError>(feed.id())
            })?;
            access.commit(|session| {
                let feed = FeedProvider.find_by_id(session, id)?.expect("feed exists");
                feed.object().set_property("prop1", "b")?;
                Ok::<_, RepositoryError>(())
            })?;
            id
        };
        assert!(path.exists());

        let repository = Repository::open(RepositoryConfig::persistent(&path))?;
        assert_eq!(repository.revision(), 2);

        let mut access = repository.access();
        access.read(|session| {
            let feed = FeedProvider.find_by_id(session, feed_id)?.expect("reloaded feed");
            assert_eq!(feed.property::<String>("prop1")?.as_deref(), Some("b"));

            let sources = feed.sources()?;
            assert_eq!(sources.len(), 1);
            let datasource = sources[0].datasource()?.expect("reference survives reload");
            assert_eq!(datasource.name()?, "orders");

            let versions = VersionService::new(session);
            assert_eq!(versions.versions_of(feed_id).len(), 3);
            let past: Feed = versions.materialize_at(feed_id, &VersionLabel::new(1, 0))?;
            assert_eq!(past.property::<String>("prop1")?.as_deref(), Some("a"));
            Ok::<_, RepositoryError>(())
        })?;
        Ok(())
    }

    #[test]
    fn test_reopen_rejects_unregistered_persisted_types() -> Result<()> {
        let (path, _temp_dir) = create_storage()?;

        let registry = NodeTypeRegistry::builder()
            .register("acme:dashboard", None, None)
            .build()?;
        {
            let repository =
                Repository::open_with_registry(RepositoryConfig::persistent(&path), registry)?;
            let mut access = repository.access();
            access.commit(|session| {
                session.find_or_create_at("/", "dashboards/main", "acme:dashboard")?;
                Ok::<_, StoreError>(())
            })?;
        }

        let result = Repository::open(RepositoryConfig::persistent(&path));
        assert!(matches!(
            result,
            Err(RepositoryError::Registry(RegistryError::UnknownPersistedType(t))) if t == "acme:dashboard"
        ));
        Ok(())
    }

    #[test]
    fn test_corrupt_storage_fails_to_open() -> Result<()> {
        let (path, _temp_dir) = create_storage()?;
        std::fs::write(&path, "{ not json")?;

        let result = Repository::open(RepositoryConfig::persistent(&path));
        assert!(matches!(result, Err(RepositoryError::Store(_))));
        Ok(())
    }

    #[test]
    fn test_failed_write_keeps_committed_state() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let storage_dir = temp_dir.path().join("storage");
        let path = storage_dir.join("repository.json");
        let repository = Repository::open(RepositoryConfig::persistent(&path))?;
        let mut access = repository.access();
        access.commit(|session| {
            FeedProvider.ensure_feed_by_name(session, "c1", "f1")?;
            Ok::<_, RepositoryError>(())
        })?;

        // Storage directory is replaced by a plain file
        std::fs::remove_dir_all(&storage_dir)?;
        std::fs::write(&storage_dir, "blocked")?;
        let result = access.commit(|session| {
            FeedProvider.ensure_feed_by_name(session, "c1", "f2")?;
            Ok::<_, RepositoryError>(())
        });
        assert!(matches!(
            result,
            Err(RepositoryError::Store(StoreError::Persistence { .. }))
        ));

        assert_eq!(repository.revision(), 1);
        access.read(|session| {
            assert!(FeedProvider.find_by_name(session, "c1", "f2")?.is_none());
            assert!(FeedProvider.find_by_name(session, "c1", "f1")?.is_some());
            Ok::<_, RepositoryError>(())
        })?;
        Ok(())
    }
}
