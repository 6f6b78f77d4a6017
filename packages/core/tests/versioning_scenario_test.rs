//! Versioning Scenario Tests
//!
//! End-to-end checks of the version history maintained by commits: labels,
//! materialization of past states, diffs, milestones and tombstoned deletes.

#[cfg(test)]
mod versioning_scenario_tests {
    use anyhow::Result;
    use metastore_core::mapper::Entity;
    use metastore_core::models::{Category, Feed, FeedSource, NodeId, PropertyValue, VersionLabel};
    use metastore_core::services::{
        CategoryProvider, DatasourceProvider, EntityProvider, FeedProvider, RepositoryError,
        VersionService,
    };
    use metastore_core::{Repository, RepositoryConfig};

    fn label(s: &str) -> VersionLabel {
        s.parse().unwrap()
    }

    /// Create feed `c1/f1` with `prop1 = "a"` and commit
    fn create_feed(repository: &Repository) -> Result<NodeId> {
        let mut access = repository.access();
        let id = access.commit(|session| {
            let feed = FeedProvider.ensure_feed_by_name(session, "c1", "f1")?;
            feed.object().set_property("prop1", "a")?;
            Ok::<_, RepositoryError>(feed.id())
        })?;
        Ok(id)
    }

    fn set_prop1(repository: &Repository, id: NodeId, value: &str) -> Result<()> {
        let mut access = repository.access();
        access.commit(|session| {
            let feed = FeedProvider.find_by_id(session, id)?.expect("feed exists");
            feed.object().set_property("prop1", value)?;
            Ok::<_, RepositoryError>(())
        })?;
        Ok(())
    }

    #[test]
    fn test_feed_version_scenario() -> Result<()> {
        let repository = Repository::open(RepositoryConfig::default())?;
        let id = create_feed(&repository)?;

        let mut access = repository.access();
        access.read(|session| {
            let feed = FeedProvider.find_by_id(session, id)?.expect("committed feed");
            assert_eq!(feed.property::<String>("prop1")?.as_deref(), Some("a"));
            assert_eq!(
                VersionService::new(session).versions_of(id),
                vec![VersionLabel::Root, label("1.0")]
            );
            Ok::<_, RepositoryError>(())
        })?;

        set_prop1(&repository, id, "b")?;

        access.read(|session| {
            let versions = VersionService::new(session);
            assert_eq!(versions.versions_of(id).len(), 3);
            assert_eq!(versions.base_version(id), Some(label("1.1")));

            let past: Feed = versions.materialize_at(id, &label("1.0"))?;
            assert_eq!(past.property::<String>("prop1")?.as_deref(), Some("a"));
            assert!(past.object().is_frozen());

            let current = FeedProvider.find_by_id(session, id)?.expect("committed feed");
            assert_eq!(current.property::<String>("prop1")?.as_deref(), Some("b"));
            Ok::<_, RepositoryError>(())
        })?;

        Ok(())
    }

    #[test]
    fn test_property_added_later_reads_absent_in_earlier_version() -> Result<()> {
        let repository = Repository::open(RepositoryConfig::default())?;
        let id = create_feed(&repository)?;

        let mut access = repository.access();
        access.commit(|session| {
            let feed = FeedProvider.find_by_id(session, id)?.expect("feed exists");
            feed.object().set_property("owner", "ops")?;
            Ok::<_, RepositoryError>(())
        })?;

        access.read(|session| {
            let versions = VersionService::new(session);
            let v1: Feed = versions.materialize_at(id, &label("1.0"))?;
            let v2: Feed = versions.materialize_at(id, &label("1.1"))?;
            assert_eq!(v1.property::<String>("owner")?, None);
            assert_eq!(v2.property::<String>("owner")?.as_deref(), Some("ops"));
            Ok::<_, RepositoryError>(())
        })?;
        Ok(())
    }

    #[test]
    fn test_diff_replays_onto_earlier_state() -> Result<()> {
        let repository = Repository::open(RepositoryConfig::default())?;
        let id = create_feed(&repository)?;

        let mut access = repository.access();
        access.commit(|session| {
            let feed = FeedProvider.find_by_id(session, id)?.expect("feed exists");
            feed.object().set_property("prop1", "b")?;
            feed.object().set_property("size", 3)?;
            Ok::<_, RepositoryError>(())
        })?;

        access.read(|session| {
            let versions = VersionService::new(session);
            let diff = versions.diff(id, &label("1.0"), &label("1.1"))?;
            let change = diff.get("prop1").expect("prop1 changed");
            assert_eq!(change.old, Some(PropertyValue::from("a")));
            assert_eq!(change.new, Some(PropertyValue::from("b")));
            assert_eq!(diff.get("size").and_then(|c| c.old.clone()), None);

            let v1 = versions.version(id, &label("1.0"))?;
            let v2 = versions.version(id, &label("1.1"))?;
            assert_eq!(diff.apply_to(&v1.state.properties), v2.state.properties);
            Ok::<_, RepositoryError>(())
        })?;
        Ok(())
    }

    #[test]
    fn test_milestone_increments_major_version() -> Result<()> {
        let repository = Repository::open(RepositoryConfig::default())?;
        let id = create_feed(&repository)?;

        let mut access = repository.access();
        access.commit(|session| {
            session.mark_milestone(id)?;
            Ok::<_, RepositoryError>(())
        })?;
        set_prop1(&repository, id, "c")?;

        access.read(|session| {
            assert_eq!(
                VersionService::new(session).versions_of(id),
                vec![VersionLabel::Root, label("1.0"), label("2.0"), label("2.1")]
            );
            Ok::<_, RepositoryError>(())
        })?;
        Ok(())
    }

    #[test]
    fn test_read_units_of_work_create_no_versions() -> Result<()> {
        let repository = Repository::open(RepositoryConfig::default())?;
        let id = create_feed(&repository)?;
        let revision = repository.revision();

        let mut access = repository.access();
        access.read(|session| {
            FeedProvider.find_all(session)?;
            Ok::<_, RepositoryError>(())
        })?;

        assert_eq!(repository.revision(), revision);
        access.read(|session| {
            assert_eq!(VersionService::new(session).versions_of(id).len(), 2);
            Ok::<_, RepositoryError>(())
        })?;
        Ok(())
    }

    #[test]
    fn test_unknown_version_label_faults() -> Result<()> {
        let repository = Repository::open(RepositoryConfig::default())?;
        let id = create_feed(&repository)?;

        let mut access = repository.access();
        let result = access.read(|session| {
            VersionService::new(session)
                .materialize_at::<Feed>(id, &label("9.0"))
                .map(|_| ())
        });
        assert!(matches!(result, Err(RepositoryError::Store(_))));
        Ok(())
    }

    #[test]
    fn test_delete_tombstones_and_keeps_history() -> Result<()> {
        let repository = Repository::open(RepositoryConfig::default())?;
        let id = create_feed(&repository)?;

        let mut access = repository.access();
        access.commit(|session| {
            FeedProvider.delete_by_id(session, id)?;
            // deleting again is a no-op
            FeedProvider.delete_by_id(session, id)?;
            Ok::<_, RepositoryError>(())
        })?;

        access.read(|session| {
            assert!(FeedProvider.find_by_id(session, id)?.is_none());
            assert!(session.resolve_str("/metadata/categories/c1/feeds/f1")?.is_none());
            assert!(FeedProvider.find_all(session)?.is_empty());

            let versions = VersionService::new(session);
            assert_eq!(versions.versions_of(id).len(), 3);
            let last: Feed = versions.materialize_at(id, &label("1.1"))?;
            assert_eq!(last.property::<String>("prop1")?.as_deref(), Some("a"));

            let category = CategoryProvider.find_by_name(session, "c1")?.expect("category kept");
            assert!(category.feeds()?.is_empty());
            Ok::<_, RepositoryError>(())
        })?;

        // A feed of the same name gets a new identity
        let recreated = create_feed(&repository)?;
        assert_ne!(recreated, id);
        Ok(())
    }

    #[test]
    fn test_past_versions_show_structure_as_committed() -> Result<()> {
        let repository = Repository::open(RepositoryConfig::default())?;
        let id = create_feed(&repository)?;

        let mut access = repository.access();
        let (category_id, source_id) = access.commit(|session| {
            let feed = FeedProvider.find_by_id(session, id)?.expect("feed exists");
            let hive =
                DatasourceProvider.ensure_hive_table_datasource(session, "orders", "sales", "orders")?;
            let source = FeedProvider.ensure_feed_source(session, &feed, &hive.as_datasource())?;
            FeedProvider.ensure_feed_by_name(session, "c1", "f2")?;
            let category = CategoryProvider.find_by_name(session, "c1")?.expect("category exists");
            Ok::<_, RepositoryError>((category.id(), source.id()))
        })?;
        set_prop1(&repository, id, "b")?;

        access.read(|session| {
            let versions = VersionService::new(session);

            let live = FeedProvider.find_by_id(session, id)?.expect("feed exists");
            assert_eq!(live.sources()?.len(), 1);
            let past: Feed = versions.materialize_at(id, &label("1.0"))?;
            assert!(past.sources()?.is_empty());

            let category: Category = versions.materialize_at(category_id, &label("1.0"))?;
            let feeds = category.feeds()?;
            assert_eq!(feeds.len(), 1);
            assert_eq!(feeds[0].id(), id);
            assert_eq!(feeds[0].property::<String>("prop1")?.as_deref(), Some("a"));
            assert!(feeds[0].object().set_property("prop1", "c").is_err());

            // walking up from a past source reaches the feed as it was then
            let source: FeedSource = versions.materialize_at(source_id, &label("1.0"))?;
            let feed = source.feed()?.expect("feed existed");
            assert_eq!(feed.property::<String>("prop1")?.as_deref(), Some("a"));
            assert_eq!(source.datasource()?.expect("datasource existed").name()?, "orders");
            Ok::<_, RepositoryError>(())
        })?;
        Ok(())
    }
}
