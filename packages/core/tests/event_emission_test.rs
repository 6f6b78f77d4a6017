//! Event Emission Tests
//!
//! Verifies that commits publish exactly one event per touched node, that
//! events are only published after a successful commit, and that failing
//! sinks never fail the commit.

#[cfg(test)]
mod event_emission_tests {
    use anyhow::Result;
    use metastore_core::db::{EventSink, MetadataEvent, StoreError};
    use metastore_core::mapper::Entity;
    use metastore_core::models::{NodeId, PropertyUpdates, VersionLabel};
    use metastore_core::services::{EntityProvider, FeedProvider, RepositoryError};
    use metastore_core::{Repository, RepositoryConfig};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::thread;
    use tokio::sync::broadcast::error::TryRecvError;
    use tokio::time::{timeout, Duration};

    #[derive(Default)]
    struct CollectingSink {
        events: Mutex<Vec<MetadataEvent>>,
    }

    impl EventSink for CollectingSink {
        fn deliver(&self, event: &MetadataEvent) -> anyhow::Result<()> {
            self.events.lock().push(event.clone());
            Ok(())
        }
    }

    struct UnavailableSink;

    impl EventSink for UnavailableSink {
        fn deliver(&self, _event: &MetadataEvent) -> anyhow::Result<()> {
            anyhow::bail!("sink unavailable")
        }
    }

    #[tokio::test]
    async fn test_commit_emits_node_created_events() -> Result<()> {
        let repository = Repository::open(RepositoryConfig::default())?;
        let mut rx = repository.subscribe_to_events();

        let mut access = repository.access();
        let feed_id = access.commit(|session| {
            let feed = FeedProvider.ensure_feed_by_name(session, "c1", "f1")?;
            Ok::<_, RepositoryError>(feed.id())
        })?;

        let mut created = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(event) => created.push(event),
                Err(TryRecvError::Empty) => break,
                Err(e) => panic!("unexpected channel state: {:?}", e),
            }
        }

        let feed_event = created
            .iter()
            .find(|event| event.node_id() == feed_id)
            .expect("feed creation should be published");
        match feed_event {
            MetadataEvent::NodeCreated {
                path,
                node_type,
                version,
                ..
            } => {
                assert_eq!(path, "/metadata/categories/c1/feeds/f1");
                assert_eq!(node_type, "tba:feed");
                assert_eq!(*version, VersionLabel::new(1, 0));
            }
            other => panic!("Expected NodeCreated event, got {:?}", other),
        }

        // root node gained a child, so it is updated rather than created
        assert!(created
            .iter()
            .any(|event| event.event_type() == "node:updated"));
        Ok(())
    }

    #[tokio::test]
    async fn test_update_and_remove_events() -> Result<()> {
        let repository = Repository::open(RepositoryConfig::default())?;
        let mut access = repository.access();
        let feed_id = access.commit(|session| {
            let feed = FeedProvider.ensure_feed_by_name(session, "c1", "f1")?;
            Ok::<_, RepositoryError>(feed.id())
        })?;

        let mut rx = repository.subscribe_to_events();
        access.commit(|session| {
            session.set_properties(
                feed_id,
                &PropertyUpdates::new().set("prop1", "b"),
            )?;
            Ok::<_, StoreError>(())
        })?;

        let event = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("Event should be emitted within 1 second")
            .expect("Should receive event");
        assert_eq!(
            event,
            MetadataEvent::NodeUpdated {
                id: feed_id,
                path: "/metadata/categories/c1/feeds/f1".to_string(),
                node_type: "tba:feed".to_string(),
                version: VersionLabel::new(1, 1),
                revision: 2,
            }
        );

        access.commit(|session| {
            FeedProvider.delete_by_id(session, feed_id)?;
            Ok::<_, RepositoryError>(())
        })?;

        let mut removed = Vec::new();
        while let Ok(Ok(event)) = timeout(Duration::from_millis(100), rx.recv()).await {
            if let MetadataEvent::NodeRemoved { id, .. } = event {
                removed.push(id);
            }
        }
        // the feed and its sources folder
        assert_eq!(removed.len(), 2);
        assert!(removed.contains(&feed_id));
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_commit_emits_nothing() -> Result<()> {
        let repository = Repository::open(RepositoryConfig::default())?;
        let mut rx = repository.subscribe_to_events();

        let mut access = repository.access();
        let result = access.commit(|session| {
            FeedProvider.ensure_feed_by_name(session, "c1", "f1")?;
            Err::<(), _>(RepositoryError::Configuration("abort".into()))
        });
        assert!(result.is_err());

        let received = timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(received.is_err(), "no event should be published");
        Ok(())
    }

    #[test]
    fn test_sinks_receive_events_and_failures_are_ignored() -> Result<()> {
        let repository = Repository::open(RepositoryConfig::default())?;
        let sink = Arc::new(CollectingSink::default());
        repository.add_event_sink(Arc::new(UnavailableSink));
        repository.add_event_sink(sink.clone());

        let mut access = repository.access();
        let feed_id = access.commit(|session| {
            let feed = FeedProvider.ensure_feed_by_name(session, "c1", "f1")?;
            Ok::<_, RepositoryError>(feed.id())
        })?;

        let events = sink.events.lock();
        assert!(events.iter().any(|event| event.node_id() == feed_id));
        assert_eq!(repository.metrics().commits, 1);
        Ok(())
    }

    #[test]
    fn test_concurrent_commits_publish_in_revision_order() -> Result<()> {
        let repository = Repository::open(RepositoryConfig::default())?;
        let mut access = repository.access();
        let ids = access.commit(|session| {
            (0..4)
                .map(|i| -> Result<NodeId, RepositoryError> {
                    Ok(FeedProvider.ensure_feed_by_name(session, "c1", &format!("f{}", i))?.id())
                })
                .collect::<Result<Vec<_>, RepositoryError>>()
        })?;

        let sink = Arc::new(CollectingSink::default());
        repository.add_event_sink(sink.clone());

        let handles: Vec<_> = ids
            .into_iter()
            .map(|id| {
                let repository = repository.clone();
                thread::spawn(move || -> Result<(), StoreError> {
                    let mut access = repository.access();
                    for n in 0..25 {
                        access.commit(|session| {
                            session.set_properties(id, &PropertyUpdates::new().set("run", n))?;
                            Ok::<_, StoreError>(())
                        })?;
                    }
                    Ok(())
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread panicked")?;
        }

        let revisions: Vec<u64> = sink.events.lock().iter().map(|e| e.revision()).collect();
        assert_eq!(revisions.len(), 100);
        assert!(revisions.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(revisions.last().copied(), Some(repository.revision()));
        Ok(())
    }

    #[test]
    fn test_events_serialize_with_type_tag() {
        let event = MetadataEvent::NodeRemoved {
            id: NodeId::new(),
            path: "/a".to_string(),
            node_type: "nt:folder".to_string(),
            revision: 4,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "nodeRemoved");
        assert_eq!(json["nodeType"], "nt:folder");
        assert_eq!(json["revision"], 4);

        let round_trip: MetadataEvent = serde_json::from_value(json).unwrap();
        assert_eq!(round_trip, event);
    }

    #[test]
    fn test_commit_without_subscribers() {
        tokio_test::block_on(async {
            let repository = Repository::open(RepositoryConfig::default()).unwrap();
            let mut access = repository.access();
            let result = access.commit(|session| {
                FeedProvider.ensure_feed_by_name(session, "c1", "f1")?;
                Ok::<_, RepositoryError>(())
            });
            assert!(result.is_ok());
        });
    }
}
