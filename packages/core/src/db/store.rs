//! Node Store
//!
//! Owns the committed [`Snapshot`] and applies commits to it.
//!
//! # Commit protocol
//!
//! Commits are serialised by a mutex; reads never take it.
//!
//! 1. Every touched node's base revision is compared with the committed one.
//!    A mismatch means another transaction committed that node first and the
//!    whole commit fails with [`StoreError::ConcurrentModification`].
//! 2. The next snapshot is derived from the current one: touched nodes get a
//!    new revision and each of them gets a new version appended.
//! 3. If persistence is configured the next snapshot is written to disk. A
//!    failed write fails the commit and leaves the committed state unchanged.
//! 4. The new snapshot is swapped in and events are published.
//!
//! Commits touching disjoint sets of nodes never conflict, even when they
//! were started from the same snapshot.

use crate::behaviors::NodeTypeRegistry;
use crate::config::RepositoryConfig;
use crate::db::events::EventBus;
use crate::db::session::{PendingChanges, SessionSettings};
use crate::db::{EventSink, MetadataEvent, Session, SessionMode, Snapshot, StoreError, StoreMetrics};
use crate::models::{FrozenNode, NodeId, VersionHistory, VersionLabel};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Outcome of a successful commit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitSummary {
    /// Snapshot revision produced by the commit
    pub revision: u64,
    /// Version created for every touched node
    pub versions: Vec<(NodeId, VersionLabel)>,
}

impl CommitSummary {
    pub fn version_of(&self, id: NodeId) -> Option<VersionLabel> {
        self.versions
            .iter()
            .find(|(node_id, _)| *node_id == id)
            .map(|(_, label)| *label)
    }
}

pub struct NodeStore {
    committed: RwLock<Arc<Snapshot>>,
    commit_lock: Mutex<()>,
    registry: Arc<NodeTypeRegistry>,
    metrics: Arc<StoreMetrics>,
    events: EventBus,
    config: RepositoryConfig,
}

impl NodeStore {
    /// Open a store, loading the persisted snapshot if one exists
    pub fn open(config: RepositoryConfig, registry: Arc<NodeTypeRegistry>) -> Result<Self, StoreError> {
        let snapshot = match &config.storage_path {
            Some(path) => match Snapshot::load(path)? {
                Some(snapshot) => {
                    tracing::info!(
                        path = %path.display(),
                        revision = snapshot.revision(),
                        nodes = snapshot.node_count(),
                        "Loaded repository"
                    );
                    snapshot
                }
                None => Snapshot::new(),
            },
            None => Snapshot::new(),
        };

        Ok(Self {
            committed: RwLock::new(Arc::new(snapshot)),
            commit_lock: Mutex::new(()),
            registry,
            metrics: Arc::new(StoreMetrics::default()),
            events: EventBus::new(config.event_channel_capacity),
            config,
        })
    }

    /// Current committed snapshot
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.committed.read().clone()
    }

    pub fn registry(&self) -> &Arc<NodeTypeRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<StoreMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// Open a session on the current snapshot
    pub fn session(&self, mode: SessionMode) -> Session {
        Session::new(
            mode,
            self.snapshot(),
            self.registry.clone(),
            self.metrics.clone(),
            SessionSettings {
                strict_paths: self.config.strict_paths,
                max_page_size: self.config.max_page_size,
            },
        )
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MetadataEvent> {
        self.events.subscribe()
    }

    pub fn add_event_sink(&self, sink: Arc<dyn EventSink>) {
        self.events.add_sink(sink);
    }

    /// Apply pending changes and publish the resulting events
    pub(crate) fn commit(&self, changes: PendingChanges) -> Result<CommitSummary, StoreError> {
        if changes.is_empty() {
            return Ok(CommitSummary {
                revision: self.snapshot().revision(),
                versions: Vec::new(),
            });
        }

        // Events go out before the next commit can apply, so they arrive in revision order
        let _guard = self.commit_lock.lock();
        let (summary, events) = self.apply(changes)?;
        self.metrics.record_commit();
        tracing::info!(
            revision = summary.revision,
            touched = summary.versions.len(),
            "Committed transaction"
        );
        self.events.publish(events);
        Ok(summary)
    }

    /// Validate and install pending changes, the caller holds `commit_lock`
    fn apply(&self, changes: PendingChanges) -> Result<(CommitSummary, Vec<MetadataEvent>), StoreError> {
        let current = self.snapshot();

        for id in &changes.touched {
            let expected = changes.base_revisions.get(id).copied().flatten();
            let actual = current.get(id).map(|n| n.revision);
            if expected != actual {
                self.metrics.record_conflict();
                tracing::warn!(
                    node_id = %id,
                    expected = ?expected,
                    actual = ?actual,
                    "Commit rejected: concurrent modification"
                );
                return Err(StoreError::concurrent_modification(
                    *id,
                    expected.unwrap_or(0),
                    actual.unwrap_or(0),
                ));
            }
        }

        let now = Utc::now();
        let mut next = current.as_ref().clone();
        next.revision += 1;

        let mut applied = Vec::with_capacity(changes.touched.len());
        for id in &changes.touched {
            let Some(node) = changes.nodes.get(id) else {
                continue;
            };
            let mut node = node.clone();
            let previous = current.get(id).map(|n| n.revision);
            node.revision = previous.map_or(1, |r| r + 1);
            node.modified_at = now;
            applied.push((node.id, previous.is_none()));
            next.put(node);
        }

        // Paths are captured once every touched node is in place
        let mut versions = Vec::with_capacity(applied.len());
        let mut events = Vec::with_capacity(applied.len());
        for (id, created) in applied {
            let Some(node) = next.get(&id).cloned() else {
                continue;
            };
            let path = next
                .path_of(id)
                .map(|p| p.to_string())
                .unwrap_or_default();
            let mut history = next
                .history(&id)
                .map(|h| h.as_ref().clone())
                .unwrap_or_else(|| VersionHistory::new(id));
            let label = history.append(
                FrozenNode::capture(&node, path.clone()),
                changes.milestones.contains(&id),
                now,
                next.revision,
            );
            next.histories.insert(id, Arc::new(history));
            versions.push((id, label));

            let node_type = node.node_type.clone();
            let revision = next.revision;
            events.push(if node.removed {
                MetadataEvent::NodeRemoved {
                    id,
                    path,
                    node_type,
                    revision,
                }
            } else if created {
                MetadataEvent::NodeCreated {
                    id,
                    path,
                    node_type,
                    version: label,
                    revision,
                }
            } else {
                MetadataEvent::NodeUpdated {
                    id,
                    path,
                    node_type,
                    version: label,
                    revision,
                }
            });
        }

        if let Some(path) = &self.config.storage_path {
            next.save(path)?;
        }

        let revision = next.revision();
        *self.committed.write() = Arc::new(next);
        Ok((CommitSummary { revision, versions }, events))
    }
}
