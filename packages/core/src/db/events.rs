//! Metadata Events
//!
//! Events published by the node store after a commit has been applied. They
//! describe what changed, never how the change was made, so subscribers stay
//! decoupled from the storage layer.
//!
//! # Event Flow
//!
//! 1. A unit of work commits through [`MetadataAccess`](crate::db::MetadataAccess)
//! 2. The store swaps in the new snapshot and records versions
//! 3. The same events are offered to every registered [`EventSink`]
//! 4. One event per touched node is sent on a tokio broadcast channel
//!
//! Publishing is fire-and-forget: a missing subscriber or a failing sink never
//! fails the commit. Events are published before the next commit is applied,
//! so every sink and subscriber sees them in revision order.

use crate::models::{NodeId, VersionLabel};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Default capacity of the broadcast channel
pub const EVENT_CHANNEL_CAPACITY: usize = 128;

/// State-change events emitted after a successful commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MetadataEvent {
    /// A node was created
    #[serde(rename_all = "camelCase")]
    NodeCreated {
        id: NodeId,
        path: String,
        node_type: String,
        version: VersionLabel,
        revision: u64,
    },

    /// Properties or structure of an existing node changed
    #[serde(rename_all = "camelCase")]
    NodeUpdated {
        id: NodeId,
        path: String,
        node_type: String,
        version: VersionLabel,
        revision: u64,
    },

    /// A node was removed (tombstoned)
    #[serde(rename_all = "camelCase")]
    NodeRemoved {
        id: NodeId,
        path: String,
        node_type: String,
        revision: u64,
    },
}

impl MetadataEvent {
    /// Get a string representation of the event type
    pub fn event_type(&self) -> &str {
        match self {
            MetadataEvent::NodeCreated { .. } => "node:created",
            MetadataEvent::NodeUpdated { .. } => "node:updated",
            MetadataEvent::NodeRemoved { .. } => "node:removed",
        }
    }

    pub fn node_id(&self) -> NodeId {
        match self {
            MetadataEvent::NodeCreated { id, .. }
            | MetadataEvent::NodeUpdated { id, .. }
            | MetadataEvent::NodeRemoved { id, .. } => *id,
        }
    }

    /// Repository revision produced by the commit that emitted this event
    pub fn revision(&self) -> u64 {
        match self {
            MetadataEvent::NodeCreated { revision, .. }
            | MetadataEvent::NodeUpdated { revision, .. }
            | MetadataEvent::NodeRemoved { revision, .. } => *revision,
        }
    }
}

/// External notification target for committed changes
///
/// Implementations must not block and must not commit to the repository that
/// delivers to them, since delivery happens while commits are serialised.
/// Errors are logged and dropped.
pub trait EventSink: Send + Sync {
    fn deliver(&self, event: &MetadataEvent) -> anyhow::Result<()>;
}

/// Broadcast channel plus registered sinks
pub(crate) struct EventBus {
    sender: broadcast::Sender<MetadataEvent>,
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
}

impl EventBus {
    pub(crate) fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            sinks: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<MetadataEvent> {
        self.sender.subscribe()
    }

    pub(crate) fn add_sink(&self, sink: Arc<dyn EventSink>) {
        self.sinks.write().push(sink);
    }

    pub(crate) fn publish(&self, events: Vec<MetadataEvent>) {
        let sinks = self.sinks.read().clone();
        for event in events {
            for sink in &sinks {
                if let Err(e) = sink.deliver(&event) {
                    tracing::warn!(
                        event_type = event.event_type(),
                        node_id = %event.node_id(),
                        "Event sink failed: {}",
                        e
                    );
                }
            }
            // No subscribers is not an error
            let _ = self.sender.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recording(Mutex<Vec<String>>);

    impl EventSink for Recording {
        fn deliver(&self, event: &MetadataEvent) -> anyhow::Result<()> {
            self.0.lock().push(event.event_type().to_string());
            Ok(())
        }
    }

    struct Unavailable;

    impl EventSink for Unavailable {
        fn deliver(&self, _event: &MetadataEvent) -> anyhow::Result<()> {
            anyhow::bail!("sink offline")
        }
    }

    fn removed() -> MetadataEvent {
        MetadataEvent::NodeRemoved {
            id: NodeId::new(),
            path: "/metadata/categories/c1".to_string(),
            node_type: "tba:category".to_string(),
            revision: 3,
        }
    }

    #[test]
    fn test_failing_sink_does_not_stop_delivery() {
        let bus = EventBus::new(EVENT_CHANNEL_CAPACITY);
        let recording = Arc::new(Recording(Mutex::new(Vec::new())));
        bus.add_sink(Arc::new(Unavailable));
        bus.add_sink(recording.clone());
        let mut rx = bus.subscribe();

        bus.publish(vec![removed()]);

        assert_eq!(*recording.0.lock(), vec!["node:removed".to_string()]);
        assert_eq!(rx.try_recv().unwrap().event_type(), "node:removed");
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(1);
        bus.publish(vec![removed(), removed()]);
    }

    #[test]
    fn test_event_serialization_contract() {
        let event = MetadataEvent::NodeCreated {
            id: NodeId::new(),
            path: "/metadata".to_string(),
            node_type: "nt:folder".to_string(),
            version: VersionLabel::new(1, 0),
            revision: 1,
        };
        let parsed = serde_json::to_value(&event).unwrap();
        assert_eq!(parsed.get("type").unwrap(), "nodeCreated");
        assert_eq!(parsed.get("nodeType").unwrap(), "nt:folder");
        assert_eq!(parsed.get("version").unwrap(), "1.0");
    }
}
