//! Node store layer
//!
//! - [`NodeStore`]: committed state, commit protocol, persistence
//! - [`Session`]: per-transaction view with buffered mutations
//! - [`MetadataAccess`]: transaction coordinator handing out sessions
//! - [`MetadataEvent`]: post-commit notifications

mod access;
mod error;
mod events;
mod metrics;
mod session;
mod snapshot;
mod store;

pub use access::{ActiveTransaction, MetadataAccess, TransactionState};
pub use error::StoreError;
pub use events::{EventSink, MetadataEvent, EVENT_CHANNEL_CAPACITY};
pub use metrics::{MetricsSnapshot, StoreMetrics};
pub use session::{Session, SessionMode};
pub use snapshot::Snapshot;
pub use store::{CommitSummary, NodeStore};
