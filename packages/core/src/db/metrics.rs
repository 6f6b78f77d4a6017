//! Repository Metrics
//!
//! Lock-free counters for commits, conflicts, rollbacks and executed queries.
//! `explain` never touches the query counter, which makes it observable that a
//! plan was produced without running the query.
//!
//! # Usage
//!
//! ```rust
//! use metastore_core::db::StoreMetrics;
//!
//! let metrics = StoreMetrics::default();
//! metrics.record_query();
//! assert_eq!(metrics.snapshot().queries_executed, 1);
//! ```

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every session of a repository
#[derive(Debug, Default)]
pub struct StoreMetrics {
    commits: AtomicU64,
    conflicts: AtomicU64,
    rollbacks: AtomicU64,
    queries_executed: AtomicU64,
}

/// Point-in-time copy of [`StoreMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub commits: u64,
    pub conflicts: u64,
    pub rollbacks: u64,
    pub queries_executed: u64,
}

impl StoreMetrics {
    pub fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rollback(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_query(&self) {
        self.queries_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            commits: self.commits.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
            queries_executed: self.queries_executed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = StoreMetrics::default();
        metrics.record_commit();
        metrics.record_commit();
        metrics.record_conflict();
        metrics.record_rollback();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.commits, 2);
        assert_eq!(snapshot.conflicts, 1);
        assert_eq!(snapshot.rollbacks, 1);
        assert_eq!(snapshot.queries_executed, 0);
    }
}
