//! Data Models
//!
//! This module contains the core data structures used throughout the repository:
//!
//! - `Node` - Universal node model: identity, type tag, properties, children
//! - `NodePath` - Slash-separated location of a node in the tree
//! - `PropertyValue` - Typed property values with coercing reads
//! - `VersionHistory` - Immutable per-node snapshots with dotted labels
//! - Domain entities (`Category`, `Feed`, `Datasource`, `JobExecution`) built
//!   on the entity mapper

mod category;
mod datasource;
mod feed;
mod job_execution;
mod node;
mod path;
mod property;
mod version;

pub use category::{Category, CATEGORIES_PATH, CATEGORY_NODE_TYPE, FEEDS_FOLDER};
pub use datasource::{
    Datasource, HiveTableDatasource, DATASOURCES_PATH, DATASOURCE_NODE_TYPE,
    HIVE_TABLE_DATASOURCE_NODE_TYPE,
};
pub use feed::{
    is_user_property, Feed, FeedSource, FeedState, FEED_NODE_TYPE, FEED_SOURCE_NODE_TYPE,
    SOURCES_FOLDER,
};
pub use job_execution::{
    job_property, JobExecution, JobExecutionArgs, JobStatus, JOBS_PATH, JOB_EXECUTION_NODE_TYPE,
};
pub use node::{Node, NodeId, ValidationError, FOLDER_NODE_TYPE, ROOT_NODE_TYPE};
pub use path::NodePath;
pub use property::{FromProperty, PropertyType, PropertyUpdates, PropertyValue};
pub use version::{FrozenNode, PropertyChange, PropertyDiff, Version, VersionHistory, VersionLabel};
