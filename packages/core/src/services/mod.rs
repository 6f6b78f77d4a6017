//! Business Services
//!
//! This module contains the services built on top of the node store and the
//! entity mapper:
//!
//! - [`EntityProvider`] - Generic CRUD facade shared by every provider
//! - `CategoryProvider`, `FeedProvider`, `DatasourceProvider`,
//!   `JobExecutionProvider` - Concrete providers for the metadata domain
//! - [`QueryService`] - Structured queries, access plans and grouped counts
//! - [`VersionService`] - Version history, materialization and diffs
//!
//! Every service takes the [`Session`](crate::db::Session) of the running
//! unit of work as an explicit argument.

pub mod category_provider;
pub mod datasource_provider;
pub mod error;
pub mod feed_provider;
pub mod job_execution_provider;
pub mod provider;
pub mod query_service;
pub mod tree_printer;
pub mod versioning;

pub use category_provider::CategoryProvider;
pub use datasource_provider::DatasourceProvider;
pub use error::{QueryError, RepositoryError};
pub use feed_provider::FeedProvider;
pub use job_execution_provider::{JobExecutionProvider, JobStatusCount};
pub use provider::{EntityProvider, Page, PageRequest, DEFAULT_PAGE_SIZE};
pub use query_service::{
    parse_filter, AccessPath, EntityResults, FieldRef, FilterAliases, FilterOperator,
    FilterValue, GroupKey, GroupValue, JoinClause, JoinPlan, PathScope, QueryDefinition,
    QueryFilter, QueryPlan, QueryResults, QueryService, SortConfig, SortDirection,
};
pub use tree_printer::print_subgraph;
pub use versioning::VersionService;
