//! Generic Provider Base
//!
//! [`EntityProvider`] is the CRUD facade shared by every concrete provider.
//! A provider names its entity type and inherits find/create/delete, query
//! and paging operations built on the node store, the entity mapper and the
//! query service. Every operation takes the session of the running unit of
//! work explicitly and reports failures as [`RepositoryError`].
//!
//! # Examples
//!
//! ```rust
//! use metastore_core::mapper::Entity;
//! use metastore_core::models::PropertyUpdates;
//! use metastore_core::services::{CategoryProvider, EntityProvider, RepositoryError};
//! use metastore_core::{Repository, RepositoryConfig};
//!
//! # fn main() -> anyhow::Result<()> {
//! let repository = Repository::open(RepositoryConfig::default())?;
//! let mut access = repository.access();
//!
//! let id = access.commit(|session| {
//!     let updates = PropertyUpdates::new().set("tba:title", "Sales");
//!     let category = CategoryProvider.find_or_create_entity(session, "/", "metadata/categories/sales", &updates)?;
//!     Ok::<_, RepositoryError>(category.id())
//! })?;
//!
//! access.read(|session| {
//!     let category = CategoryProvider.find_by_id(session, id)?.expect("committed");
//!     assert_eq!(category.title()?.as_deref(), Some("Sales"));
//!     Ok::<_, RepositoryError>(())
//! })?;
//! # Ok(())
//! # }
//! ```

use crate::db::Session;
use crate::mapper::{find_projection, project, Entity};
use crate::models::{Node, NodeId, PropertyUpdates};
use crate::services::query_service::{
    parse_filter, FilterAliases, QueryDefinition, QueryService, SortConfig,
};
use crate::services::RepositoryError;
use serde::{Deserialize, Serialize};

/// Default page size when a request does not specify one
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Page of a paged query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    pub offset: usize,
    pub limit: usize,
    /// Ordering applied before slicing, replaces the query's own ordering
    #[serde(default)]
    pub sort: Vec<SortConfig>,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: DEFAULT_PAGE_SIZE,
            sort: Vec::new(),
        }
    }
}

impl PageRequest {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self {
            offset,
            limit,
            sort: Vec::new(),
        }
    }

    pub fn sorted_by(mut self, sort: SortConfig) -> Self {
        self.sort.push(sort);
        self
    }
}

/// One page of results plus the total of the unpaged query
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Number of matches ignoring paging, taken in the same session
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

impl<T> Page<T> {
    pub fn has_next(&self) -> bool {
        self.offset + self.items.len() < self.total
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            offset: self.offset,
            limit: self.limit,
        }
    }
}

/// CRUD facade over one entity type
pub trait EntityProvider {
    type Entity<'s>: Entity<'s>;

    /// Node type managed by this provider
    fn node_type(&self) -> &'static str {
        <Self::Entity<'static> as Entity<'static>>::NODE_TYPE
    }

    /// Constructor arguments for entities built by this provider
    fn entity_args<'s>(&self) -> <Self::Entity<'s> as Entity<'s>>::Args {
        Default::default()
    }

    /// Field aliases understood by filter strings
    fn filter_aliases(&self) -> FilterAliases {
        FilterAliases::new().alias("name", "@name")
    }

    /// Query over every entity of this provider's type
    fn query(&self) -> QueryDefinition {
        QueryDefinition::of_type(self.node_type())
    }

    /// Find an entity by identifier, `None` if it does not exist
    fn find_by_id<'s>(
        &self,
        session: &'s Session,
        id: NodeId,
    ) -> Result<Option<Self::Entity<'s>>, RepositoryError> {
        Ok(find_projection(session, id, self.entity_args())?)
    }

    fn find_all<'s>(&self, session: &'s Session) -> Result<Vec<Self::Entity<'s>>, RepositoryError> {
        self.find(session, &self.query())
    }

    /// Resolve `parent_path/relative_path`, creating it if absent, and apply
    /// `properties`
    ///
    /// Repeating the call with the same arguments returns the same entity and
    /// leaves it unchanged.
    fn find_or_create_entity<'s>(
        &self,
        session: &'s Session,
        parent_path: &str,
        relative_path: &str,
        properties: &PropertyUpdates,
    ) -> Result<Self::Entity<'s>, RepositoryError> {
        let node = session.find_or_create_at(parent_path, relative_path, self.node_type())?;
        session.set_properties(node.id, properties)?;
        Ok(project(session, &node, self.entity_args())?)
    }

    /// Make sure the entity is part of the next commit
    fn create<'s>(&self, session: &'s Session, entity: &Self::Entity<'s>) -> Result<(), RepositoryError> {
        session.ensure_pending(entity.id())?;
        Ok(())
    }

    /// Make sure the entity's changes are part of the next commit
    fn update<'s>(&self, session: &'s Session, entity: &Self::Entity<'s>) -> Result<(), RepositoryError> {
        session.ensure_pending(entity.id())?;
        Ok(())
    }

    /// Tombstone the entity and its subtree
    fn delete<'s>(&self, session: &'s Session, entity: &Self::Entity<'s>) -> Result<(), RepositoryError> {
        if !<Self::Entity<'s> as Entity<'s>>::REMOVABLE {
            return Err(RepositoryError::unsupported("delete", self.node_type()));
        }
        session.remove(entity.id())?;
        Ok(())
    }

    /// Delete by identifier, no-op if the entity does not exist
    fn delete_by_id<'s>(&self, session: &'s Session, id: NodeId) -> Result<(), RepositoryError> {
        match self.find_by_id(session, id)? {
            Some(entity) => self.delete(session, &entity),
            None => Ok(()),
        }
    }

    fn find<'s>(
        &self,
        session: &'s Session,
        query: &QueryDefinition,
    ) -> Result<Vec<Self::Entity<'s>>, RepositoryError> {
        let results = QueryService::new(session).execute_entities_with(query, self.entity_args())?;
        Ok(results.collect::<Result<Vec<_>, _>>()?)
    }

    fn find_first<'s>(
        &self,
        session: &'s Session,
        query: &QueryDefinition,
    ) -> Result<Option<Self::Entity<'s>>, RepositoryError> {
        let mut results = QueryService::new(session)
            .execute_entities_with(&query.clone().limit(1), self.entity_args())?;
        Ok(results.next().transpose()?)
    }

    /// Raw nodes matching `query`
    fn find_nodes(&self, session: &Session, query: &QueryDefinition) -> Result<Vec<Node>, RepositoryError> {
        Ok(QueryService::new(session).execute(query)?.collect())
    }

    /// Log the access plan, then run the query
    fn find_with_explain_plan<'s>(
        &self,
        session: &'s Session,
        query: &QueryDefinition,
    ) -> Result<Vec<Self::Entity<'s>>, RepositoryError> {
        let plan = QueryService::new(session).explain(query)?;
        tracing::info!(node_type = self.node_type(), plan = %plan, "Query plan");
        self.find(session, query)
    }

    /// One page of `query`, clamped to the configured maximum page size
    fn find_page<'s>(
        &self,
        session: &'s Session,
        query: &QueryDefinition,
        page: &PageRequest,
    ) -> Result<Page<Self::Entity<'s>>, RepositoryError> {
        let limit = page.limit.min(session.max_page_size());
        let service = QueryService::new(session);
        let total = service.count(query)?;

        let mut paged = query.clone();
        if !page.sort.is_empty() {
            paged.sorting = page.sort.clone();
        }
        paged.offset = page.offset;
        paged.limit = Some(limit);
        let items = service
            .execute_entities_with(&paged, self.entity_args())?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page {
            items,
            total,
            offset: page.offset,
            limit,
        })
    }

    /// Page of entities matching a filter string
    fn find_filtered<'s>(
        &self,
        session: &'s Session,
        filter: &str,
        page: &PageRequest,
    ) -> Result<Page<Self::Entity<'s>>, RepositoryError> {
        let filters = parse_filter(filter, &self.filter_aliases())?;
        self.find_page(session, &self.query().filters(filters), page)
    }
}
