//! Query Service - Structured Queries over the Node Store
//!
//! This module evaluates [`QueryDefinition`]s against the state visible to one
//! session: the committed snapshot the session started from plus its own
//! pending changes. Results are lazy iterators of nodes, or of entities when
//! projected through the entity mapper.
//!
//! # Architecture
//!
//! - **Access plans**: every query is compiled to a [`QueryPlan`] that names a
//!   single access path (`IdLookup`, `PathTraversal`, `TypeIndex` or
//!   `FullScan`) plus the residual predicates evaluated per candidate
//! - **Explain**: [`QueryService::explain`] compiles without executing and
//!   leaves the executed-query counter untouched
//! - **Joins**: a join follows a reference property from each candidate to its
//!   target and keeps the candidate when the target matches the join filters
//! - **Bind variables**: filter values may name a variable that is looked up
//!   in [`QueryDefinition::bindings`] at compile time
//! - **Ordering**: unspecified unless the query sorts; sorting materializes the
//!   matches before offset and limit are applied
//!
//! # Examples
//!
//! ```rust
//! use metastore_core::models::FEED_NODE_TYPE;
//! use metastore_core::services::{QueryDefinition, QueryFilter, QueryService, RepositoryError};
//! use metastore_core::{Repository, RepositoryConfig};
//!
//! # fn main() -> anyhow::Result<()> {
//! let repository = Repository::open(RepositoryConfig::default())?;
//! let mut access = repository.access();
//!
//! let count = access.read(|session| {
//!     let query = QueryDefinition::of_type(FEED_NODE_TYPE)
//!         .descendants_of("/metadata/categories/c1")
//!         .filter(QueryFilter::starts_with("prop1", "a"));
//!
//!     let service = QueryService::new(session);
//!     println!("{}", service.explain(&query)?);
//!     Ok::<_, RepositoryError>(service.execute(&query)?.count())
//! })?;
//! assert_eq!(count, 0);
//! # Ok(())
//! # }
//! ```

mod filter_parser;

pub use filter_parser::{parse_filter, FilterAliases};

use crate::db::Session;
use crate::mapper::{project, Entity, MappingError};
use crate::models::{FromProperty, Node, NodeId, NodePath, PropertyValue};
use crate::services::error::QueryError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

fn default_true() -> bool {
    true
}

/// Structured query definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDefinition {
    /// Node type to match, `None` for every type
    #[serde(default)]
    pub target_type: Option<String>,
    /// Whether subtypes of `target_type` match too
    #[serde(default = "default_true")]
    pub include_subtypes: bool,
    /// Optional subtree restriction
    #[serde(default)]
    pub scope: Option<PathScope>,
    /// Conditions that must all hold
    #[serde(default)]
    pub filters: Vec<QueryFilter>,
    /// Optional condition on a referenced node
    #[serde(default)]
    pub join: Option<JoinClause>,
    #[serde(default)]
    pub sorting: Vec<SortConfig>,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub limit: Option<usize>,
    /// Values for bind variables referenced by filters
    #[serde(default)]
    pub bindings: BTreeMap<String, PropertyValue>,
}

impl Default for QueryDefinition {
    fn default() -> Self {
        Self {
            target_type: None,
            include_subtypes: true,
            scope: None,
            filters: Vec::new(),
            join: None,
            sorting: Vec::new(),
            offset: 0,
            limit: None,
            bindings: BTreeMap::new(),
        }
    }
}

impl QueryDefinition {
    /// Query over every node
    pub fn all() -> Self {
        Self::default()
    }

    /// Query over nodes of `node_type` and its subtypes
    pub fn of_type(node_type: impl Into<String>) -> Self {
        Self {
            target_type: Some(node_type.into()),
            ..Self::default()
        }
    }

    /// Match `target_type` only, not its subtypes
    pub fn exact_type(mut self) -> Self {
        self.include_subtypes = false;
        self
    }

    /// Restrict to direct children of `path`
    pub fn children_of(mut self, path: impl Into<String>) -> Self {
        self.scope = Some(PathScope::ChildrenOf(path.into()));
        self
    }

    /// Restrict to nodes anywhere below `path`
    pub fn descendants_of(mut self, path: impl Into<String>) -> Self {
        self.scope = Some(PathScope::DescendantsOf(path.into()));
        self
    }

    pub fn filter(mut self, filter: QueryFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn filters(mut self, filters: impl IntoIterator<Item = QueryFilter>) -> Self {
        self.filters.extend(filters);
        self
    }

    pub fn join(mut self, join: JoinClause) -> Self {
        self.join = Some(join);
        self
    }

    pub fn order_by(mut self, field: impl Into<FieldRef>, direction: SortDirection) -> Self {
        self.sorting.push(SortConfig {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Supply the value of bind variable `name`
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.bindings.insert(name.into(), value.into());
        self
    }

    /// Same predicate without ordering or paging
    pub fn unpaged(&self) -> Self {
        Self {
            sorting: Vec::new(),
            offset: 0,
            limit: None,
            ..self.clone()
        }
    }
}

/// Subtree restriction of a query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "path", rename_all = "camelCase")]
pub enum PathScope {
    ChildrenOf(String),
    DescendantsOf(String),
}

/// Node attribute a filter or sort refers to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "camelCase")]
pub enum FieldRef {
    Property(String),
    Name,
    Path,
    NodeType,
    Id,
    CreatedAt,
    ModifiedAt,
    Parent,
}

impl FieldRef {
    /// Parse a field name; `@name`, `@path`, `@type`, `@id`, `@created`,
    /// `@modified` and `@parent` address node metadata, anything else a property
    pub fn parse(field: &str) -> Self {
        match field {
            "@name" => Self::Name,
            "@path" => Self::Path,
            "@type" => Self::NodeType,
            "@id" => Self::Id,
            "@created" => Self::CreatedAt,
            "@modified" => Self::ModifiedAt,
            "@parent" => Self::Parent,
            other => Self::Property(other.to_string()),
        }
    }

    /// Current value of this field on `node`, `None` if absent
    pub fn value_of(&self, session: &Session, node: &Node) -> Option<PropertyValue> {
        match self {
            Self::Property(name) => node.properties.get(name).cloned(),
            Self::Name => Some(PropertyValue::String(node.name.clone())),
            Self::Path => session
                .path_of(node.id)
                .map(|p| PropertyValue::String(p.to_string())),
            Self::NodeType => Some(PropertyValue::String(node.node_type.clone())),
            Self::Id => Some(PropertyValue::Reference(node.id)),
            Self::CreatedAt => Some(PropertyValue::Date(node.created_at)),
            Self::ModifiedAt => Some(PropertyValue::Date(node.modified_at)),
            Self::Parent => node.parent.map(PropertyValue::Reference),
        }
    }
}

impl From<&str> for FieldRef {
    fn from(field: &str) -> Self {
        Self::parse(field)
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Property(name) => f.write_str(name),
            Self::Name => f.write_str("@name"),
            Self::Path => f.write_str("@path"),
            Self::NodeType => f.write_str("@type"),
            Self::Id => f.write_str("@id"),
            Self::CreatedAt => f.write_str("@created"),
            Self::ModifiedAt => f.write_str("@modified"),
            Self::Parent => f.write_str("@parent"),
        }
    }
}

/// Comparison operator for filters
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FilterOperator {
    Equals,
    NotEquals,
    #[serde(rename = "gt")]
    GreaterThan,
    #[serde(rename = "gte")]
    GreaterThanOrEqual,
    #[serde(rename = "lt")]
    LessThan,
    #[serde(rename = "lte")]
    LessThanOrEqual,
    Contains,
    StartsWith,
    EndsWith,
    In,
    Exists,
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Self::Equals => "=",
            Self::NotEquals => "!=",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqual => ">=",
            Self::LessThan => "<",
            Self::LessThanOrEqual => "<=",
            Self::Contains => "contains",
            Self::StartsWith => "starts_with",
            Self::EndsWith => "ends_with",
            Self::In => "in",
            Self::Exists => "exists",
        };
        f.write_str(symbol)
    }
}

/// Right-hand side of a filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum FilterValue {
    /// No operand (only meaningful for `exists`)
    #[default]
    Unset,
    Literal(PropertyValue),
    List(Vec<PropertyValue>),
    /// Name of a bind variable
    Bind(String),
}

/// Individual filter condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryFilter {
    pub field: FieldRef,
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: FilterValue,
    /// Case sensitivity for text comparisons
    #[serde(default = "default_true")]
    pub case_sensitive: bool,
}

impl QueryFilter {
    pub fn new(field: impl Into<FieldRef>, operator: FilterOperator, value: FilterValue) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
            case_sensitive: true,
        }
    }

    /// `field <operator> value`
    pub fn compare(
        field: impl Into<FieldRef>,
        operator: FilterOperator,
        value: impl Into<PropertyValue>,
    ) -> Self {
        Self::new(field, operator, FilterValue::Literal(value.into()))
    }

    pub fn equals(field: impl Into<FieldRef>, value: impl Into<PropertyValue>) -> Self {
        Self::compare(field, FilterOperator::Equals, value)
    }

    pub fn contains(field: impl Into<FieldRef>, text: impl Into<String>) -> Self {
        Self::compare(field, FilterOperator::Contains, text.into())
    }

    pub fn starts_with(field: impl Into<FieldRef>, prefix: impl Into<String>) -> Self {
        Self::compare(field, FilterOperator::StartsWith, prefix.into())
    }

    pub fn one_of(field: impl Into<FieldRef>, values: Vec<PropertyValue>) -> Self {
        Self::new(field, FilterOperator::In, FilterValue::List(values))
    }

    pub fn exists(field: impl Into<FieldRef>) -> Self {
        Self::new(field, FilterOperator::Exists, FilterValue::Unset)
    }

    pub fn missing(field: impl Into<FieldRef>) -> Self {
        Self::compare(field, FilterOperator::Exists, false)
    }

    /// `field <operator> :variable`
    pub fn bound(
        field: impl Into<FieldRef>,
        operator: FilterOperator,
        variable: impl Into<String>,
    ) -> Self {
        Self::new(field, operator, FilterValue::Bind(variable.into()))
    }

    /// Compare text case-insensitively
    pub fn ignore_case(mut self) -> Self {
        self.case_sensitive = false;
        self
    }
}

/// Condition on the node a reference property points to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinClause {
    pub reference_property: String,
    /// Required type of the target (subtypes included)
    #[serde(default)]
    pub target_type: Option<String>,
    #[serde(default)]
    pub filters: Vec<QueryFilter>,
}

impl JoinClause {
    pub fn new(reference_property: impl Into<String>) -> Self {
        Self {
            reference_property: reference_property.into(),
            target_type: None,
            filters: Vec::new(),
        }
    }

    pub fn target_type(mut self, node_type: impl Into<String>) -> Self {
        self.target_type = Some(node_type.into());
        self
    }

    pub fn filter(mut self, filter: QueryFilter) -> Self {
        self.filters.push(filter);
        self
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[serde(rename = "asc")]
    Ascending,
    #[serde(rename = "desc")]
    Descending,
}

/// Sorting configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortConfig {
    pub field: FieldRef,
    pub direction: SortDirection,
}

impl SortConfig {
    pub fn asc(field: impl Into<FieldRef>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Ascending,
        }
    }

    pub fn desc(field: impl Into<FieldRef>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Descending,
        }
    }
}

/// Strategy used to produce candidate nodes
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "strategy", rename_all = "camelCase")]
pub enum AccessPath {
    /// Single node by identifier
    IdLookup { id: NodeId },
    /// Children or descendants of a path
    PathTraversal { path: String, recursive: bool },
    /// Nodes of the listed types from the type index
    TypeIndex { node_types: Vec<String> },
    /// Every node in the repository
    FullScan,
}

impl fmt::Display for AccessPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IdLookup { id } => write!(f, "IdLookup({})", id),
            Self::PathTraversal { path, recursive } => write!(
                f,
                "PathTraversal({}, {})",
                path,
                if *recursive { "descendants" } else { "children" }
            ),
            Self::TypeIndex { node_types } => write!(f, "TypeIndex({})", node_types.join(", ")),
            Self::FullScan => f.write_str("FullScan"),
        }
    }
}

/// Join step of a plan
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPlan {
    pub reference_property: String,
    pub node_types: Option<Vec<String>>,
    pub filters: Vec<String>,
}

/// Access plan reported by `explain`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPlan {
    pub access: AccessPath,
    /// Type check applied to candidates when the access path does not imply it
    pub node_types: Option<Vec<String>>,
    /// Residual predicates, rendered
    pub filters: Vec<String>,
    pub join: Option<JoinPlan>,
    pub sorting: Vec<String>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl fmt::Display for QueryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.access)?;
        if let Some(types) = &self.node_types {
            write!(f, " -> TypeFilter({})", types.join(", "))?;
        }
        if !self.filters.is_empty() {
            write!(f, " -> Filter({})", self.filters.join(" AND "))?;
        }
        if let Some(join) = &self.join {
            write!(f, " -> Join({}", join.reference_property)?;
            if let Some(types) = &join.node_types {
                write!(f, " -> {}", types.join("|"))?;
            }
            if !join.filters.is_empty() {
                write!(f, " WHERE {}", join.filters.join(" AND "))?;
            }
            f.write_str(")")?;
        }
        if !self.sorting.is_empty() {
            write!(f, " -> Sort({})", self.sorting.join(", "))?;
        }
        if self.offset > 0 || self.limit.is_some() {
            write!(f, " -> Slice(offset {}", self.offset)?;
            if let Some(limit) = self.limit {
                write!(f, ", limit {}", limit)?;
            }
            f.write_str(")")?;
        }
        Ok(())
    }
}

/// Key of a grouped count
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupKey {
    /// Group by the value of a field
    Field(FieldRef),
    /// Group by the UTC day of a timestamp field
    Day(FieldRef),
}

/// One component of a group in [`QueryService::count_by`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum GroupValue {
    Absent,
    Text(String),
    Day(NaiveDate),
}

#[derive(Debug, Clone)]
enum BoundValue {
    Unset,
    One(PropertyValue),
    Many(Vec<PropertyValue>),
}

/// Filter with bind variables substituted and operands validated
#[derive(Debug, Clone)]
struct BoundFilter {
    field: FieldRef,
    operator: FilterOperator,
    value: BoundValue,
    case_sensitive: bool,
}

impl BoundFilter {
    fn bind(filter: &QueryFilter, bindings: &BTreeMap<String, PropertyValue>) -> Result<Self, QueryError> {
        let value = match &filter.value {
            FilterValue::Unset => BoundValue::Unset,
            FilterValue::Literal(value) => BoundValue::One(value.clone()),
            FilterValue::List(values) => BoundValue::Many(values.clone()),
            FilterValue::Bind(name) => BoundValue::One(
                bindings
                    .get(name)
                    .cloned()
                    .ok_or_else(|| QueryError::UnboundVariable(name.clone()))?,
            ),
        };
        let value = match (filter.operator, value) {
            (FilterOperator::Exists, value @ (BoundValue::Unset | BoundValue::One(PropertyValue::Boolean(_)))) => value,
            (FilterOperator::Exists, _) => {
                return Err(QueryError::Unsupported(format!(
                    "exists on {} takes no operand or a boolean",
                    filter.field
                )))
            }
            (FilterOperator::In, BoundValue::One(single)) => BoundValue::Many(vec![single]),
            (FilterOperator::In, value @ BoundValue::Many(_)) => value,
            (operator, BoundValue::Unset) => {
                return Err(QueryError::MissingValue {
                    field: filter.field.to_string(),
                    operator: operator.to_string(),
                })
            }
            (operator, BoundValue::Many(_)) => {
                return Err(QueryError::Unsupported(format!(
                    "operator {} on {} does not take a list",
                    operator, filter.field
                )))
            }
            (_, value) => value,
        };
        Ok(Self {
            field: filter.field.clone(),
            operator: filter.operator,
            value,
            case_sensitive: filter.case_sensitive,
        })
    }

    fn matches(&self, session: &Session, node: &Node) -> bool {
        let actual = self.field.value_of(session, node);
        if self.operator == FilterOperator::Exists {
            let expected = match &self.value {
                BoundValue::One(PropertyValue::Boolean(b)) => *b,
                _ => true,
            };
            return actual.is_some() == expected;
        }
        // Absent values never satisfy a comparison
        let Some(actual) = actual else {
            return false;
        };
        match &self.value {
            BoundValue::Many(values) => values.iter().any(|v| self.equal(&actual, v)),
            BoundValue::One(expected) => self.test(&actual, expected),
            BoundValue::Unset => false,
        }
    }

    fn test(&self, actual: &PropertyValue, expected: &PropertyValue) -> bool {
        match self.operator {
            FilterOperator::Equals => self.equal(actual, expected),
            FilterOperator::NotEquals => !self.equal(actual, expected),
            FilterOperator::GreaterThan => self.order(actual, expected) == Some(Ordering::Greater),
            FilterOperator::GreaterThanOrEqual => matches!(
                self.order(actual, expected),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOperator::LessThan => self.order(actual, expected) == Some(Ordering::Less),
            FilterOperator::LessThanOrEqual => matches!(
                self.order(actual, expected),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOperator::Contains => self.text(actual).contains(&self.text(expected)),
            FilterOperator::StartsWith => self.text(actual).starts_with(&self.text(expected)),
            FilterOperator::EndsWith => self.text(actual).ends_with(&self.text(expected)),
            FilterOperator::In | FilterOperator::Exists => false,
        }
    }

    fn order(&self, a: &PropertyValue, b: &PropertyValue) -> Option<Ordering> {
        match (a, b) {
            (PropertyValue::String(x), PropertyValue::String(y)) if !self.case_sensitive => {
                Some(x.to_lowercase().cmp(&y.to_lowercase()))
            }
            _ => a.compare(b),
        }
    }

    fn equal(&self, a: &PropertyValue, b: &PropertyValue) -> bool {
        self.order(a, b) == Some(Ordering::Equal)
    }

    fn text(&self, value: &PropertyValue) -> String {
        let text = value.to_string();
        if self.case_sensitive {
            text
        } else {
            text.to_lowercase()
        }
    }
}

impl fmt::Display for BoundFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.field, self.operator)?;
        match &self.value {
            BoundValue::Unset => {}
            BoundValue::One(value) => write!(f, " {:?}", value.to_string())?,
            BoundValue::Many(values) => {
                let rendered: Vec<String> = values.iter().map(|v| format!("{:?}", v.to_string())).collect();
                write!(f, " [{}]", rendered.join(", "))?;
            }
        }
        if !self.case_sensitive {
            f.write_str(" (ignore case)")?;
        }
        Ok(())
    }
}

fn render(filters: &[BoundFilter]) -> Vec<String> {
    filters.iter().map(ToString::to_string).collect()
}

#[derive(Debug, Clone)]
struct BoundJoin {
    reference_property: String,
    node_types: Option<Vec<String>>,
    filters: Vec<BoundFilter>,
}

/// Per-candidate predicate of a compiled query
#[derive(Debug, Clone)]
struct Predicate {
    node_types: Option<Vec<String>>,
    scope: Option<(NodePath, bool)>,
    filters: Vec<BoundFilter>,
    join: Option<BoundJoin>,
}

impl Predicate {
    fn matches(&self, session: &Session, scope_id: Option<NodeId>, node: &Node) -> bool {
        if let Some(types) = &self.node_types {
            if !types.contains(&node.node_type) {
                return false;
            }
        }
        if let (Some(scope_id), Some((_, recursive))) = (scope_id, &self.scope) {
            if !in_scope(session, node, scope_id, *recursive) {
                return false;
            }
        }
        if !self.filters.iter().all(|f| f.matches(session, node)) {
            return false;
        }
        match &self.join {
            Some(join) => join_matches(session, join, node),
            None => true,
        }
    }
}

fn in_scope(session: &Session, node: &Node, scope_id: NodeId, recursive: bool) -> bool {
    if !recursive {
        return node.parent == Some(scope_id);
    }
    let mut current = node.parent;
    while let Some(id) = current {
        if id == scope_id {
            return true;
        }
        current = session.with_node(id, |n| n.parent).flatten();
    }
    false
}

fn join_matches(session: &Session, join: &BoundJoin, node: &Node) -> bool {
    let Some(target) = node
        .properties
        .get(&join.reference_property)
        .and_then(NodeId::from_property)
    else {
        return false;
    };
    let Some(target_type) = session.resolve_reference(target) else {
        return false;
    };
    if let Some(types) = &join.node_types {
        if !types.contains(&target_type) {
            return false;
        }
    }
    if join.filters.is_empty() {
        return true;
    }
    match session.by_id(target) {
        Some(target) => join.filters.iter().all(|f| f.matches(session, &target)),
        None => false,
    }
}

struct CompiledQuery {
    plan: QueryPlan,
    predicate: Predicate,
    sorting: Vec<SortConfig>,
}

/// Lazy sequence of matching nodes
pub struct QueryResults<'s> {
    inner: Box<dyn Iterator<Item = Node> + 's>,
}

impl Iterator for QueryResults<'_> {
    type Item = Node;

    fn next(&mut self) -> Option<Node> {
        self.inner.next()
    }
}

impl fmt::Debug for QueryResults<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryResults").finish_non_exhaustive()
    }
}

/// Lazy sequence of matching nodes projected as `E`
pub struct EntityResults<'s, E: Entity<'s>> {
    session: &'s Session,
    nodes: QueryResults<'s>,
    args: E::Args,
    _entity: PhantomData<fn() -> E>,
}

impl<'s, E: Entity<'s>> Iterator for EntityResults<'s, E> {
    type Item = Result<E, MappingError>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.nodes.next()?;
        Some(project(self.session, &node, self.args.clone()))
    }
}

/// Service for executing queries within one session
#[derive(Debug, Clone, Copy)]
pub struct QueryService<'s> {
    session: &'s Session,
}

impl<'s> QueryService<'s> {
    /// Create a new QueryService
    pub fn new(session: &'s Session) -> Self {
        Self { session }
    }

    /// Report the access plan without executing the query
    pub fn explain(&self, query: &QueryDefinition) -> Result<QueryPlan, QueryError> {
        Ok(self.compile(query)?.plan)
    }

    /// Execute a query and return matching nodes
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - A filter refers to an unbound variable
    /// - An operator is combined with an operand it cannot use
    /// - The scope path is malformed
    pub fn execute(&self, query: &QueryDefinition) -> Result<QueryResults<'s>, QueryError> {
        let CompiledQuery {
            plan,
            predicate,
            sorting,
        } = self.compile(query)?;
        self.session.metrics().record_query();
        tracing::debug!(plan = %plan, "Executing query");

        let session = self.session;
        let scope_id = match &predicate.scope {
            Some((path, _)) => match session.resolve_id(path) {
                Some(id) => Some(id),
                None => {
                    return Ok(QueryResults {
                        inner: Box::new(std::iter::empty()),
                    })
                }
            },
            None => None,
        };
        let candidates = match &plan.access {
            AccessPath::IdLookup { id } => vec![*id],
            AccessPath::PathTraversal { recursive, .. } => match (scope_id, recursive) {
                (Some(id), true) => session.descendant_ids(id),
                (Some(id), false) => session.child_ids(id),
                (None, _) => Vec::new(),
            },
            AccessPath::TypeIndex { node_types } => session.ids_of_types(node_types),
            AccessPath::FullScan => session.all_ids(),
        };

        let matches = candidates
            .into_iter()
            .filter_map(move |id| session.by_id(id))
            .filter(move |node| predicate.matches(session, scope_id, node));

        let ordered: Box<dyn Iterator<Item = Node> + 's> = if sorting.is_empty() {
            Box::new(matches)
        } else {
            let mut nodes: Vec<Node> = matches.collect();
            sort_nodes(session, &mut nodes, &sorting);
            Box::new(nodes.into_iter())
        };
        let paged = ordered.skip(plan.offset);
        let inner: Box<dyn Iterator<Item = Node> + 's> = match plan.limit {
            Some(limit) => Box::new(paged.take(limit)),
            None => Box::new(paged),
        };
        Ok(QueryResults { inner })
    }

    /// Execute a query and project the matches as `E`
    ///
    /// A query without a target type is restricted to `E::NODE_TYPE`.
    pub fn execute_entities<E: Entity<'s>>(
        &self,
        query: &QueryDefinition,
    ) -> Result<EntityResults<'s, E>, QueryError> {
        self.execute_entities_with(query, E::Args::default())
    }

    /// [`execute_entities`](Self::execute_entities) with explicit constructor arguments
    pub fn execute_entities_with<E: Entity<'s>>(
        &self,
        query: &QueryDefinition,
        args: E::Args,
    ) -> Result<EntityResults<'s, E>, QueryError> {
        let nodes = if query.target_type.is_none() {
            let mut typed = query.clone();
            typed.target_type = Some(E::NODE_TYPE.to_string());
            self.execute(&typed)?
        } else {
            self.execute(query)?
        };
        Ok(EntityResults {
            session: self.session,
            nodes,
            args,
            _entity: PhantomData,
        })
    }

    /// Number of matches ignoring offset, limit and ordering
    ///
    /// Consistent with the paged results of the same query in the same session.
    pub fn count(&self, query: &QueryDefinition) -> Result<usize, QueryError> {
        Ok(self.execute(&query.unpaged())?.count())
    }

    /// Count matches grouped by the given keys
    pub fn count_by(
        &self,
        query: &QueryDefinition,
        keys: &[GroupKey],
    ) -> Result<BTreeMap<Vec<GroupValue>, usize>, QueryError> {
        let mut groups = BTreeMap::new();
        for node in self.execute(&query.unpaged())? {
            let group: Vec<GroupValue> = keys
                .iter()
                .map(|key| self.group_value(key, &node))
                .collect();
            *groups.entry(group).or_insert(0) += 1;
        }
        Ok(groups)
    }

    fn group_value(&self, key: &GroupKey, node: &Node) -> GroupValue {
        match key {
            GroupKey::Field(field) => field
                .value_of(self.session, node)
                .map(|v| GroupValue::Text(v.to_string()))
                .unwrap_or(GroupValue::Absent),
            GroupKey::Day(field) => field
                .value_of(self.session, node)
                .and_then(|v| DateTime::<Utc>::from_property(&v))
                .map(|t| GroupValue::Day(t.date_naive()))
                .unwrap_or(GroupValue::Absent),
        }
    }

    fn node_types(&self, target: Option<&str>, include_subtypes: bool) -> Option<Vec<String>> {
        let target = target?;
        let registry = self.session.registry();
        if include_subtypes && registry.contains(target) {
            Some(registry.subtypes_of(target))
        } else {
            Some(vec![target.to_string()])
        }
    }

    fn compile(&self, query: &QueryDefinition) -> Result<CompiledQuery, QueryError> {
        let filters = query
            .filters
            .iter()
            .map(|f| BoundFilter::bind(f, &query.bindings))
            .collect::<Result<Vec<_>, _>>()?;
        let node_types = self.node_types(query.target_type.as_deref(), query.include_subtypes);
        let scope = match &query.scope {
            Some(PathScope::ChildrenOf(path)) => Some((parse_scope(path)?, false)),
            Some(PathScope::DescendantsOf(path)) => Some((parse_scope(path)?, true)),
            None => None,
        };
        let join = match &query.join {
            Some(join) => Some(BoundJoin {
                reference_property: join.reference_property.clone(),
                node_types: self.node_types(join.target_type.as_deref(), true),
                filters: join
                    .filters
                    .iter()
                    .map(|f| BoundFilter::bind(f, &query.bindings))
                    .collect::<Result<Vec<_>, _>>()?,
            }),
            None => None,
        };

        let id_lookup = filters.iter().find_map(|f| match (&f.field, f.operator, &f.value) {
            (FieldRef::Id, FilterOperator::Equals, BoundValue::One(value)) => {
                NodeId::from_property(value)
            }
            _ => None,
        });
        let access = if let Some(id) = id_lookup {
            AccessPath::IdLookup { id }
        } else if let Some((path, recursive)) = &scope {
            AccessPath::PathTraversal {
                path: path.to_string(),
                recursive: *recursive,
            }
        } else if let Some(types) = &node_types {
            AccessPath::TypeIndex {
                node_types: types.clone(),
            }
        } else {
            AccessPath::FullScan
        };

        let residual_filters = match &access {
            AccessPath::IdLookup { .. } => render(
                &filters
                    .iter()
                    .filter(|f| !(f.field == FieldRef::Id && f.operator == FilterOperator::Equals))
                    .cloned()
                    .collect::<Vec<_>>(),
            ),
            _ => render(&filters),
        };
        let plan = QueryPlan {
            node_types: match access {
                AccessPath::TypeIndex { .. } => None,
                _ => node_types.clone(),
            },
            access,
            filters: residual_filters,
            join: join.as_ref().map(|j| JoinPlan {
                reference_property: j.reference_property.clone(),
                node_types: j.node_types.clone(),
                filters: render(&j.filters),
            }),
            sorting: query
                .sorting
                .iter()
                .map(|s| {
                    let direction = match s.direction {
                        SortDirection::Ascending => "asc",
                        SortDirection::Descending => "desc",
                    };
                    format!("{} {}", s.field, direction)
                })
                .collect(),
            offset: query.offset,
            limit: query.limit,
        };

        Ok(CompiledQuery {
            plan,
            predicate: Predicate {
                node_types,
                scope,
                filters,
                join,
            },
            sorting: query.sorting.clone(),
        })
    }
}

fn parse_scope(path: &str) -> Result<NodePath, QueryError> {
    NodePath::parse(path).map_err(|e| QueryError::InvalidScope {
        path: path.to_string(),
        reason: e.to_string(),
    })
}

/// Sort nodes in-place according to the sort configuration
fn sort_nodes(session: &Session, nodes: &mut [Node], sorting: &[SortConfig]) {
    nodes.sort_by(|a, b| {
        for sort_config in sorting {
            let ordering = compare_values(
                sort_config.field.value_of(session, a).as_ref(),
                sort_config.field.value_of(session, b).as_ref(),
            );
            let ordering = match sort_config.direction {
                SortDirection::Ascending => ordering,
                SortDirection::Descending => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

/// Compare two optional values for sorting, absent values first
///
/// This must be a total order over every mix of property types. Numbers
/// compare numerically with NaN after every other number, values of the same
/// kind compare natively, and anything else falls back to a fixed rank per
/// kind.
fn compare_values(a: Option<&PropertyValue>, b: Option<&PropertyValue>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(va), Some(vb)) => compare_present(va, vb),
    }
}

fn compare_present(a: &PropertyValue, b: &PropertyValue) -> Ordering {
    match (a, b) {
        (PropertyValue::Long(x), PropertyValue::Long(y)) => x.cmp(y),
        (
            PropertyValue::Long(_) | PropertyValue::Double(_),
            PropertyValue::Long(_) | PropertyValue::Double(_),
        ) => numeric_key(a)
            .total_cmp(&numeric_key(b))
            .then_with(|| sort_rank(a).cmp(&sort_rank(b))),
        (PropertyValue::String(x), PropertyValue::String(y)) => x.cmp(y),
        (PropertyValue::Boolean(x), PropertyValue::Boolean(y)) => x.cmp(y),
        (PropertyValue::Date(x), PropertyValue::Date(y)) => x.cmp(y),
        (PropertyValue::Binary(x), PropertyValue::Binary(y)) => x.cmp(y),
        (PropertyValue::Reference(x), PropertyValue::Reference(y)) => x.cmp(y),
        _ => sort_rank(a).cmp(&sort_rank(b)),
    }
}

fn numeric_key(value: &PropertyValue) -> f64 {
    match value {
        PropertyValue::Long(v) => *v as f64,
        PropertyValue::Double(v) => *v,
        _ => f64::NAN,
    }
}

fn sort_rank(value: &PropertyValue) -> u8 {
    match value {
        PropertyValue::Boolean(_) => 0,
        PropertyValue::Long(_) => 1,
        PropertyValue::Double(_) => 2,
        PropertyValue::Date(_) => 3,
        PropertyValue::String(_) => 4,
        PropertyValue::Reference(_) => 5,
        PropertyValue::Binary(_) => 6,
    }
}
