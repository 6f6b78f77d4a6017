//! Node Type Registry
//!
//! This module provides the table that drives polymorphic entity construction:
//!
//! - `NodeTypeRegistry` - node-type tag to supertype and constructor function
//! - `NodeTypeRegistryBuilder` - validated, startup-time registration
//! - `AnyEntity` - the tagged variant produced by `NodeTypeRegistry::construct`
//!
//! The registry is built once when the repository opens. Unknown supertypes,
//! duplicate tags and persisted nodes whose type is not registered are
//! reported as [`RegistryError`] at that point, never as mapping failures
//! halfway through a unit of work.

use crate::mapper::{Entity, MappingError, NodeObject};
use crate::models::{
    Category, Datasource, Feed, FeedSource, HiveTableDatasource, JobExecution, CATEGORY_NODE_TYPE,
    DATASOURCE_NODE_TYPE, FEED_NODE_TYPE, FEED_SOURCE_NODE_TYPE, FOLDER_NODE_TYPE,
    HIVE_TABLE_DATASOURCE_NODE_TYPE, JOB_EXECUTION_NODE_TYPE, ROOT_NODE_TYPE,
};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Constructor producing the entity variant of a node type
pub type EntityConstructor = for<'s> fn(NodeObject<'s>) -> AnyEntity<'s>;

/// Registry configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Node type {0} is registered more than once")]
    DuplicateType(String),

    #[error("Node type {tag} declares unknown supertype {supertype}")]
    UnknownSupertype { tag: String, supertype: String },

    #[error("Node type {0} is part of a supertype cycle")]
    CyclicSupertype(String),

    #[error("Invalid node type tag '{0}'")]
    InvalidTag(String),

    #[error("Persisted node type {0} is not registered")]
    UnknownPersistedType(String),
}

#[derive(Clone)]
struct NodeTypeDefinition {
    supertype: Option<String>,
    constructor: Option<EntityConstructor>,
}

/// Node-type tag table
#[derive(Clone)]
pub struct NodeTypeRegistry {
    types: HashMap<String, NodeTypeDefinition>,
}

impl NodeTypeRegistry {
    /// Builder preloaded with the standard metadata types
    pub fn builder() -> NodeTypeRegistryBuilder {
        NodeTypeRegistryBuilder::standard()
    }

    /// Registry holding the standard metadata types
    pub fn standard() -> Self {
        let types = standard_definitions()
            .into_iter()
            .map(|(tag, supertype, constructor)| {
                (
                    tag.to_string(),
                    NodeTypeDefinition {
                        supertype: supertype.map(str::to_string),
                        constructor,
                    },
                )
            })
            .collect();
        Self { types }
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.types.contains_key(tag)
    }

    pub fn supertype(&self, tag: &str) -> Option<&str> {
        self.types.get(tag)?.supertype.as_deref()
    }

    /// Whether `tag` is `ancestor` or inherits from it
    pub fn is_a(&self, tag: &str, ancestor: &str) -> bool {
        let mut current = Some(tag);
        // Bounded walk, the builder rejects cycles
        for _ in 0..=self.types.len() {
            match current {
                Some(t) if t == ancestor => return true,
                Some(t) => current = self.supertype(t),
                None => return false,
            }
        }
        false
    }

    /// `tag` and every type inheriting from it, sorted
    pub fn subtypes_of(&self, tag: &str) -> Vec<String> {
        let mut result: Vec<String> = self
            .types
            .keys()
            .filter(|t| self.is_a(t, tag))
            .cloned()
            .collect();
        result.sort();
        result
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    /// Build the entity variant for a node
    ///
    /// The nearest constructor along the supertype chain is used; node types
    /// without one come back as [`AnyEntity::Node`].
    pub fn construct<'s>(&self, object: NodeObject<'s>) -> Result<AnyEntity<'s>, MappingError> {
        let node_type = object.node_type()?;
        if !self.contains(&node_type) {
            return Err(MappingError::UnknownNodeType(node_type));
        }
        let mut current = Some(node_type.as_str());
        for _ in 0..=self.types.len() {
            let Some(tag) = current else {
                break;
            };
            if let Some(constructor) = self.types.get(tag).and_then(|d| d.constructor) {
                return Ok(constructor(object));
            }
            current = self.supertype(tag);
        }
        Ok(AnyEntity::Node(object))
    }

    /// Check that every persisted node type is registered
    pub fn validate_persisted<'a>(
        &self,
        node_types: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), RegistryError> {
        for node_type in node_types {
            if !self.contains(node_type) {
                return Err(RegistryError::UnknownPersistedType(node_type.to_string()));
            }
        }
        Ok(())
    }
}

impl Default for NodeTypeRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl std::fmt::Debug for NodeTypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tags: Vec<&str> = self.tags().collect();
        tags.sort_unstable();
        f.debug_struct("NodeTypeRegistry").field("types", &tags).finish()
    }
}

/// Startup-time registration of node types
pub struct NodeTypeRegistryBuilder {
    entries: Vec<(String, Option<String>, Option<EntityConstructor>)>,
}

impl NodeTypeRegistryBuilder {
    /// Builder without any types, not even the root and folder types
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Builder preloaded with the standard metadata types
    pub fn standard() -> Self {
        Self {
            entries: standard_definitions()
                .into_iter()
                .map(|(tag, supertype, constructor)| {
                    (tag.to_string(), supertype.map(str::to_string), constructor)
                })
                .collect(),
        }
    }

    /// Register a node type
    pub fn register(
        mut self,
        tag: impl Into<String>,
        supertype: Option<&str>,
        constructor: Option<EntityConstructor>,
    ) -> Self {
        self.entries
            .push((tag.into(), supertype.map(str::to_string), constructor));
        self
    }

    /// Validate and freeze the table
    pub fn build(self) -> Result<NodeTypeRegistry, RegistryError> {
        let mut types = HashMap::new();
        for (tag, supertype, constructor) in self.entries {
            if tag.is_empty() || tag.chars().any(|c| c.is_whitespace() || c == '/') {
                return Err(RegistryError::InvalidTag(tag));
            }
            if types.contains_key(&tag) {
                return Err(RegistryError::DuplicateType(tag));
            }
            types.insert(
                tag,
                NodeTypeDefinition {
                    supertype,
                    constructor,
                },
            );
        }

        for (tag, definition) in &types {
            if let Some(supertype) = &definition.supertype {
                if !types.contains_key(supertype) {
                    return Err(RegistryError::UnknownSupertype {
                        tag: tag.clone(),
                        supertype: supertype.clone(),
                    });
                }
            }

            let mut seen = HashSet::new();
            let mut current = Some(tag);
            while let Some(t) = current {
                if !seen.insert(t) {
                    return Err(RegistryError::CyclicSupertype(tag.clone()));
                }
                current = types.get(t).and_then(|d| d.supertype.as_ref());
            }
        }

        Ok(NodeTypeRegistry { types })
    }
}

type Definition = (&'static str, Option<&'static str>, Option<EntityConstructor>);

fn standard_definitions() -> Vec<Definition> {
    vec![
        (ROOT_NODE_TYPE, None, None),
        (FOLDER_NODE_TYPE, None, None),
        (CATEGORY_NODE_TYPE, None, Some(construct_category as EntityConstructor)),
        (FEED_NODE_TYPE, None, Some(construct_feed as EntityConstructor)),
        (FEED_SOURCE_NODE_TYPE, None, Some(construct_feed_source as EntityConstructor)),
        (DATASOURCE_NODE_TYPE, None, Some(construct_datasource as EntityConstructor)),
        (
            HIVE_TABLE_DATASOURCE_NODE_TYPE,
            Some(DATASOURCE_NODE_TYPE),
            Some(construct_hive_table_datasource as EntityConstructor),
        ),
        (JOB_EXECUTION_NODE_TYPE, None, Some(construct_job_execution as EntityConstructor)),
    ]
}

fn construct_category<'s>(object: NodeObject<'s>) -> AnyEntity<'s> {
    AnyEntity::Category(Category::from_object(object, Default::default()))
}

fn construct_feed<'s>(object: NodeObject<'s>) -> AnyEntity<'s> {
    AnyEntity::Feed(Feed::from_object(object, Default::default()))
}

fn construct_feed_source<'s>(object: NodeObject<'s>) -> AnyEntity<'s> {
    AnyEntity::FeedSource(FeedSource::from_object(object, Default::default()))
}

fn construct_datasource<'s>(object: NodeObject<'s>) -> AnyEntity<'s> {
    AnyEntity::Datasource(Datasource::from_object(object, Default::default()))
}

fn construct_hive_table_datasource<'s>(object: NodeObject<'s>) -> AnyEntity<'s> {
    AnyEntity::HiveTableDatasource(HiveTableDatasource::from_object(object, Default::default()))
}

fn construct_job_execution<'s>(object: NodeObject<'s>) -> AnyEntity<'s> {
    AnyEntity::JobExecution(JobExecution::from_object(object, Default::default()))
}

/// Entity built for a node according to its registered type
#[derive(Debug)]
pub enum AnyEntity<'s> {
    Category(Category<'s>),
    Feed(Feed<'s>),
    FeedSource(FeedSource<'s>),
    Datasource(Datasource<'s>),
    HiveTableDatasource(HiveTableDatasource<'s>),
    JobExecution(JobExecution<'s>),
    /// Node type without an entity constructor (root, folders, custom types)
    Node(NodeObject<'s>),
}

impl<'s> AnyEntity<'s> {
    pub fn object(&self) -> &NodeObject<'s> {
        match self {
            AnyEntity::Category(e) => e.object(),
            AnyEntity::Feed(e) => e.object(),
            AnyEntity::FeedSource(e) => e.object(),
            AnyEntity::Datasource(e) => e.object(),
            AnyEntity::HiveTableDatasource(e) => e.object(),
            AnyEntity::JobExecution(e) => e.object(),
            AnyEntity::Node(object) => object,
        }
    }

    pub fn id(&self) -> crate::models::NodeId {
        self.object().id()
    }

    /// Short variant name for logs and tree dumps
    pub fn kind(&self) -> &'static str {
        match self {
            AnyEntity::Category(_) => "category",
            AnyEntity::Feed(_) => "feed",
            AnyEntity::FeedSource(_) => "feedSource",
            AnyEntity::Datasource(_) => "datasource",
            AnyEntity::HiveTableDatasource(_) => "hiveTableDatasource",
            AnyEntity::JobExecution(_) => "jobExecution",
            AnyEntity::Node(_) => "node",
        }
    }
}
