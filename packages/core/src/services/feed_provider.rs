//! Feed Provider
//!
//! Feeds are created below their category and keep a `tba:category`
//! reference back to it. Feed sources are children of the feed's `sources`
//! folder, one per referenced datasource.

use crate::db::{Session, StoreError};
use crate::mapper::{project, Entity};
use crate::models::{
    Category, Datasource, Feed, FeedSource, NodeId, NodePath, PropertyUpdates, PropertyValue,
    FEEDS_FOLDER, FEED_SOURCE_NODE_TYPE, FOLDER_NODE_TYPE, SOURCES_FOLDER,
};
use crate::services::query_service::{FilterAliases, QueryFilter};
use crate::services::{CategoryProvider, EntityProvider, RepositoryError};
use std::collections::BTreeMap;

const CATEGORY_REFERENCE: &str = "tba:category";

#[derive(Debug, Clone, Copy, Default)]
pub struct FeedProvider;

impl EntityProvider for FeedProvider {
    type Entity<'s> = Feed<'s>;

    fn filter_aliases(&self) -> FilterAliases {
        FilterAliases::new()
            .alias("name", "@name")
            .alias("description", "tba:description")
            .alias("state", "tba:state")
            .alias("category", CATEGORY_REFERENCE)
    }
}

impl FeedProvider {
    /// Find or create feed `name` below `category`
    pub fn ensure_feed<'s>(
        &self,
        session: &'s Session,
        category: &Category<'s>,
        name: &str,
    ) -> Result<Feed<'s>, RepositoryError> {
        let category_path = category.object().path()?;
        let relative = NodePath::parse(FEEDS_FOLDER)?.child(name)?;
        let feed = self.find_or_create_entity(
            session,
            &category_path.to_string(),
            &relative.to_string(),
            &PropertyUpdates::new(),
        )?;
        feed.set_category(category)?;

        let feed_path = category_path.join(&relative);
        session.find_or_create(&feed_path, &NodePath::parse(SOURCES_FOLDER)?, FOLDER_NODE_TYPE)?;
        Ok(feed)
    }

    /// Find or create category `category_name` and feed `feed_name` below it
    pub fn ensure_feed_by_name<'s>(
        &self,
        session: &'s Session,
        category_name: &str,
        feed_name: &str,
    ) -> Result<Feed<'s>, RepositoryError> {
        let category = CategoryProvider.ensure_category(session, category_name)?;
        self.ensure_feed(session, &category, feed_name)
    }

    /// Find or create the source of `feed` that refers to `datasource`
    pub fn ensure_feed_source<'s>(
        &self,
        session: &'s Session,
        feed: &Feed<'s>,
        datasource: &Datasource<'_>,
    ) -> Result<FeedSource<'s>, RepositoryError> {
        for source in feed.sources()? {
            if source.datasource()?.map(|d| d.id()) == Some(datasource.id()) {
                return Ok(source);
            }
        }

        let sources = feed.object().path()?.child(SOURCES_FOLDER)?;
        let name = NodePath::parse(&datasource.name()?)?;
        let node = session.find_or_create(&sources, &name, FEED_SOURCE_NODE_TYPE)?;
        let source: FeedSource = project(session, &node, ())?;
        source.set_datasource(datasource)?;
        Ok(source)
    }

    /// Feeds referring to `category`
    pub fn find_by_category<'s>(
        &self,
        session: &'s Session,
        category: &Category<'_>,
    ) -> Result<Vec<Feed<'s>>, RepositoryError> {
        let query = self
            .query()
            .filter(QueryFilter::equals(CATEGORY_REFERENCE, category.id()));
        self.find(session, &query)
    }

    pub fn find_by_name<'s>(
        &self,
        session: &'s Session,
        category_name: &str,
        feed_name: &str,
    ) -> Result<Option<Feed<'s>>, RepositoryError> {
        let path = CategoryProvider::category_path(category_name)?
            .child(FEEDS_FOLDER)?
            .child(feed_name)?;
        match session.resolve(&path) {
            Some(node) => self.find_by_id(session, node.id),
            None => Ok(None),
        }
    }

    fn require<'s>(&self, session: &'s Session, id: NodeId) -> Result<Feed<'s>, RepositoryError> {
        self.find_by_id(session, id)?
            .ok_or_else(|| StoreError::node_not_found(id).into())
    }

    /// Add or overwrite user properties of a feed, returns the resulting user properties
    pub fn merge_feed_properties(
        &self,
        session: &Session,
        feed_id: NodeId,
        properties: &BTreeMap<String, PropertyValue>,
    ) -> Result<BTreeMap<String, PropertyValue>, RepositoryError> {
        Ok(self.require(session, feed_id)?.merge_properties(properties)?)
    }

    /// Make `properties` the complete set of user properties of a feed
    pub fn replace_properties(
        &self,
        session: &Session,
        feed_id: NodeId,
        properties: &BTreeMap<String, PropertyValue>,
    ) -> Result<BTreeMap<String, PropertyValue>, RepositoryError> {
        Ok(self.require(session, feed_id)?.replace_properties(properties)?)
    }
}
