//! Category Provider

use crate::db::Session;
use crate::models::{
    Category, NodePath, PropertyUpdates, CATEGORIES_PATH, FEEDS_FOLDER, FOLDER_NODE_TYPE,
};
use crate::services::query_service::FilterAliases;
use crate::services::{EntityProvider, RepositoryError};

#[derive(Debug, Clone, Copy, Default)]
pub struct CategoryProvider;

impl EntityProvider for CategoryProvider {
    type Entity<'s> = Category<'s>;

    fn filter_aliases(&self) -> FilterAliases {
        FilterAliases::new()
            .alias("name", "@name")
            .alias("title", "tba:title")
            .alias("description", "tba:description")
    }
}

impl CategoryProvider {
    /// Path of the category called `name`
    pub fn category_path(name: &str) -> Result<NodePath, RepositoryError> {
        Ok(NodePath::parse(CATEGORIES_PATH)?.child(name)?)
    }

    /// Find or create the category called `name` together with its feeds folder
    pub fn ensure_category<'s>(
        &self,
        session: &'s Session,
        name: &str,
    ) -> Result<Category<'s>, RepositoryError> {
        let path = Self::category_path(name)?;
        let category =
            self.find_or_create_entity(session, "/", &path.to_string(), &PropertyUpdates::new())?;
        session.find_or_create(&path, &NodePath::parse(FEEDS_FOLDER)?, FOLDER_NODE_TYPE)?;
        Ok(category)
    }

    pub fn find_by_name<'s>(
        &self,
        session: &'s Session,
        name: &str,
    ) -> Result<Option<Category<'s>>, RepositoryError> {
        match session.resolve(&Self::category_path(name)?) {
            Some(node) => self.find_by_id(session, node.id),
            None => Ok(None),
        }
    }
}
