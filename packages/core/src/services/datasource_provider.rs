//! Datasource Provider

use crate::db::Session;
use crate::mapper::project;
use crate::models::{
    Datasource, HiveTableDatasource, NodePath, PropertyUpdates, DATASOURCES_PATH,
    HIVE_TABLE_DATASOURCE_NODE_TYPE,
};
use crate::services::query_service::FilterAliases;
use crate::services::{EntityProvider, RepositoryError};

#[derive(Debug, Clone, Copy, Default)]
pub struct DatasourceProvider;

impl EntityProvider for DatasourceProvider {
    type Entity<'s> = Datasource<'s>;

    fn filter_aliases(&self) -> FilterAliases {
        FilterAliases::new()
            .alias("name", "@name")
            .alias("type", "tba:type")
            .alias("description", "tba:description")
    }
}

impl DatasourceProvider {
    pub fn datasource_path(name: &str) -> Result<NodePath, RepositoryError> {
        Ok(NodePath::parse(DATASOURCES_PATH)?.child(name)?)
    }

    /// Find or create datasource `name` and set its kind
    ///
    /// An existing datasource of a subtype (such as a hive table) is reused.
    pub fn ensure_datasource<'s>(
        &self,
        session: &'s Session,
        name: &str,
        kind: &str,
    ) -> Result<Datasource<'s>, RepositoryError> {
        let path = Self::datasource_path(name)?;
        let updates = PropertyUpdates::new().set("tba:type", kind);
        self.find_or_create_entity(session, "/", &path.to_string(), &updates)
    }

    /// Find or create a hive table datasource
    pub fn ensure_hive_table_datasource<'s>(
        &self,
        session: &'s Session,
        name: &str,
        database: &str,
        table: &str,
    ) -> Result<HiveTableDatasource<'s>, RepositoryError> {
        let path = Self::datasource_path(name)?;
        let node = session.find_or_create(
            &NodePath::root(),
            &path,
            HIVE_TABLE_DATASOURCE_NODE_TYPE,
        )?;
        let hive: HiveTableDatasource = project(session, &node, ())?;
        hive.as_datasource().set_datasource_type("hive")?;
        hive.set_database(database)?;
        hive.set_table_name(table)?;
        Ok(hive)
    }

    pub fn find_by_name<'s>(
        &self,
        session: &'s Session,
        name: &str,
    ) -> Result<Option<Datasource<'s>>, RepositoryError> {
        match session.resolve(&Self::datasource_path(name)?) {
            Some(node) => self.find_by_id(session, node.id),
            None => Ok(None),
        }
    }
}
