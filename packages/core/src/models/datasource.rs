//! Datasource entities
//!
//! Datasources live at `/metadata/datasources/<name>`. Hive tables are a
//! registered subtype, so a hive table node projects onto [`Datasource`] as
//! well as onto [`HiveTableDatasource`].

use crate::mapper::{Entity, MappingError, NodeObject};

pub const DATASOURCE_NODE_TYPE: &str = "tba:datasource";
pub const HIVE_TABLE_DATASOURCE_NODE_TYPE: &str = "tba:hiveTableDatasource";

/// Parent path of every datasource
pub const DATASOURCES_PATH: &str = "/metadata/datasources";

const TYPE: &str = "tba:type";
const DESCRIPTION: &str = "tba:description";
const DATABASE: &str = "tba:database";
const TABLE_NAME: &str = "tba:tableName";

#[derive(Debug, Clone)]
pub struct Datasource<'s> {
    object: NodeObject<'s>,
}

impl<'s> Entity<'s> for Datasource<'s> {
    const NODE_TYPE: &'static str = DATASOURCE_NODE_TYPE;
    type Args = ();

    fn from_object(object: NodeObject<'s>, _args: ()) -> Self {
        Self { object }
    }

    fn object(&self) -> &NodeObject<'s> {
        &self.object
    }
}

impl<'s> Datasource<'s> {
    pub fn name(&self) -> Result<String, MappingError> {
        self.object.name()
    }

    /// Free-form kind, e.g. `hive` or `jdbc`
    pub fn datasource_type(&self) -> Result<Option<String>, MappingError> {
        self.object.property(TYPE)
    }

    pub fn set_datasource_type(&self, kind: &str) -> Result<(), MappingError> {
        self.object.set_property(TYPE, kind)
    }

    pub fn description(&self) -> Result<Option<String>, MappingError> {
        self.object.property(DESCRIPTION)
    }

    pub fn set_description(&self, description: &str) -> Result<(), MappingError> {
        self.object.set_property(DESCRIPTION, description)
    }
}

#[derive(Debug, Clone)]
pub struct HiveTableDatasource<'s> {
    object: NodeObject<'s>,
}

impl<'s> Entity<'s> for HiveTableDatasource<'s> {
    const NODE_TYPE: &'static str = HIVE_TABLE_DATASOURCE_NODE_TYPE;
    type Args = ();

    fn from_object(object: NodeObject<'s>, _args: ()) -> Self {
        Self { object }
    }

    fn object(&self) -> &NodeObject<'s> {
        &self.object
    }
}

impl<'s> HiveTableDatasource<'s> {
    pub fn name(&self) -> Result<String, MappingError> {
        self.object.name()
    }

    pub fn database(&self) -> Result<Option<String>, MappingError> {
        self.object.property(DATABASE)
    }

    pub fn set_database(&self, database: &str) -> Result<(), MappingError> {
        self.object.set_property(DATABASE, database)
    }

    pub fn table_name(&self) -> Result<Option<String>, MappingError> {
        self.object.property(TABLE_NAME)
    }

    pub fn set_table_name(&self, table: &str) -> Result<(), MappingError> {
        self.object.set_property(TABLE_NAME, table)
    }

    /// `database.table` when both are set
    pub fn qualified_name(&self) -> Result<Option<String>, MappingError> {
        Ok(match (self.database()?, self.table_name()?) {
            (Some(db), Some(table)) => Some(format!("{}.{}", db, table)),
            _ => None,
        })
    }

    /// View through the datasource base type
    pub fn as_datasource(&self) -> Datasource<'s> {
        Datasource::from_object(self.object.clone(), ())
    }
}
