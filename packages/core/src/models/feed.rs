//! Feed and feed source entities
//!
//! A feed lives at `/metadata/categories/<category>/feeds/<feed>` and refers
//! back to its category through the `tba:category` reference. Its sources are
//! child nodes below a `sources` folder, each referring to a datasource.
//!
//! # Properties
//!
//! Property names containing `:` are system properties owned by the mapper.
//! Every other property is a user property and can be bulk-edited with
//! [`Feed::merge_properties`] and [`Feed::replace_properties`].

use crate::behaviors::AnyEntity;
use crate::db::StoreError;
use crate::mapper::{Entity, MappingError, NodeObject};
use crate::models::{
    Category, Datasource, FromProperty, PropertyUpdates, PropertyValue, ValidationError,
};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const FEED_NODE_TYPE: &str = "tba:feed";
pub const FEED_SOURCE_NODE_TYPE: &str = "tba:feedSource";

/// Folder below a feed holding its sources
pub const SOURCES_FOLDER: &str = "sources";

const CATEGORY: &str = "tba:category";
const DESCRIPTION: &str = "tba:description";
const STATE: &str = "tba:state";
const DATASOURCE: &str = "tba:datasource";

/// Whether a property name belongs to the user property namespace
pub fn is_user_property(name: &str) -> bool {
    !name.contains(':')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedState {
    #[default]
    Enabled,
    Disabled,
}

impl FromStr for FeedState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ENABLED" => Ok(Self::Enabled),
            "DISABLED" => Ok(Self::Disabled),
            _ => Err(format!("Invalid feed state: {}", s)),
        }
    }
}

impl fmt::Display for FeedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enabled => write!(f, "ENABLED"),
            Self::Disabled => write!(f, "DISABLED"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Feed<'s> {
    object: NodeObject<'s>,
}

impl<'s> Entity<'s> for Feed<'s> {
    const NODE_TYPE: &'static str = FEED_NODE_TYPE;
    type Args = ();

    fn from_object(object: NodeObject<'s>, _args: ()) -> Self {
        Self { object }
    }

    fn object(&self) -> &NodeObject<'s> {
        &self.object
    }
}

impl<'s> Feed<'s> {
    pub fn name(&self) -> Result<String, MappingError> {
        self.object.name()
    }

    pub fn category(&self) -> Result<Option<Category<'s>>, MappingError> {
        self.object.reference(CATEGORY)
    }

    pub fn set_category(&self, category: &Category<'_>) -> Result<(), MappingError> {
        self.object.set_reference(CATEGORY, category.id())
    }

    pub fn description(&self) -> Result<Option<String>, MappingError> {
        self.object.property(DESCRIPTION)
    }

    pub fn set_description(&self, description: &str) -> Result<(), MappingError> {
        self.object.set_property(DESCRIPTION, description)
    }

    /// Feed state, `Enabled` when unset
    pub fn state(&self) -> Result<FeedState, MappingError> {
        match self.object.property::<String>(STATE)? {
            Some(state) => state.parse::<FeedState>().map_err(|e| {
                MappingError::from(StoreError::from(ValidationError::InvalidProperties(e)))
            }),
            None => Ok(FeedState::default()),
        }
    }

    pub fn set_state(&self, state: FeedState) -> Result<(), MappingError> {
        self.object.set_property(STATE, state.to_string())
    }

    /// Typed read of a single user or system property
    pub fn property<T: FromProperty>(&self, name: &str) -> Result<Option<T>, MappingError> {
        self.object.property(name)
    }

    /// User properties (names without a `:` prefix)
    pub fn user_properties(&self) -> Result<BTreeMap<String, PropertyValue>, MappingError> {
        Ok(self
            .object
            .properties()?
            .into_iter()
            .filter(|(name, _)| is_user_property(name))
            .collect())
    }

    /// Add or overwrite the given user properties, keeping the others
    ///
    /// Returns the resulting user properties.
    pub fn merge_properties(
        &self,
        properties: &BTreeMap<String, PropertyValue>,
    ) -> Result<BTreeMap<String, PropertyValue>, MappingError> {
        reject_system_names(properties)?;
        let updates: PropertyUpdates = properties
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        self.object.set_properties(&updates)?;
        self.user_properties()
    }

    /// Make the user properties exactly `properties`
    ///
    /// Returns the resulting user properties.
    pub fn replace_properties(
        &self,
        properties: &BTreeMap<String, PropertyValue>,
    ) -> Result<BTreeMap<String, PropertyValue>, MappingError> {
        reject_system_names(properties)?;
        let mut updates = PropertyUpdates::new();
        for name in self.user_properties()?.keys() {
            if !properties.contains_key(name) {
                updates.insert(name.clone(), None);
            }
        }
        for (name, value) in properties {
            updates.insert(name.clone(), Some(value.clone()));
        }
        self.object.set_properties(&updates)?;
        self.user_properties()
    }

    /// Sources of this feed, in creation order
    pub fn sources(&self) -> Result<Vec<FeedSource<'s>>, MappingError> {
        match self.object.child_object(SOURCES_FOLDER)? {
            Some(folder) => folder.children::<FeedSource>(),
            None => Ok(Vec::new()),
        }
    }
}

fn reject_system_names(properties: &BTreeMap<String, PropertyValue>) -> Result<(), MappingError> {
    match properties.keys().find(|name| !is_user_property(name)) {
        Some(name) => Err(StoreError::from(ValidationError::InvalidProperties(format!(
            "{} is a system property",
            name
        )))
        .into()),
        None => Ok(()),
    }
}

#[derive(Debug, Clone)]
pub struct FeedSource<'s> {
    object: NodeObject<'s>,
}

impl<'s> Entity<'s> for FeedSource<'s> {
    const NODE_TYPE: &'static str = FEED_SOURCE_NODE_TYPE;
    type Args = ();

    fn from_object(object: NodeObject<'s>, _args: ()) -> Self {
        Self { object }
    }

    fn object(&self) -> &NodeObject<'s> {
        &self.object
    }
}

impl<'s> FeedSource<'s> {
    /// Referenced datasource, projected as the datasource base type
    pub fn datasource(&self) -> Result<Option<Datasource<'s>>, MappingError> {
        self.object.reference(DATASOURCE)
    }

    /// Referenced datasource as its most specific registered entity
    pub fn datasource_entity(&self) -> Result<Option<AnyEntity<'s>>, MappingError> {
        self.object.reference_any(DATASOURCE)
    }

    pub fn set_datasource(&self, datasource: &Datasource<'_>) -> Result<(), MappingError> {
        self.object.set_reference(DATASOURCE, datasource.id())
    }

    /// Owning feed (grandparent node)
    pub fn feed(&self) -> Result<Option<Feed<'s>>, MappingError> {
        let feed = self
            .object
            .parent_object()
            .and_then(|folder| folder.parent_object());
        match feed {
            Some(object) => object.project::<Feed>().map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_property_namespace() {
        assert!(is_user_property("prop1"));
        assert!(!is_user_property("tba:category"));
    }

    #[test]
    fn test_feed_state_parse() {
        assert_eq!("enabled".parse::<FeedState>().unwrap(), FeedState::Enabled);
        assert_eq!(FeedState::Disabled.to_string(), "DISABLED");
        assert!("paused".parse::<FeedState>().is_err());
    }
}
