//! Category entity
//!
//! Categories group feeds. Each category lives at
//! `/metadata/categories/<name>` and keeps its feeds below a `feeds` folder.

use crate::mapper::{Entity, MappingError, NodeObject};
use crate::models::Feed;

pub const CATEGORY_NODE_TYPE: &str = "tba:category";

/// Parent path of every category
pub const CATEGORIES_PATH: &str = "/metadata/categories";

/// Folder below a category holding its feeds
pub const FEEDS_FOLDER: &str = "feeds";

const TITLE: &str = "tba:title";
const DESCRIPTION: &str = "tba:description";

#[derive(Debug, Clone)]
pub struct Category<'s> {
    object: NodeObject<'s>,
}

impl<'s> Entity<'s> for Category<'s> {
    const NODE_TYPE: &'static str = CATEGORY_NODE_TYPE;
    type Args = ();

    fn from_object(object: NodeObject<'s>, _args: ()) -> Self {
        Self { object }
    }

    fn object(&self) -> &NodeObject<'s> {
        &self.object
    }
}

impl<'s> Category<'s> {
    /// System name, the last path segment
    pub fn name(&self) -> Result<String, MappingError> {
        self.object.name()
    }

    pub fn title(&self) -> Result<Option<String>, MappingError> {
        self.object.property(TITLE)
    }

    pub fn set_title(&self, title: &str) -> Result<(), MappingError> {
        self.object.set_property(TITLE, title)
    }

    pub fn description(&self) -> Result<Option<String>, MappingError> {
        self.object.property(DESCRIPTION)
    }

    pub fn set_description(&self, description: &str) -> Result<(), MappingError> {
        self.object.set_property(DESCRIPTION, description)
    }

    /// Feeds of this category, in creation order
    pub fn feeds(&self) -> Result<Vec<Feed<'s>>, MappingError> {
        match self.object.child_object(FEEDS_FOLDER)? {
            Some(folder) => folder.children::<Feed>(),
            None => Ok(Vec::new()),
        }
    }
}
