//! Hierarchical node paths
//!
//! Paths are `/`-separated sequences of node names. A path with a leading `/`
//! is absolute; find-or-create also accepts relative paths which are resolved
//! below a parent.

use crate::models::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodePath {
    segments: Vec<String>,
}

impl NodePath {
    /// The root path `/`
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a path string
    ///
    /// A single leading and trailing `/` are ignored, so `"/a/b"`, `"a/b"` and
    /// `"/a/b/"` all yield the segments `["a", "b"]`. Empty, `.` and `..`
    /// segments are rejected.
    pub fn parse(path: &str) -> Result<Self, ValidationError> {
        let trimmed = path.strip_prefix('/').unwrap_or(path);
        let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
        if trimmed.is_empty() {
            return Ok(Self::root());
        }

        let segments = trimmed
            .split('/')
            .map(|segment| validate_segment(path, segment).map(|_| segment.to_string()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Last segment, `None` for the root
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn parent(&self) -> Option<NodePath> {
        if self.is_root() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Append a single validated segment
    pub fn child(&self, name: &str) -> Result<NodePath, ValidationError> {
        validate_segment(name, name)?;
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Ok(Self { segments })
    }

    /// Append all segments of `relative`
    pub fn join(&self, relative: &NodePath) -> NodePath {
        let mut segments = self.segments.clone();
        segments.extend(relative.segments.iter().cloned());
        Self { segments }
    }

    pub fn starts_with(&self, prefix: &NodePath) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    pub(crate) fn from_segments(segments: Vec<String>) -> Self {
        Self { segments }
    }
}

fn validate_segment(path: &str, segment: &str) -> Result<(), ValidationError> {
    if segment.is_empty() {
        return Err(ValidationError::invalid_path(path, "empty path segment"));
    }
    if segment == "." || segment == ".." {
        return Err(ValidationError::invalid_path(
            path,
            "relative segments are not supported",
        ));
    }
    if segment.contains('/') {
        return Err(ValidationError::invalid_path(path, "segment contains '/'"));
    }
    if segment.chars().any(char::is_control) {
        return Err(ValidationError::invalid_path(
            path,
            "segment contains control characters",
        ));
    }
    Ok(())
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

impl FromStr for NodePath {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for NodePath {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<NodePath> for String {
    fn from(value: NodePath) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_absolute_and_relative() {
        let absolute = NodePath::parse("/metadata/categories").unwrap();
        let relative = NodePath::parse("metadata/categories").unwrap();
        assert_eq!(absolute, relative);
        assert_eq!(absolute.segments(), &["metadata", "categories"]);
        assert_eq!(absolute.to_string(), "/metadata/categories");
    }

    #[test]
    fn test_root() {
        let root = NodePath::parse("/").unwrap();
        assert!(root.is_root());
        assert_eq!(root.to_string(), "/");
        assert_eq!(root.parent(), None);
        assert_eq!(root.name(), None);
    }

    #[test]
    fn test_rejects_bad_segments() {
        assert!(NodePath::parse("/a//b").is_err());
        assert!(NodePath::parse("/a/../b").is_err());
        assert!(NodePath::parse("./a").is_err());
    }

    #[test]
    fn test_join_and_parent() {
        let base = NodePath::parse("/metadata").unwrap();
        let joined = base.join(&NodePath::parse("categories/c1").unwrap());
        assert_eq!(joined.to_string(), "/metadata/categories/c1");
        assert_eq!(joined.name(), Some("c1"));
        assert_eq!(joined.parent().unwrap().to_string(), "/metadata/categories");
        assert!(joined.starts_with(&base));
        assert!(!base.starts_with(&joined));
    }

    #[test]
    fn test_child_validates_name() {
        let base = NodePath::root();
        assert!(base.child("a/b").is_err());
        assert_eq!(base.child("jobs").unwrap().to_string(), "/jobs");
    }
}
