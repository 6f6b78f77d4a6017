//! Plain-text dump of a subtree, for debugging and the `print-tree` tool

use crate::db::{Session, StoreError};
use crate::models::{Node, NodePath};
use crate::services::RepositoryError;
use std::fmt;

/// Render the subtree at `path` as indented text
///
/// Each node prints as `name [type] id` followed by its properties, one per
/// line. `max_depth` limits how many levels below `path` are printed.
pub fn print_subgraph(
    session: &Session,
    path: &str,
    max_depth: Option<usize>,
) -> Result<String, RepositoryError> {
    let path = NodePath::parse(path)?;
    let node = session
        .resolve(&path)
        .ok_or_else(|| StoreError::path_not_found(path.to_string()))?;
    Ok(Subtree {
        session,
        node,
        depth: 0,
        max_depth,
    }
    .to_string())
}

struct Subtree<'a> {
    session: &'a Session,
    node: Node,
    depth: usize,
    max_depth: Option<usize>,
}

impl fmt::Display for Subtree<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let indent = "  ".repeat(self.depth);
        let name = if self.node.parent.is_none() { "/" } else { &self.node.name };
        writeln!(f, "{}{} [{}] {}", indent, name, self.node.node_type, self.node.id)?;
        for (key, value) in &self.node.properties {
            writeln!(f, "{}  - {} = {}", indent, key, value)?;
        }

        if self.max_depth.is_some_and(|max| self.depth >= max) {
            return Ok(());
        }
        for child in self.session.children(self.node.id) {
            let subtree = Subtree {
                session: self.session,
                node: child,
                depth: self.depth + 1,
                max_depth: self.max_depth,
            };
            write!(f, "{}", subtree)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behaviors::NodeTypeRegistry;
    use crate::config::RepositoryConfig;
    use crate::db::{NodeStore, SessionMode};
    use crate::models::{PropertyUpdates, FOLDER_NODE_TYPE};
    use std::sync::Arc;

    #[test]
    fn test_print_subgraph() {
        let store = NodeStore::open(
            RepositoryConfig::default(),
            Arc::new(NodeTypeRegistry::standard()),
        )
        .unwrap();
        let session = store.session(SessionMode::ReadWrite);
        let leaf = session.find_or_create_at("/", "a/b/c", FOLDER_NODE_TYPE).unwrap();
        session
            .set_properties(leaf.id, &PropertyUpdates::new().set("color", "red"))
            .unwrap();

        let full = print_subgraph(&session, "/a", None).unwrap();
        let lines: Vec<&str> = full.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("a [nt:folder]"));
        assert!(lines[2].starts_with("    c [nt:folder]"));
        assert_eq!(lines[3], "      - color = red");

        let shallow = print_subgraph(&session, "/a", Some(1)).unwrap();
        assert_eq!(shallow.lines().count(), 2);

        assert!(print_subgraph(&session, "/missing", None).is_err());
    }
}
