//! Subtree Printer
//!
//! Opens a persisted metadata repository read-only and prints the subtree at
//! a path as indented text: one line per node with its name, node type and
//! id, followed by its properties.
//!
//! # Usage
//!
//! ```bash
//! # Whole repository
//! cargo run --bin print-tree -- ./data/repository.json
//!
//! # One category, two levels deep
//! cargo run --bin print-tree -- ./data/repository.json /metadata/categories/sales --depth 2
//! ```
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Logging level (e.g., "info", "debug", "trace")

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use metastore_core::services::print_subgraph;
use metastore_core::{Repository, RepositoryConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Print a subtree of a persisted metadata repository")]
struct Args {
    /// Repository file written by a persistent repository
    storage_path: PathBuf,
    /// Absolute path of the subtree root
    #[arg(default_value = "/")]
    node_path: String,
    /// Maximum depth below the subtree root
    #[arg(long)]
    depth: Option<usize>,
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if !args.storage_path.is_file() {
        bail!("no repository at {}", args.storage_path.display());
    }

    tracing::info!(path = %args.storage_path.display(), "Opening repository");
    let repository = Repository::open(RepositoryConfig::persistent(&args.storage_path))
        .with_context(|| format!("Failed to open {}", args.storage_path.display()))?;

    let mut access = repository.access();
    let tree = access.read(|session| print_subgraph(session, &args.node_path, args.depth))?;
    print!("{}", tree);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_default_to_whole_tree() {
        let args = Args::try_parse_from(["print-tree", "./repository.json"]).unwrap();
        assert_eq!(args.storage_path, PathBuf::from("./repository.json"));
        assert_eq!(args.node_path, "/");
        assert_eq!(args.depth, None);
    }

    #[test]
    fn test_args_with_path_and_depth() {
        let args = Args::try_parse_from([
            "print-tree",
            "./repository.json",
            "/metadata/categories/sales",
            "--depth",
            "2",
        ])
        .unwrap();
        assert_eq!(args.node_path, "/metadata/categories/sales");
        assert_eq!(args.depth, Some(2));

        assert!(Args::try_parse_from(["print-tree"]).is_err());
        assert!(Args::try_parse_from(["print-tree", "./r.json", "--depth", "two"]).is_err());
    }
}
