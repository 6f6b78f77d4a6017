//! Configuration for the metadata repository

use crate::db::EVENT_CHANNEL_CAPACITY;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Upper bound for `max_page_size`
const MAX_SUPPORTED_PAGE_SIZE: usize = 100_000;

/// Repository settings
///
/// Every field has a default, so a configuration file only needs to name the
/// settings it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// JSON file holding the committed state, `None` keeps everything in memory
    pub storage_path: Option<PathBuf>,

    /// Fault on find-or-create below a missing parent path instead of creating it
    pub strict_paths: bool,

    /// Capacity of the post-commit event broadcast channel
    pub event_channel_capacity: usize,

    /// Largest page returned by paged queries
    pub max_page_size: usize,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            storage_path: None,
            strict_paths: true,
            event_channel_capacity: EVENT_CHANNEL_CAPACITY,
            max_page_size: 1000,
        }
    }
}

impl RepositoryConfig {
    /// Default configuration persisting to `path`
    pub fn persistent(path: impl Into<PathBuf>) -> Self {
        Self {
            storage_path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Load a JSON configuration file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse configuration {}", path.display()))?;
        config.validate().map_err(anyhow::Error::msg)?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.event_channel_capacity == 0 {
            return Err("event_channel_capacity must be greater than 0".to_string());
        }

        if self.max_page_size == 0 {
            return Err("max_page_size must be greater than 0".to_string());
        }

        if self.max_page_size > MAX_SUPPORTED_PAGE_SIZE {
            return Err(format!(
                "max_page_size cannot exceed {}",
                MAX_SUPPORTED_PAGE_SIZE
            ));
        }

        if let Some(path) = &self.storage_path {
            if path.as_os_str().is_empty() {
                return Err("storage_path cannot be empty".to_string());
            }
            if path.is_dir() {
                return Err(format!(
                    "storage_path {} is a directory, expected a file",
                    path.display()
                ));
            }
        }

        Ok(())
    }
}
