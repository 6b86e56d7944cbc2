//! Store configuration.
//!
//! All tunable limits and paths live in one injected value, validated at load
//! time. Controllers read limits from it at evaluation time; nothing reads
//! ambient process-wide state.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for the storage core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum tree depth from cell root to any node.
    pub max_collection_depth: usize,
    /// Maximum direct children per collection.
    pub max_child_resource_count: usize,
    /// Upper bound on bulk child queries (PROPFIND depth 1 page size).
    pub search_page_size: usize,
    /// Root directory of the binary payload store.
    pub blob_root: PathBuf,
    /// Path of the durable cell-deletion ledger.
    pub ledger_path: PathBuf,
    /// Retry budget for the cell access-drain wait.
    pub cell_drain_retry_count: u32,
    /// Poll interval for the cell access-drain wait, in milliseconds.
    pub cell_drain_retry_interval_ms: u64,
    /// Page size for cascading deletion of a cell's file nodes.
    pub cascade_page_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            max_collection_depth: 32,
            max_child_resource_count: 1024,
            search_page_size: 1000,
            blob_root: PathBuf::from("data/blobs"),
            ledger_path: PathBuf::from("data/cell-delete-ledger"),
            cell_drain_retry_count: 30,
            cell_drain_retry_interval_ms: 100,
            cascade_page_size: 100,
        }
    }
}

impl StoreConfig {
    /// Load configuration from an optional TOML file layered under
    /// `CELLSTORE_*` environment overrides.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path));
        }
        let cfg: StoreConfig = builder
            .add_source(config::Environment::with_prefix("CELLSTORE"))
            .build()
            .map_err(|e| Error::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| Error::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject configurations the core cannot operate under.
    pub fn validate(&self) -> Result<()> {
        if self.max_collection_depth == 0 {
            return Err(Error::Config("max_collection_depth must be at least 1".into()));
        }
        if self.max_child_resource_count == 0 {
            return Err(Error::Config("max_child_resource_count must be at least 1".into()));
        }
        if self.search_page_size == 0 || self.cascade_page_size == 0 {
            return Err(Error::Config("page sizes must be at least 1".into()));
        }
        if self.blob_root.as_os_str().is_empty() {
            return Err(Error::Config("blob_root must not be empty".into()));
        }
        if self.ledger_path.as_os_str().is_empty() {
            return Err(Error::Config("ledger_path must not be empty".into()));
        }
        if self.cell_drain_retry_count == 0 {
            return Err(Error::Config("cell_drain_retry_count must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        StoreConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_depth_is_rejected() {
        let cfg = StoreConfig {
            max_collection_depth: 0,
            ..StoreConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn load_reads_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cellstore.toml");
        std::fs::write(&path, "max_collection_depth = 5\nmax_child_resource_count = 7\n").unwrap();

        let cfg = StoreConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.max_collection_depth, 5);
        assert_eq!(cfg.max_child_resource_count, 7);
        // Unspecified fields keep their defaults.
        assert_eq!(cfg.cascade_page_size, StoreConfig::default().cascade_page_size);
    }
}
