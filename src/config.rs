//! Configuration for chunkstore
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{Result, StoreError};

/// Main configuration for a chunkstore instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Directory holding table files and the manifest
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── manifest          (current table set)
    ///     ├── <40 hex chars>    (table files, named by address)
    ///     └── nbs_table_*       (in-flight temp files)
    pub data_dir: PathBuf,

    /// fsync table files and the directory before a table becomes visible
    pub sync_writes: bool,

    // -------------------------------------------------------------------------
    // Cache Configuration
    // -------------------------------------------------------------------------
    /// Maximum number of simultaneously open table files
    pub max_open_files: usize,

    /// Memory budget for parsed table indexes (0 disables the index cache)
    pub index_cache_bytes: usize,

    // -------------------------------------------------------------------------
    // MemTable / Conjoin Configuration
    // -------------------------------------------------------------------------
    /// Max size of memtable before flush (in bytes)
    pub memtable_size_limit: usize,

    /// Table count above which a flush triggers a conjoin
    pub max_tables: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./chunkstore_data"),
            sync_writes: true,
            max_open_files: 128,
            index_cache_bytes: 64 * 1024 * 1024, // 64 MB
            memtable_size_limit: 16 * 1024 * 1024, // 16 MB
            max_tables: 16,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings the store cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_open_files == 0 {
            return Err(StoreError::Config(
                "max_open_files must be at least 1".to_string(),
            ));
        }
        if self.max_tables == 0 {
            return Err(StoreError::Config(
                "max_tables must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Enable or disable fsync on table install
    pub fn sync_writes(mut self, sync: bool) -> Self {
        self.config.sync_writes = sync;
        self
    }

    /// Set the file descriptor budget
    pub fn max_open_files(mut self, count: usize) -> Self {
        self.config.max_open_files = count;
        self
    }

    /// Set the index cache budget (in bytes, 0 disables it)
    pub fn index_cache_bytes(mut self, bytes: usize) -> Self {
        self.config.index_cache_bytes = bytes;
        self
    }

    /// Set the memtable size limit (in bytes)
    pub fn memtable_size_limit(mut self, size: usize) -> Self {
        self.config.memtable_size_limit = size;
        self
    }

    /// Set the table count that triggers a conjoin
    pub fn max_tables(mut self, count: usize) -> Self {
        self.config.max_tables = count;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
