//! Engine Module
//!
//! The chunk store front end that coordinates the memtable and storage.
//!
//! ## Responsibilities
//! - Buffer new chunks in the memtable
//! - Trigger flushes when the memtable is full
//! - Keep the table count bounded with size-tiered conjoins
//! - Serve reads from the memtable first, then from tables

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use crate::address::Address;
use crate::cancel::CancelToken;
use crate::config::Config;
use crate::error::Result;
use crate::memtable::MemTable;
use crate::storage::{ChunkHaver, ChunkSource, MergeAll, SizeTiered, StorageManager};

/// The main chunk store
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
///
/// - **Writes** (put/flush/compact): Serialized by `write_lock`
/// - **Reads** (get/has): Never take `write_lock`; the memtable is behind
///   a `RwLock` and storage reads work on a snapshot of the table set
///
/// A flush persists a copy of the memtable and only replaces it once the
/// new table is live, so a chunk is always visible in one place or the
/// other.
pub struct Engine {
    /// Engine configuration
    config: Config,

    /// Chunks not yet persisted
    memtable: RwLock<MemTable>,

    /// Persistent table storage
    storage: StorageManager,

    /// Serializes write operations (put/flush/compact)
    write_lock: Mutex<()>,

    /// Cancels in-flight persists and conjoins
    ctx: CancelToken,
}

impl Engine {
    /// Open or create a store with the given config
    pub fn open(config: Config) -> Result<Self> {
        let storage = StorageManager::open(&config)?;

        Ok(Self {
            config,
            memtable: RwLock::new(MemTable::new()),
            storage,
            write_lock: Mutex::new(()),
            ctx: CancelToken::new(),
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::builder().data_dir(path).build())
    }

    /// Get a chunk by address
    ///
    /// Search order:
    /// 1. MemTable (pending writes)
    /// 2. Tables (newest to oldest)
    pub fn get(&self, address: &Address) -> Result<Option<Bytes>> {
        if let Some(data) = self.memtable.read().get(address) {
            return Ok(Some(data));
        }
        self.storage.get(address)
    }

    /// Check whether a chunk is stored or pending
    pub fn has(&self, address: &Address) -> Result<bool> {
        if self.memtable.read().has(address) {
            return Ok(true);
        }
        self.storage.has(address)
    }

    /// Store a chunk, returning its address
    ///
    /// Chunks already stored are not buffered again.
    pub fn put(&self, data: impl Into<Bytes>) -> Result<Address> {
        let data = data.into();
        let address = Address::of(&data);

        let _write_guard = self.write_lock.lock();

        if self.storage.has(&address)? {
            return Ok(address);
        }

        let should_flush = {
            let mut memtable = self.memtable.write();
            memtable.add(data);
            memtable.should_flush(self.config.memtable_size_limit)
        };

        if should_flush {
            self.flush_internal()?;
        }

        Ok(address)
    }

    /// Flush memtable to disk (public API)
    ///
    /// Forces a flush regardless of memtable size
    pub fn flush(&self) -> Result<()> {
        let _write_guard = self.write_lock.lock();
        self.flush_internal()
    }

    /// Merge every table into one
    ///
    /// Returns the merged table, or `None` with fewer than two tables.
    pub fn compact(&self) -> Result<Option<Arc<dyn ChunkSource>>> {
        let _write_guard = self.write_lock.lock();
        self.storage.conjoin(&self.ctx, &MergeAll)
    }

    /// Close the store
    ///
    /// Flushes any pending chunks and releases file handles
    pub fn close(self) -> Result<()> {
        self.flush()?;
        self.storage.close();
        tracing::info!(tables = self.storage.table_count(), "Closed chunk store");
        Ok(())
    }

    /// Internal flush implementation (called with write lock held)
    fn flush_internal(&self) -> Result<()> {
        let pending = self.memtable.read().clone();
        if pending.is_empty() {
            return Ok(());
        }

        let count = pending.count();
        let table = self.storage.flush(&self.ctx, pending)?;
        *self.memtable.write() = MemTable::new();

        tracing::debug!(
            table = %table.name(),
            pending = count,
            written = table.chunk_count(),
            "Flushed memtable"
        );

        if self.storage.table_count() > self.config.max_tables {
            let policy = SizeTiered {
                max_tables: self.config.max_tables,
            };
            self.storage.conjoin(&self.ctx, &policy)?;
        }

        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Get the current memtable size
    pub fn memtable_size(&self) -> usize {
        self.memtable.read().size()
    }

    /// Get the memtable chunk count
    pub fn memtable_chunk_count(&self) -> usize {
        self.memtable.read().count()
    }

    /// Get the number of tables
    pub fn table_count(&self) -> usize {
        self.storage.table_count()
    }

    /// Get the storage manager
    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }

    /// Token that aborts in-flight flushes and conjoins when cancelled
    pub fn cancel_token(&self) -> &CancelToken {
        &self.ctx
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }
}
