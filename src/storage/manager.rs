//! Storage Manager
//!
//! Manages the set of live tables and coordinates flushes and conjoins.
//!
//! ## Responsibilities
//! - Remove orphaned temp files and unreferenced tables on startup
//! - Reopen every table listed in the manifest
//! - Search tables newest → oldest for reads
//! - Persist memtables as new tables
//! - Conjoin tables chosen by a policy, then delete the merged inputs

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use crate::address::Address;
use crate::cache::{FdCache, IndexCache};
use crate::cancel::CancelToken;
use crate::config::Config;
use crate::error::{Result, StoreError};
use crate::memtable::MemTable;
use crate::stats::Stats;
use crate::table::parse_table_file_name;

use super::manifest::{Manifest, TableSpec, TEMP_MANIFEST_PREFIX};
use super::{
    ChunkHaver, ChunkSource, ChunkSources, ConjoinPolicy, FsTablePersister, TablePersister,
    TEMP_TABLE_PREFIX,
};

/// Files removed by a startup cleanup pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Temp files left behind by aborted persists, conjoins or manifest writes
    pub temp_files: usize,
    /// Table files not referenced by the manifest
    pub tables: usize,
}

/// Live table set
struct TableSet {
    version: u64,
    /// Open sources, ordered newest → oldest
    sources: Vec<Arc<dyn ChunkSource>>,
}

/// Manages the storage layer
///
/// ## Concurrency:
/// - `tables`: `RwLock`, readers take a snapshot of the `Arc`s and release
///   the lock before touching disk
/// - `update_lock`: serializes flush and conjoin, so the haver used by a
///   flush and the inputs of a conjoin cannot change underneath them
/// - All methods use `&self`
pub struct StorageManager {
    /// Directory where tables are stored
    data_dir: PathBuf,
    sync_writes: bool,

    persister: FsTablePersister,
    fd_cache: Arc<FdCache>,
    index_cache: Option<Arc<IndexCache>>,

    tables: RwLock<TableSet>,
    update_lock: Mutex<()>,

    stats: Stats,
    cleanup: CleanupReport,
}

impl StorageManager {
    /// Open or create storage described by `config`
    ///
    /// On startup:
    /// 1. Create directory if it doesn't exist
    /// 2. Load the manifest
    /// 3. Delete orphaned temp files and tables the manifest doesn't list
    /// 4. Open every listed table (indexes parsed and cached)
    ///
    /// The manifest is the only record of live tables: a table file in
    /// `data_dir` it does not list is deleted, including tables written
    /// through a bare [`FsTablePersister`] into a directory without one.
    pub fn open(config: &Config) -> Result<Self> {
        config.validate()?;
        let path = config.data_dir.as_path();
        fs::create_dir_all(path)?;

        let manifest = Manifest::load(path)?;
        let live: HashSet<Address> = manifest.tables.iter().map(|t| t.name).collect();
        let cleanup = remove_garbage(path, &live)?;
        if cleanup.temp_files > 0 || cleanup.tables > 0 {
            tracing::info!(
                temp_files = cleanup.temp_files,
                tables = cleanup.tables,
                "Removed orphaned files"
            );
        }

        let fd_cache = Arc::new(FdCache::new(path, config.max_open_files));
        let index_cache = (config.index_cache_bytes > 0)
            .then(|| Arc::new(IndexCache::new(config.index_cache_bytes)));
        let persister = FsTablePersister::new(path, Arc::clone(&fd_cache), index_cache.clone())
            .with_sync_writes(config.sync_writes);

        let stats = Stats::new();
        let mut sources = Vec::with_capacity(manifest.tables.len());
        for spec in &manifest.tables {
            sources.push(persister.open(spec.name, spec.chunk_count, &stats)?);
        }

        tracing::info!(
            dir = %path.display(),
            tables = sources.len(),
            chunks = manifest.chunk_count(),
            "Opened storage"
        );

        Ok(Self {
            data_dir: path.to_path_buf(),
            sync_writes: config.sync_writes,
            persister,
            fd_cache,
            index_cache,
            tables: RwLock::new(TableSet {
                version: manifest.version,
                sources,
            }),
            update_lock: Mutex::new(()),
            stats,
            cleanup,
        })
    }

    /// Get a chunk by address (searches all tables newest → oldest)
    pub fn get(&self, address: &Address) -> Result<Option<Bytes>> {
        match ChunkSources::new(self.sources()).get(address, &self.stats) {
            // A concurrent conjoin deleted a table from our snapshot; its
            // chunks now live in the merged table
            Err(StoreError::TableNotFound(_)) => {
                ChunkSources::new(self.sources()).get(address, &self.stats)
            }
            result => result,
        }
    }

    /// Persist a memtable as a new table
    ///
    /// Chunks already stored in a live table are skipped. Returns the new
    /// source, or the empty sentinel if there was nothing to write (the
    /// table set is then unchanged).
    pub fn flush(&self, ctx: &CancelToken, memtable: MemTable) -> Result<Arc<dyn ChunkSource>> {
        let _update = self.update_lock.lock();

        let current = self.sources();
        let haver = ChunkSources::new(current.clone());
        let source = self.persister.persist(ctx, memtable, &haver, &self.stats)?;
        if source.chunk_count() == 0 {
            return Ok(source);
        }

        let mut next = Vec::with_capacity(current.len() + 1);
        next.push(Arc::clone(&source));
        next.extend(current.into_iter().filter(|s| s.name() != source.name()));
        self.install(next)?;

        Ok(source)
    }

    /// Conjoin the tables `policy` chooses
    ///
    /// Returns the merged table, or `None` if the policy chose fewer than
    /// two tables. Merged inputs are deleted once the new manifest is
    /// durable.
    pub fn conjoin(
        &self,
        ctx: &CancelToken,
        policy: &dyn ConjoinPolicy,
    ) -> Result<Option<Arc<dyn ChunkSource>>> {
        let _update = self.update_lock.lock();

        let current = self.sources();
        let chosen = policy.choose(&current);
        if chosen.len() < 2 {
            return Ok(None);
        }

        let inputs: Vec<Arc<dyn ChunkSource>> =
            chosen.iter().map(|&i| Arc::clone(&current[i])).collect();
        let merged = self.persister.conjoin_all(ctx, &inputs, &self.stats)?;

        let removed: HashSet<Address> = inputs.iter().map(|s| s.name()).collect();
        let mut next: Vec<Arc<dyn ChunkSource>> = current
            .into_iter()
            .filter(|s| !removed.contains(&s.name()) && s.name() != merged.name())
            .collect();
        if merged.chunk_count() > 0 {
            next.push(Arc::clone(&merged));
        }
        self.install(next)?;

        for name in removed.iter().filter(|&&name| name != merged.name()) {
            self.delete_table(name);
        }

        tracing::info!(
            merged = removed.len(),
            table = %merged.name(),
            tables = self.table_count(),
            "Conjoin complete"
        );
        Ok(Some(merged))
    }

    /// Close all file handles and drop cached indexes
    pub fn close(&self) {
        let closed = self.fd_cache.close_all();
        if let Some(cache) = &self.index_cache {
            cache.clear();
        }
        tracing::debug!(closed, "Closed storage");
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Snapshot of the live sources, newest first
    pub fn sources(&self) -> Vec<Arc<dyn ChunkSource>> {
        self.tables.read().sources.clone()
    }

    /// Current table set as manifest entries
    pub fn table_specs(&self) -> Vec<TableSpec> {
        self.tables
            .read()
            .sources
            .iter()
            .map(|s| TableSpec {
                name: s.name(),
                chunk_count: s.chunk_count(),
            })
            .collect()
    }

    /// Get the number of live tables
    pub fn table_count(&self) -> usize {
        self.tables.read().sources.len()
    }

    /// Total chunks across live tables
    pub fn chunk_count(&self) -> u64 {
        self.tables
            .read()
            .sources
            .iter()
            .map(|s| s.chunk_count() as u64)
            .sum()
    }

    /// Manifest version of the live table set
    pub fn manifest_version(&self) -> u64 {
        self.tables.read().version
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn fd_cache(&self) -> &Arc<FdCache> {
        &self.fd_cache
    }

    pub fn index_cache(&self) -> Option<&Arc<IndexCache>> {
        self.index_cache.as_ref()
    }

    pub fn persister(&self) -> &FsTablePersister {
        &self.persister
    }

    /// What the startup cleanup pass removed
    pub fn cleanup_report(&self) -> CleanupReport {
        self.cleanup
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Write a manifest for `sources`, then make it the live set.
    /// Called with `update_lock` held.
    fn install(&self, sources: Vec<Arc<dyn ChunkSource>>) -> Result<()> {
        let version = self.tables.read().version + 1;
        let manifest = Manifest {
            version,
            tables: sources
                .iter()
                .map(|s| TableSpec {
                    name: s.name(),
                    chunk_count: s.chunk_count(),
                })
                .collect(),
        };
        manifest.store(&self.data_dir, self.sync_writes)?;

        let mut tables = self.tables.write();
        tables.version = version;
        tables.sources = sources;
        Ok(())
    }

    /// Drop a merged-away table from the caches and the directory
    fn delete_table(&self, name: &Address) {
        self.fd_cache.evict(name);
        if let Some(cache) = &self.index_cache {
            cache.remove(name);
        }
        let path = self.fd_cache.path(name);
        if let Err(e) = fs::remove_file(&path) {
            tracing::warn!(table = %name, error = %e, "Failed to delete conjoined table");
        }
    }
}

impl ChunkHaver for StorageManager {
    fn has(&self, address: &Address) -> Result<bool> {
        ChunkSources::new(self.sources()).has(address)
    }
}

/// Delete temp files and table files not in `live`.
///
/// Temp files only ever exist while an operation is in flight, so any found
/// before the store is opened are orphans.
pub fn remove_garbage(dir: &Path, live: &HashSet<Address>) -> Result<CleanupReport> {
    let mut report = CleanupReport::default();

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }

        let is_temp = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with(TEMP_TABLE_PREFIX) || n.starts_with(TEMP_MANIFEST_PREFIX))
            .unwrap_or(false);
        let is_dead_table = parse_table_file_name(&path)
            .map(|name| !live.contains(&name))
            .unwrap_or(false);

        if !is_temp && !is_dead_table {
            continue;
        }

        match fs::remove_file(&path) {
            Ok(()) if is_temp => report.temp_files += 1,
            Ok(()) => report.tables += 1,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove orphaned file");
            }
        }
    }

    Ok(report)
}
