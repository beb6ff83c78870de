//! Table persister
//!
//! Turns memtables into durable, content-addressed table files, opens
//! existing tables, and executes conjoin plans.
//!
//! ## Persist state machine
//! ```text
//! Building ──► Indexed ──► Installed ──► Open
//!    │            │            │
//!    └────────────┴────────────┴──► Failed (temp file dropped)
//! ```
//! - Building: chunk bytes written to a uniquely named temp file
//! - Indexed: index parsed from the written bytes and cached
//! - Installed: one rename publishes the file under its content name
//! - Open: reopened through the normal read path
//!
//! Nothing is ever visible under a final name until the rename, so readers
//! never observe a partial table.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::NamedTempFile;

use crate::address::Address;
use crate::cache::{FdCache, IndexCache};
use crate::cancel::CancelToken;
use crate::error::{Result, StoreError};
use crate::memtable::MemTable;
use crate::stats::Stats;
use crate::table::{table_file_path, TableIndex};

use super::{plan_conjoin, ChunkHaver, ChunkSource, EmptyChunkSource, FileChunkSource};

/// Prefix of in-flight table temp files; any match found at startup is an
/// orphan from an aborted operation
pub const TEMP_TABLE_PREFIX: &str = "nbs_table_";

/// Block size of the conjoin copy loop (cancellation is checked per block)
const COPY_BLOCK_SIZE: usize = 64 * 1024;

/// Contract between the chunk store and a table backend.
///
/// Local and remote backends implement the same operations; callers never
/// touch files directly.
pub trait TablePersister: Send + Sync {
    /// Open an existing table holding `chunk_count` chunks
    fn open(&self, name: Address, chunk_count: u32, stats: &Stats) -> Result<Arc<dyn ChunkSource>>;

    /// Durably write the chunks of `memtable` that `haver` does not store.
    /// A memtable with nothing to write yields [`EmptyChunkSource`].
    fn persist(
        &self,
        ctx: &CancelToken,
        memtable: MemTable,
        haver: &dyn ChunkHaver,
        stats: &Stats,
    ) -> Result<Arc<dyn ChunkSource>>;

    /// Merge `sources` into one new table
    fn conjoin_all(
        &self,
        ctx: &CancelToken,
        sources: &[Arc<dyn ChunkSource>],
        stats: &Stats,
    ) -> Result<Arc<dyn ChunkSource>>;
}

/// Local filesystem table persister
pub struct FsTablePersister {
    dir: PathBuf,
    fd_cache: Arc<FdCache>,
    index_cache: Option<Arc<IndexCache>>,
    sync_writes: bool,
}

impl FsTablePersister {
    /// Create a persister writing into `dir`. The file handle cache is
    /// required; the index cache is optional.
    pub fn new(
        dir: impl Into<PathBuf>,
        fd_cache: Arc<FdCache>,
        index_cache: Option<Arc<IndexCache>>,
    ) -> Self {
        Self {
            dir: dir.into(),
            fd_cache,
            index_cache,
            sync_writes: true,
        }
    }

    /// fsync table files and the directory before reporting success
    pub fn with_sync_writes(mut self, sync: bool) -> Self {
        self.sync_writes = sync;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn fd_cache(&self) -> &Arc<FdCache> {
        &self.fd_cache
    }

    pub fn index_cache(&self) -> Option<&Arc<IndexCache>> {
        self.index_cache.as_ref()
    }

    /// Persist an already serialized table image
    fn persist_table(
        &self,
        ctx: &CancelToken,
        name: Address,
        data: &[u8],
        chunk_count: u32,
        stats: &Stats,
    ) -> Result<Arc<dyn ChunkSource>> {
        if chunk_count == 0 {
            return Ok(Arc::new(EmptyChunkSource));
        }
        ctx.check()?;

        // Building
        let mut temp = self.temp_file()?;
        temp.write_all(data)?;
        if self.sync_writes {
            temp.as_file().sync_all()?;
        }

        // Indexed
        let index = Arc::new(TableIndex::parse(data)?);
        let cached = self.cache_index(name, index)?;
        ctx.check()?;

        // Installed
        // The temp file's descriptor is outside the budget; free a slot for
        // the open that follows the rename
        self.fd_cache.shrink_cache();
        self.install(temp, name)?;
        cached.keep();

        Stats::incr(&stats.tables_persisted);
        Stats::add(&stats.chunks_persisted, chunk_count as u64);
        Stats::add(&stats.bytes_persisted, data.len() as u64);
        tracing::info!(table = %name, chunks = chunk_count, bytes = data.len(), "Persisted table");

        // Open
        self.open(name, chunk_count, stats)
    }

    fn temp_file(&self) -> Result<NamedTempFile> {
        Ok(tempfile::Builder::new()
            .prefix(TEMP_TABLE_PREFIX)
            .tempfile_in(&self.dir)?)
    }

    /// Insert an index under an entry lock so reclaim cannot drop it
    /// mid-insert. The entry is removed again unless the table is installed.
    fn cache_index(&self, name: Address, index: Arc<TableIndex>) -> Result<PendingIndex<'_>> {
        let cache = self.index_cache.as_deref();
        if let Some(cache) = cache {
            cache.lock_entry(name);
            cache.put(name, index);
            cache.unlock_entry(name)?;
        }
        Ok(PendingIndex {
            cache,
            name,
            installed: false,
        })
    }

    /// Rename the temp file to its final name. The only step that makes a
    /// table visible.
    fn install(&self, temp: NamedTempFile, name: Address) -> Result<()> {
        let path = table_file_path(&self.dir, &name);

        temp.persist(&path).map_err(|e| StoreError::Io(e.error))?;

        if self.sync_writes {
            sync_dir(&self.dir)?;
        }
        Ok(())
    }
}

impl TablePersister for FsTablePersister {
    fn open(&self, name: Address, chunk_count: u32, stats: &Stats) -> Result<Arc<dyn ChunkSource>> {
        let source = FileChunkSource::open(
            name,
            chunk_count,
            Arc::clone(&self.fd_cache),
            self.index_cache.as_deref(),
            stats,
        )?;
        Stats::incr(&stats.tables_opened);
        Ok(Arc::new(source))
    }

    fn persist(
        &self,
        ctx: &CancelToken,
        memtable: MemTable,
        haver: &dyn ChunkHaver,
        stats: &Stats,
    ) -> Result<Arc<dyn ChunkSource>> {
        let written = memtable.write(haver, stats)?;
        self.persist_table(ctx, written.name, &written.data, written.chunk_count, stats)
    }

    fn conjoin_all(
        &self,
        ctx: &CancelToken,
        sources: &[Arc<dyn ChunkSource>],
        stats: &Stats,
    ) -> Result<Arc<dyn ChunkSource>> {
        let plan = plan_conjoin(sources)?;
        if plan.chunk_count == 0 {
            return Ok(Arc::new(EmptyChunkSource));
        }

        let name = plan.name;
        let mut temp = self.temp_file()?;

        for sws in &plan.sources {
            let mut reader = sws.source.reader()?;
            let copied = copy_section(ctx, &mut reader, temp.as_file_mut(), sws.data_len)?;
            if copied != sws.data_len {
                return Err(StoreError::ShortCopy {
                    expected: sws.data_len,
                    copied,
                });
            }
        }

        temp.write_all(&plan.merged_index)?;
        if self.sync_writes {
            temp.as_file().sync_all()?;
        }

        let index = Arc::new(TableIndex::parse(&plan.merged_index)?);
        let cached = self.cache_index(name, index)?;
        ctx.check()?;

        self.fd_cache.shrink_cache();
        self.install(temp, name)?;
        cached.keep();

        Stats::incr(&stats.conjoins);
        Stats::add(&stats.tables_conjoined, plan.sources.len() as u64);
        Stats::add(&stats.chunks_conjoined, plan.chunk_count as u64);
        Stats::add(&stats.bytes_conjoined, plan.data_len());
        tracing::info!(
            table = %name,
            sources = plan.sources.len(),
            chunks = plan.chunk_count,
            duplicates = plan.duplicates.len(),
            "Conjoined tables"
        );

        self.open(name, plan.chunk_count, stats)
    }
}

/// Index cached ahead of a rename. Dropped without [`PendingIndex::keep`]
/// it evicts the entry, so a failed or cancelled operation never leaves an
/// index for a file that does not exist.
struct PendingIndex<'a> {
    cache: Option<&'a IndexCache>,
    name: Address,
    installed: bool,
}

impl PendingIndex<'_> {
    fn keep(mut self) {
        self.installed = true;
    }
}

impl Drop for PendingIndex<'_> {
    fn drop(&mut self) {
        if self.installed {
            return;
        }
        if let Some(cache) = self.cache {
            cache.remove(&self.name);
        }
    }
}

/// Copy up to `len` bytes in blocks, checking for cancellation between
/// blocks. Returns the number of bytes copied, which is short only if the
/// reader ran dry.
fn copy_section(
    ctx: &CancelToken,
    reader: &mut dyn Read,
    writer: &mut File,
    len: u64,
) -> Result<u64> {
    let mut buf = vec![0u8; COPY_BLOCK_SIZE.min(len as usize)];
    let mut copied = 0u64;

    while copied < len {
        ctx.check()?;

        let want = (len - copied).min(buf.len() as u64) as usize;
        let n = match reader.read(&mut buf[..want]) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };

        writer.write_all(&buf[..n])?;
        copied += n as u64;
    }

    Ok(copied)
}

/// fsync a directory so a rename inside it is durable
#[cfg(unix)]
pub(crate) fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}
