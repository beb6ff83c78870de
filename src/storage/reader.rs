//! File-backed chunk source
//!
//! Opens a table file through the shared [`FdCache`] and resolves chunk
//! addresses with its parsed index: O(log n) lookup, one positional read.

use std::io::{self, Read};
use std::sync::Arc;

use bytes::Bytes;

use crate::address::Address;
use crate::cache::{FdCache, FileRef, IndexCache};
use crate::error::{Result, StoreError};
use crate::stats::Stats;
use crate::table::{Footer, TableIndex, FOOTER_SIZE};

use super::{ChunkHaver, ChunkSource};

/// Read-only handle to one table file on local disk.
///
/// Holds no descriptor of its own: each read borrows one from the
/// `FdCache` for its duration.
pub struct FileChunkSource {
    name: Address,
    index: Arc<TableIndex>,
    fd_cache: Arc<FdCache>,
}

impl FileChunkSource {
    /// Open table `name`, taking its index from `index_cache` or re-parsing
    /// it from the file tail.
    ///
    /// The index must describe exactly `chunk_count` chunks.
    pub fn open(
        name: Address,
        chunk_count: u32,
        fd_cache: Arc<FdCache>,
        index_cache: Option<&IndexCache>,
        stats: &Stats,
    ) -> Result<Self> {
        let cached = index_cache.and_then(|cache| cache.get(&name));

        let index = match cached {
            Some(index) => {
                Stats::incr(&stats.index_cache_hits);
                index
            }
            None => {
                Stats::incr(&stats.index_cache_misses);
                let index = Arc::new(read_index(&fd_cache, name)?);
                if let Some(cache) = index_cache {
                    cache.lock_entry(name);
                    cache.put(name, Arc::clone(&index));
                    cache.unlock_entry(name)?;
                }
                index
            }
        };

        if index.chunk_count() != chunk_count {
            return Err(StoreError::CorruptIndex(format!(
                "table {} holds {} chunks, expected {}",
                name,
                index.chunk_count(),
                chunk_count
            )));
        }

        Ok(Self {
            name,
            index,
            fd_cache,
        })
    }
}

impl ChunkHaver for FileChunkSource {
    fn has(&self, address: &Address) -> Result<bool> {
        Ok(self.index.contains(address))
    }
}

impl ChunkSource for FileChunkSource {
    fn name(&self) -> Address {
        self.name
    }

    fn chunk_count(&self) -> u32 {
        self.index.chunk_count()
    }

    fn data_len(&self) -> u64 {
        self.index.data_len()
    }

    fn get(&self, address: &Address, stats: &Stats) -> Result<Option<Bytes>> {
        let Some(entry) = self.index.lookup(address) else {
            return Ok(None);
        };

        let mut payload = vec![0u8; entry.length as usize];
        {
            let file = self.fd_cache.ref_file(self.name)?;
            file.read_exact_at(&mut payload, entry.offset)?;
        }

        let checksum = crc32fast::hash(&payload);
        if checksum != entry.checksum {
            return Err(StoreError::CorruptChunk {
                address: *address,
                reason: format!(
                    "checksum mismatch in table {}: stored {:08x}, computed {:08x}",
                    self.name, entry.checksum, checksum
                ),
            });
        }

        Stats::incr(&stats.chunks_read);
        Stats::add(&stats.bytes_read, payload.len() as u64);

        Ok(Some(Bytes::from(payload)))
    }

    fn index(&self) -> Result<Arc<TableIndex>> {
        Ok(Arc::clone(&self.index))
    }

    fn reader(&self) -> Result<Box<dyn Read + '_>> {
        Ok(Box::new(SectionReader {
            file: self.fd_cache.ref_file(self.name)?,
            pos: 0,
            end: self.index.data_len(),
        }))
    }
}

/// Reads `[0, end)` of a table file through a borrowed handle
struct SectionReader<'a> {
    file: FileRef<'a>,
    pos: u64,
    end: u64,
}

impl Read for SectionReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.end - self.pos;
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }

        let n = remaining.min(buf.len() as u64) as usize;
        self.file.read_exact_at(&mut buf[..n], self.pos)?;
        self.pos += n as u64;
        Ok(n)
    }
}

/// Parse the index stored at the tail of table `name`
fn read_index(fd_cache: &FdCache, name: Address) -> Result<TableIndex> {
    let file = fd_cache.ref_file(name)?;
    let file_len = file.file_len()?;

    if file_len < FOOTER_SIZE as u64 {
        return Err(StoreError::CorruptIndex(format!(
            "table {} is {} bytes, too short for a footer",
            name, file_len
        )));
    }

    let mut footer = [0u8; FOOTER_SIZE];
    file.read_exact_at(&mut footer, file_len - FOOTER_SIZE as u64)?;
    let index_len = Footer::decode(&footer)?.index_len()?;

    if index_len as u64 > file_len {
        return Err(StoreError::CorruptIndex(format!(
            "table {} is {} bytes, index needs {}",
            name, file_len, index_len
        )));
    }

    let mut tail = vec![0u8; index_len];
    file.read_exact_at(&mut tail, file_len - index_len as u64)?;
    let index = TableIndex::parse(&tail)?;

    if index.table_len() != file_len {
        return Err(StoreError::CorruptIndex(format!(
            "table {} is {} bytes, index describes {}",
            name,
            file_len,
            index.table_len()
        )));
    }

    tracing::debug!(table = %name, chunks = index.chunk_count(), "Parsed table index from disk");
    Ok(index)
}
