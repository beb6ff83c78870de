//! Chunk sources
//!
//! Read-only views of one table, plus the haver trait used to avoid
//! rewriting chunks that are already durable.

use std::io::{self, Read};
use std::sync::Arc;

use bytes::Bytes;

use crate::address::Address;
use crate::error::Result;
use crate::stats::Stats;
use crate::table::TableIndex;

/// Answers "is this chunk already durably stored?"
pub trait ChunkHaver: Send + Sync {
    fn has(&self, address: &Address) -> Result<bool>;
}

/// Read-only handle to one physical table.
///
/// Remote persisters provide their own implementations; the local
/// filesystem one is [`FileChunkSource`](super::FileChunkSource).
pub trait ChunkSource: ChunkHaver {
    /// Content-derived table name
    fn name(&self) -> Address;

    /// Number of chunks in the table
    fn chunk_count(&self) -> u32;

    /// Length of the data section (chunk payloads, no index)
    fn data_len(&self) -> u64;

    /// Resolve a chunk address to its payload
    fn get(&self, address: &Address, stats: &Stats) -> Result<Option<Bytes>>;

    /// Parsed index of the table
    fn index(&self) -> Result<Arc<TableIndex>>;

    /// Sequential reader over exactly the data section
    fn reader(&self) -> Result<Box<dyn Read + '_>>;
}

// =============================================================================
// Empty Sentinel
// =============================================================================

/// Stable stand-in for a table with no chunks. Never backed by a file.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyChunkSource;

impl ChunkHaver for EmptyChunkSource {
    fn has(&self, _address: &Address) -> Result<bool> {
        Ok(false)
    }
}

impl ChunkSource for EmptyChunkSource {
    fn name(&self) -> Address {
        Address::EMPTY
    }

    fn chunk_count(&self) -> u32 {
        0
    }

    fn data_len(&self) -> u64 {
        0
    }

    fn get(&self, _address: &Address, _stats: &Stats) -> Result<Option<Bytes>> {
        Ok(None)
    }

    fn index(&self) -> Result<Arc<TableIndex>> {
        Ok(Arc::new(TableIndex::from_entries(Vec::new(), 0)?))
    }

    fn reader(&self) -> Result<Box<dyn Read + '_>> {
        Ok(Box::new(io::empty()))
    }
}

// =============================================================================
// Source Sets
// =============================================================================

/// An owned list of sources, usable as a haver over all of them
#[derive(Clone, Default)]
pub struct ChunkSources(Vec<Arc<dyn ChunkSource>>);

impl ChunkSources {
    pub fn new(sources: Vec<Arc<dyn ChunkSource>>) -> Self {
        Self(sources)
    }

    /// First payload found for `address`
    pub fn get(&self, address: &Address, stats: &Stats) -> Result<Option<Bytes>> {
        for source in &self.0 {
            if let Some(data) = source.get(address, stats)? {
                return Ok(Some(data));
            }
        }
        Ok(None)
    }

    /// Total chunks across all sources
    pub fn chunk_count(&self) -> u64 {
        self.0.iter().map(|s| s.chunk_count() as u64).sum()
    }

    pub fn as_slice(&self) -> &[Arc<dyn ChunkSource>] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<Arc<dyn ChunkSource>> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl ChunkHaver for ChunkSources {
    fn has(&self, address: &Address) -> Result<bool> {
        for source in &self.0 {
            if source.has(address)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
