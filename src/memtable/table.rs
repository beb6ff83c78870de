//! MemTable implementation
//!
//! Insertion-ordered chunk map with a running byte size.

use std::collections::HashMap;

use bytes::Bytes;

use crate::address::Address;
use crate::chunk::Chunk;
use crate::error::Result;
use crate::stats::Stats;
use crate::storage::ChunkHaver;
use crate::table::TableWriter;

/// Serialized form of a memtable
#[derive(Debug, Clone)]
pub struct WrittenTable {
    /// Content-derived table name (`Address::EMPTY` when nothing was written)
    pub name: Address,
    /// Complete table image: data section + index + footer
    pub data: Bytes,
    /// Chunks written (excludes chunks the haver already stored)
    pub chunk_count: u32,
}

/// In-memory table of pending chunks
#[derive(Debug, Clone, Default)]
pub struct MemTable {
    /// address → payload
    chunks: HashMap<Address, Bytes>,
    /// Insertion order
    order: Vec<Address>,
    /// Sum of payload sizes
    size: usize,
}

impl MemTable {
    /// Create a new empty MemTable
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a chunk. Returns false if a chunk with the same address is
    /// already present.
    pub fn add_chunk(&mut self, chunk: Chunk) -> bool {
        let address = chunk.address();
        if self.chunks.contains_key(&address) {
            return false;
        }

        self.size += chunk.len();
        self.order.push(address);
        self.chunks.insert(address, chunk.into_data());
        true
    }

    /// Add a payload, returning its address
    pub fn add(&mut self, data: impl Into<Bytes>) -> Address {
        let chunk = Chunk::new(data);
        let address = chunk.address();
        self.add_chunk(chunk);
        address
    }

    /// Get a pending payload by address
    pub fn get(&self, address: &Address) -> Option<Bytes> {
        self.chunks.get(address).cloned()
    }

    pub fn has(&self, address: &Address) -> bool {
        self.chunks.contains_key(address)
    }

    /// Number of pending chunks
    pub fn count(&self) -> usize {
        self.order.len()
    }

    /// Sum of pending payload sizes (in bytes)
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Check if should flush (size >= limit)
    pub fn should_flush(&self, size_limit: usize) -> bool {
        self.size >= size_limit
    }

    /// Addresses in insertion order
    pub fn addresses(&self) -> impl Iterator<Item = Address> + '_ {
        self.order.iter().copied()
    }

    /// Serialize every chunk `haver` does not already store.
    ///
    /// Chunks are laid out in address order and the table is named by the
    /// hash of the sorted addresses, so the same chunk set always produces
    /// the same bytes and name regardless of insertion order.
    pub fn write(&self, haver: &dyn ChunkHaver, stats: &Stats) -> Result<WrittenTable> {
        let mut addresses = Vec::with_capacity(self.order.len());
        let mut skipped = 0u64;
        for address in &self.order {
            if haver.has(address)? {
                skipped += 1;
                continue;
            }
            addresses.push(*address);
        }
        addresses.sort_unstable();
        Stats::add(&stats.chunks_skipped, skipped);

        let mut writer = TableWriter::with_capacity(self.size);
        for address in &addresses {
            if let Some(payload) = self.chunks.get(address) {
                writer.add(*address, payload)?;
            }
        }
        let chunk_count = writer.chunk_count();
        let (data, _) = writer.finish()?;

        let name = if addresses.is_empty() {
            Address::EMPTY
        } else {
            Address::of_set(addresses)
        };

        Ok(WrittenTable {
            name,
            data,
            chunk_count,
        })
    }
}
