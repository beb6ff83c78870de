//! Table Writer
//!
//! Lays chunks out into a complete in-memory table image (data section +
//! index + footer).

use bytes::{BufMut, Bytes, BytesMut};

use crate::address::Address;
use crate::error::{Result, StoreError};

use super::{IndexEntry, TableIndex};

/// Builder for a table image.
///
/// Chunks are written in the order they are added; callers that need a
/// deterministic image add them in address order.
pub struct TableWriter {
    /// Data section bytes written so far
    data: BytesMut,
    /// Index entries in physical order
    entries: Vec<IndexEntry>,
}

impl TableWriter {
    /// Create a writer with room for `capacity` data bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            entries: Vec::new(),
        }
    }

    /// Append one chunk payload
    pub fn add(&mut self, address: Address, payload: &[u8]) -> Result<()> {
        let length = u32::try_from(payload.len()).map_err(|_| StoreError::CorruptChunk {
            address,
            reason: format!("payload of {} bytes exceeds u32::MAX", payload.len()),
        })?;

        self.entries.push(IndexEntry {
            address,
            offset: self.data.len() as u64,
            length,
            checksum: crc32fast::hash(payload),
        });
        self.data.put_slice(payload);

        Ok(())
    }

    /// Number of chunks added
    pub fn chunk_count(&self) -> u32 {
        self.entries.len() as u32
    }

    /// Finish: append index and footer, return the image and its index
    pub fn finish(self) -> Result<(Bytes, TableIndex)> {
        let data_len = self.data.len() as u64;
        let index = TableIndex::from_entries(self.entries, data_len)?;

        let mut image = self.data;
        image.reserve(index.encoded_len());
        index.encode_into(&mut image);

        Ok((image.freeze(), index))
    }
}

impl Default for TableWriter {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}
