//! Table Index
//!
//! Parsed, read-only map from chunk address to its location inside one
//! table file, and the merge that conjoin uses to describe a concatenated
//! layout.

use std::collections::HashSet;
use std::mem;

use bytes::{BufMut, BytesMut};

use crate::address::{Address, ADDRESS_SIZE};
use crate::error::{Result, StoreError};

use super::{ENTRY_SIZE, FOOTER_CRC_PREFIX, FOOTER_SIZE, MAGIC, VERSION};

/// Location of one chunk inside a table file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Chunk address
    pub address: Address,
    /// Byte offset from the start of the file
    pub offset: u64,
    /// Payload length
    pub length: u32,
    /// CRC32 of the payload
    pub checksum: u32,
}

impl IndexEntry {
    /// Offset one past the last payload byte
    pub fn end(&self) -> u64 {
        self.offset + self.length as u64
    }
}

// =============================================================================
// Footer
// =============================================================================

/// Decoded table footer
#[derive(Debug, Clone, Copy)]
pub(crate) struct Footer {
    pub chunk_count: u32,
    pub data_len: u64,
    pub index_crc: u32,
}

impl Footer {
    pub(crate) fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != FOOTER_SIZE {
            return Err(corrupt(format!(
                "footer must be {} bytes, got {}",
                FOOTER_SIZE,
                bytes.len()
            )));
        }

        if &bytes[20..24] != MAGIC {
            return Err(corrupt(format!(
                "invalid table magic: expected NBTB, got {:?}",
                &bytes[20..24]
            )));
        }

        let version = u16::from_le_bytes([bytes[16], bytes[17]]);
        if version != VERSION {
            return Err(corrupt(format!("unsupported table version: {}", version)));
        }

        Ok(Self {
            chunk_count: read_u32(bytes, 0),
            data_len: read_u64(bytes, 4),
            index_crc: read_u32(bytes, 12),
        })
    }

    /// Length of the index tail (entries + footer) this footer describes
    pub(crate) fn index_len(&self) -> Result<usize> {
        (self.chunk_count as usize)
            .checked_mul(ENTRY_SIZE)
            .and_then(|n| n.checked_add(FOOTER_SIZE))
            .ok_or_else(|| corrupt(format!("chunk count {} overflows", self.chunk_count)))
    }
}

// =============================================================================
// TableIndex
// =============================================================================

/// Parsed index of one table file.
///
/// Entries are kept in physical order for scanning and merging; a sorted
/// address table next to them gives O(log n) lookups.
#[derive(Debug, Clone)]
pub struct TableIndex {
    /// Entries in physical (offset) order
    entries: Vec<IndexEntry>,
    /// (address, ordinal into `entries`), sorted by address
    by_address: Vec<(Address, u32)>,
    /// Length of the data section the entries point into
    data_len: u64,
}

impl TableIndex {
    /// Build an index from entries in physical order.
    ///
    /// Every range must lie inside `data_len`, ranges must not overlap and
    /// addresses must be unique.
    pub fn from_entries(entries: Vec<IndexEntry>, data_len: u64) -> Result<Self> {
        if entries.len() > u32::MAX as usize {
            return Err(corrupt(format!("{} chunks exceed u32::MAX", entries.len())));
        }

        let mut prev_end = 0u64;
        for entry in &entries {
            if entry.offset < prev_end {
                return Err(corrupt(format!(
                    "chunk {} at offset {} overlaps previous chunk ending at {}",
                    entry.address, entry.offset, prev_end
                )));
            }
            let end = entry
                .offset
                .checked_add(entry.length as u64)
                .ok_or_else(|| corrupt(format!("chunk {} range overflows", entry.address)))?;
            if end > data_len {
                return Err(corrupt(format!(
                    "chunk {} range {}..{} exceeds data section of {} bytes",
                    entry.address, entry.offset, end, data_len
                )));
            }
            prev_end = end;
        }

        let mut by_address: Vec<(Address, u32)> = entries
            .iter()
            .enumerate()
            .map(|(ordinal, entry)| (entry.address, ordinal as u32))
            .collect();
        by_address.sort_unstable_by_key(|(address, _)| *address);

        if let Some(pair) = by_address.windows(2).find(|pair| pair[0].0 == pair[1].0) {
            return Err(corrupt(format!("duplicate address {}", pair[0].0)));
        }

        Ok(Self {
            entries,
            by_address,
            data_len,
        })
    }

    /// Parse an index from the tail of `bytes`.
    ///
    /// `bytes` is either a whole table image or a bare index blob (entries +
    /// footer). Any structural or checksum problem is `CorruptIndex`.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < FOOTER_SIZE {
            return Err(corrupt(format!(
                "{} bytes is too short for a table footer",
                bytes.len()
            )));
        }

        let footer_start = bytes.len() - FOOTER_SIZE;
        let footer = Footer::decode(&bytes[footer_start..])?;

        let entries_len = footer.index_len()? - FOOTER_SIZE;
        if entries_len > footer_start {
            return Err(corrupt(format!(
                "declared {} chunks need {} index bytes, only {} present",
                footer.chunk_count, entries_len, footer_start
            )));
        }

        let entries_start = footer_start - entries_len;
        if entries_start != 0 && entries_start as u64 != footer.data_len {
            return Err(corrupt(format!(
                "data section is {} bytes, footer declares {}",
                entries_start, footer.data_len
            )));
        }

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&bytes[entries_start..footer_start]);
        hasher.update(&bytes[footer_start..footer_start + FOOTER_CRC_PREFIX]);
        let computed = hasher.finalize();
        if computed != footer.index_crc {
            return Err(corrupt(format!(
                "index checksum mismatch: stored {:08x}, computed {:08x}",
                footer.index_crc, computed
            )));
        }

        let entries = bytes[entries_start..footer_start]
            .chunks_exact(ENTRY_SIZE)
            .map(decode_entry)
            .collect();

        Self::from_entries(entries, footer.data_len)
    }

    /// Serialize as a bare index blob (entries + footer)
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.to_vec()
    }

    /// Append entries + footer to `buf`
    pub fn encode_into(&self, buf: &mut BytesMut) {
        let start = buf.len();

        for entry in &self.entries {
            buf.put_slice(entry.address.as_bytes());
            buf.put_u64_le(entry.offset);
            buf.put_u32_le(entry.length);
            buf.put_u32_le(entry.checksum);
        }

        buf.put_u32_le(self.chunk_count());
        buf.put_u64_le(self.data_len);

        // CRC covers the entries and the footer fields written so far
        let crc = crc32fast::hash(&buf[start..]);
        buf.put_u32_le(crc);
        buf.put_u16_le(VERSION);
        buf.put_u16_le(0);
        buf.put_slice(MAGIC);
    }

    /// Look up a chunk by address, O(log n)
    pub fn lookup(&self, address: &Address) -> Option<&IndexEntry> {
        self.by_address
            .binary_search_by(|(candidate, _)| candidate.cmp(address))
            .ok()
            .map(|pos| &self.entries[self.by_address[pos].1 as usize])
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.lookup(address).is_some()
    }

    /// Entries in physical order
    pub fn iter(&self) -> impl Iterator<Item = &IndexEntry> + '_ {
        self.entries.iter()
    }

    /// Addresses in physical order
    pub fn addresses(&self) -> impl Iterator<Item = Address> + '_ {
        self.entries.iter().map(|entry| entry.address)
    }

    pub fn chunk_count(&self) -> u32 {
        self.entries.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Length of the data section
    pub fn data_len(&self) -> u64 {
        self.data_len
    }

    /// Length of the serialized index (entries + footer)
    pub fn encoded_len(&self) -> usize {
        self.entries.len() * ENTRY_SIZE + FOOTER_SIZE
    }

    /// Total table file length (data + index)
    pub fn table_len(&self) -> u64 {
        self.data_len + self.encoded_len() as u64
    }

    /// Approximate heap footprint, used for index cache accounting
    pub fn size_estimate(&self) -> usize {
        mem::size_of::<Self>()
            + self.entries.capacity() * mem::size_of::<IndexEntry>()
            + self.by_address.capacity() * mem::size_of::<(Address, u32)>()
    }
}

// =============================================================================
// Merge
// =============================================================================

/// Result of merging several indexes into one concatenated layout
#[derive(Debug, Clone)]
pub struct MergedIndex {
    /// Index over the concatenated data sections
    pub index: TableIndex,
    /// Addresses found in more than one input; each resolves to its first copy
    pub duplicates: Vec<Address>,
}

impl MergedIndex {
    /// Serialized index blob
    pub fn to_bytes(&self) -> Vec<u8> {
        self.index.encode()
    }
}

/// Merge indexes whose data sections will be concatenated in the given order.
///
/// Offsets of each input are shifted by the data lengths of the inputs before
/// it. An address present in more than one input keeps its first location;
/// the later copy stays in the data section as unreferenced bytes and is
/// reported in [`MergedIndex::duplicates`].
pub fn merge_indexes<'a, I>(indexes: I) -> Result<MergedIndex>
where
    I: IntoIterator<Item = &'a TableIndex>,
{
    let mut seen: HashSet<Address> = HashSet::new();
    let mut entries = Vec::new();
    let mut duplicates = Vec::new();
    let mut base = 0u64;

    for index in indexes {
        entries.reserve(index.entries.len());
        for entry in index.iter() {
            if !seen.insert(entry.address) {
                tracing::warn!(address = %entry.address, "Duplicate chunk in merged indexes, keeping first copy");
                duplicates.push(entry.address);
                continue;
            }
            entries.push(IndexEntry {
                offset: base + entry.offset,
                ..*entry
            });
        }
        base = base
            .checked_add(index.data_len)
            .ok_or_else(|| corrupt("merged data section length overflows".to_string()))?;
    }

    let index = TableIndex::from_entries(entries, base)?;
    Ok(MergedIndex { index, duplicates })
}

// =============================================================================
// Helpers
// =============================================================================

fn corrupt(reason: String) -> StoreError {
    StoreError::CorruptIndex(reason)
}

fn decode_entry(bytes: &[u8]) -> IndexEntry {
    let mut address = [0u8; ADDRESS_SIZE];
    address.copy_from_slice(&bytes[..ADDRESS_SIZE]);
    IndexEntry {
        address: Address::new(address),
        offset: read_u64(bytes, 20),
        length: read_u32(bytes, 28),
        checksum: read_u32(bytes, 32),
    }
}

fn read_u32(bytes: &[u8], pos: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[pos..pos + 4]);
    u32::from_le_bytes(buf)
}

fn read_u64(bytes: &[u8], pos: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[pos..pos + 8]);
    u64::from_le_bytes(buf)
}
