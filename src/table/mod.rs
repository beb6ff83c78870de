//! Table Module
//!
//! Immutable, content-addressed table files: a data section of chunk
//! payloads followed by an index that makes the file randomly readable by
//! chunk address.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ Data Section (variable)                                     │
//! │   chunk payloads, back to back                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Index Entries (36 bytes each, in physical order)            │
//! │   Address (20) | Offset: u64 (8) | Length: u32 (4) | CRC (4)│
//! ├─────────────────────────────────────────────────────────────┤
//! │ Footer (24 bytes)                                           │
//! │   ChunkCount: u32 (4) | DataLen: u64 (8) | IndexCRC: u32 (4)│
//! │   Version: u16 (2) | Reserved (2) | Magic: "NBTB" (4)       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! IndexCRC covers the entry bytes followed by the first 12 footer bytes.
//! A merged index produced during conjoin is the entries + footer with no
//! data section in front; [`TableIndex::parse`] accepts both forms.

mod index;
mod writer;

use std::path::{Path, PathBuf};

use crate::address::Address;

pub use index::{merge_indexes, IndexEntry, MergedIndex, TableIndex};
pub use writer::TableWriter;

pub(crate) use index::Footer;

// =============================================================================
// Shared Constants (used by index, writer, reader)
// =============================================================================

/// Magic bytes identifying a table file
pub(crate) const MAGIC: &[u8; 4] = b"NBTB";

/// Current table format version
pub(crate) const VERSION: u16 = 1;

/// Index entry size: Address (20) + Offset (8) + Length (4) + CRC (4) = 36 bytes
pub const ENTRY_SIZE: usize = 36;

/// Footer size: ChunkCount (4) + DataLen (8) + IndexCRC (4) + Version (2)
/// + Reserved (2) + Magic (4) = 24 bytes
pub const FOOTER_SIZE: usize = 24;

/// Bytes of the footer covered by the index CRC
pub(crate) const FOOTER_CRC_PREFIX: usize = 12;

// =============================================================================
// File Naming
// =============================================================================

/// Path of table `name` inside `dir`: the address in lowercase hex
pub fn table_file_path(dir: &Path, name: &Address) -> PathBuf {
    dir.join(name.to_string())
}

/// Parse a table name from a file path
/// "…/3f5c…e1" (40 hex chars) → Some(address)
pub fn parse_table_file_name(path: &Path) -> Option<Address> {
    let name = path.file_name()?.to_str()?;
    if name.len() != crate::address::ADDRESS_SIZE * 2 {
        return None;
    }
    name.parse().ok()
}
