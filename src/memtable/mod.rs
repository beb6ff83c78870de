//! MemTable Module
//!
//! In-memory staging area for chunks not yet persisted.
//!
//! ## Responsibilities
//! - Accumulate chunks from a writer, deduplicated by address
//! - Track size for flush triggers
//! - Serialize into a complete table image on demand
//!
//! ## Lifecycle
//! Created empty, filled by the writer, then consumed by value by
//! `TablePersister::persist`. A memtable is never reused after it has been
//! written.

mod table;

pub use table::{MemTable, WrittenTable};
