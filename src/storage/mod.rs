//! Storage Module
//!
//! Durable table storage: persisting memtables, opening tables, conjoining
//! them, and tracking the live set in a manifest.
//!
//! ## Responsibilities
//! - Write memtables to content-addressed table files
//! - Serve chunk reads through cached file handles and indexes
//! - Merge many tables into one without re-hashing or re-sorting chunks
//! - Keep the live table set crash consistent
//!
//! ## Data Directory
//! ```text
//! data_dir/
//! ├── manifest                  live table set (newest first)
//! ├── 3f9a…c01e                 table file, named by content (40 hex)
//! ├── 81b2…77d0
//! └── nbs_table_XXXXXX          in-flight temp file (orphan if found on open)
//! ```

mod conjoin;
mod manager;
mod manifest;
mod persister;
mod reader;
mod source;

pub use conjoin::{plan_conjoin, ConjoinPlan, ConjoinPolicy, MergeAll, SizeTiered, SourceWithSize};
pub use manager::{remove_garbage, CleanupReport, StorageManager};
pub use manifest::{Manifest, TableSpec, MANIFEST_FILENAME, TEMP_MANIFEST_PREFIX};
pub use persister::{FsTablePersister, TablePersister, TEMP_TABLE_PREFIX};
pub use reader::FileChunkSource;
pub use source::{ChunkHaver, ChunkSource, ChunkSources, EmptyChunkSource};
