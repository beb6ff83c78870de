//! # chunkstore
//!
//! A content-addressed chunk store with:
//! - Immutable table files named by the hash of their contents
//! - Crash-safe persistence (temp file + atomic rename + fsync)
//! - Bounded caches for open file handles and parsed indexes
//! - Conjoin: merging many tables into one without rehashing chunks
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Engine                              │
//! │            (Single Writer / Multi Reader)                    │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌────────────────┐
//!   │  MemTable   │─ flush ─►│ StorageManager │── manifest
//!   │  (RwLock)   │          └───────┬────────┘
//!   └─────────────┘                  │
//!                                    ▼
//!                          ┌───────────────────┐
//!                          │ FsTablePersister  │
//!                          │ persist / conjoin │
//!                          └────┬─────────┬────┘
//!                               │         │
//!                               ▼         ▼
//!                        ┌──────────┐ ┌────────────┐
//!                        │ FdCache  │ │ IndexCache │
//!                        └──────────┘ └────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod address;
pub mod cancel;
pub mod chunk;
pub mod stats;

pub mod table;
pub mod cache;
pub mod memtable;
pub mod storage;
pub mod engine;
pub mod diff;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, StoreError};
pub use config::Config;
pub use engine::Engine;
pub use address::Address;
pub use cancel::CancelToken;
pub use chunk::Chunk;
pub use stats::{Stats, StatsSnapshot};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of chunkstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
