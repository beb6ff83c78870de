//! Error types for chunkstore
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

use crate::address::Address;

/// Result type alias using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

/// Unified error type for chunkstore operations
#[derive(Debug, Error)]
pub enum StoreError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Short copy: expected {expected} bytes, copied {copied}")]
    ShortCopy { expected: u64, copied: u64 },

    #[error("Operation cancelled")]
    Cancelled,

    // -------------------------------------------------------------------------
    // Table Errors
    // -------------------------------------------------------------------------
    #[error("Corrupt table index: {0}")]
    CorruptIndex(String),

    #[error("Corrupt chunk {address}: {reason}")]
    CorruptChunk { address: Address, reason: String },

    #[error("Table not found: {0}")]
    TableNotFound(Address),

    // -------------------------------------------------------------------------
    // Cache Errors
    // -------------------------------------------------------------------------
    #[error("File descriptor budget of {budget} exhausted")]
    FdBudgetExhausted { budget: usize },

    #[error("Index cache entry {0} is not locked")]
    EntryNotLocked(Address),

    // -------------------------------------------------------------------------
    // Manifest / Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Diff Errors
    // -------------------------------------------------------------------------
    #[error("Diff with delta = 0 for key: {0}")]
    DeltaInvariantViolation(String),

    #[error("Unexpected change: {0}")]
    UnexpectedChange(String),

    #[error("Diff producer panicked: {0}")]
    ProducerPanicked(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<bincode::Error> for StoreError {
    fn from(err: bincode::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
