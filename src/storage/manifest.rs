//! Manifest
//!
//! Records which tables make up the store. Replaced atomically (temp file +
//! rename) after every flush and conjoin, so a crash leaves either the old
//! or the new table set, never a mix.
//!
//! ## File Format
//! ```text
//! ┌──────────┬──────────┬──────────┬──────────────────────────┐
//! │Magic (4) │ CRC (4)  │ Len (4)  │ bincode(Manifest)        │
//! └──────────┴──────────┴──────────┴──────────────────────────┘
//! ```

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::error::{Result, StoreError};

use super::persister::sync_dir;

/// Manifest file name inside the data directory
pub const MANIFEST_FILENAME: &str = "manifest";

/// Prefix of in-flight manifest temp files
pub const TEMP_MANIFEST_PREFIX: &str = "nbs_manifest_";

const MANIFEST_MAGIC: &[u8; 4] = b"NBMF";

/// Magic (4) + CRC (4) + Len (4)
const MANIFEST_HEADER_SIZE: usize = 12;

/// Name and size of one live table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: Address,
    pub chunk_count: u32,
}

/// The current table set, newest table first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Bumped on every update
    pub version: u64,
    pub tables: Vec<TableSpec>,
}

impl Manifest {
    /// Path of the manifest in `dir`
    pub fn path(dir: &Path) -> PathBuf {
        dir.join(MANIFEST_FILENAME)
    }

    /// Load the manifest from `dir`; a missing file is an empty manifest
    pub fn load(dir: &Path) -> Result<Self> {
        match fs::read(Self::path(dir)) {
            Ok(bytes) => Self::decode(&bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically replace the manifest in `dir`
    pub fn store(&self, dir: &Path, sync: bool) -> Result<()> {
        let bytes = self.encode()?;

        let mut temp = tempfile::Builder::new()
            .prefix(TEMP_MANIFEST_PREFIX)
            .tempfile_in(dir)?;
        temp.write_all(&bytes)?;
        if sync {
            temp.as_file().sync_all()?;
        }
        temp.persist(Self::path(dir))
            .map_err(|e| StoreError::Io(e.error))?;
        // Callers delete conjoined tables right after this returns
        if sync {
            sync_dir(dir)?;
        }

        tracing::debug!(version = self.version, tables = self.tables.len(), "Stored manifest");
        Ok(())
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = bincode::serialize(self)?;
        let len = u32::try_from(payload.len())
            .map_err(|_| StoreError::Manifest(format!("payload of {} bytes too large", payload.len())))?;

        let mut bytes = Vec::with_capacity(MANIFEST_HEADER_SIZE + payload.len());
        bytes.extend_from_slice(MANIFEST_MAGIC);
        bytes.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        bytes.extend_from_slice(&len.to_le_bytes());
        bytes.extend_from_slice(&payload);
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < MANIFEST_HEADER_SIZE {
            return Err(StoreError::Manifest(format!(
                "{} bytes is too short for a manifest header",
                bytes.len()
            )));
        }
        if &bytes[0..4] != MANIFEST_MAGIC {
            return Err(StoreError::Manifest(format!(
                "invalid manifest magic: {:?}",
                &bytes[0..4]
            )));
        }

        let stored_crc = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;

        let payload = &bytes[MANIFEST_HEADER_SIZE..];
        if payload.len() != len {
            return Err(StoreError::Manifest(format!(
                "payload is {} bytes, header declares {}",
                payload.len(),
                len
            )));
        }

        let computed = crc32fast::hash(payload);
        if computed != stored_crc {
            return Err(StoreError::Manifest(format!(
                "checksum mismatch: stored {:08x}, computed {:08x}",
                stored_crc, computed
            )));
        }

        Ok(bincode::deserialize(payload)?)
    }

    /// Total chunks across all tables
    pub fn chunk_count(&self) -> u64 {
        self.tables.iter().map(|t| t.chunk_count as u64).sum()
    }
}
