//! Content addresses
//!
//! A chunk's address is the first 20 bytes of the SHA-512 of its payload.
//! Tables use the same type: a persisted table is named by the hash of its
//! sorted chunk addresses, a conjoined table by the hash of its sorted
//! constituent table names.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};

use crate::error::{Result, StoreError};

/// Width of an address in bytes
pub const ADDRESS_SIZE: usize = 20;

/// Fixed-width content hash identifying a chunk or a table file
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Address([u8; ADDRESS_SIZE]);

impl Address {
    /// Reserved name of the empty table sentinel
    pub const EMPTY: Address = Address([0u8; ADDRESS_SIZE]);

    /// Wrap raw address bytes
    pub const fn new(bytes: [u8; ADDRESS_SIZE]) -> Self {
        Address(bytes)
    }

    /// Address of a chunk payload
    pub fn of(data: &[u8]) -> Self {
        let digest = Sha512::digest(data);
        let mut bytes = [0u8; ADDRESS_SIZE];
        bytes.copy_from_slice(&digest[..ADDRESS_SIZE]);
        Address(bytes)
    }

    /// Hash a set of addresses into one name.
    ///
    /// The input is sorted first, so the result does not depend on the
    /// order the caller collected the addresses in.
    pub fn of_set(addresses: impl IntoIterator<Item = Address>) -> Self {
        let mut sorted: Vec<Address> = addresses.into_iter().collect();
        sorted.sort_unstable();

        let mut hasher = Sha512::new();
        for addr in &sorted {
            hasher.update(addr.0);
        }
        let digest = hasher.finalize();

        let mut bytes = [0u8; ADDRESS_SIZE];
        bytes.copy_from_slice(&digest[..ADDRESS_SIZE]);
        Address(bytes)
    }

    /// Build an address from a slice of exactly `ADDRESS_SIZE` bytes
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; ADDRESS_SIZE] = bytes.try_into().ok()?;
        Some(Address(bytes))
    }

    /// Raw address bytes
    pub fn as_bytes(&self) -> &[u8; ADDRESS_SIZE] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        *self == Address::EMPTY
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl FromStr for Address {
    type Err = StoreError;

    /// Parse the 40-character hex form used for table file names
    fn from_str(s: &str) -> Result<Self> {
        let decoded = hex::decode(s)
            .map_err(|e| StoreError::Serialization(format!("Invalid address {:?}: {}", s, e)))?;
        Address::from_slice(&decoded).ok_or_else(|| {
            StoreError::Serialization(format!(
                "Invalid address {:?}: expected {} bytes, got {}",
                s,
                ADDRESS_SIZE,
                decoded.len()
            ))
        })
    }
}
