//! Chunks: immutable, content-addressed payloads.

use bytes::Bytes;

use crate::address::Address;

/// An immutable byte payload identified by its address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    address: Address,
    data: Bytes,
}

impl Chunk {
    /// Create a chunk, computing its address from the payload
    pub fn new(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            address: Address::of(&data),
            data,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_data(self) -> Bytes {
        self.data
    }
}
