//! BLAKE3 hashing for live-set partition keys
//!
//! Storage locations can be arbitrarily long URIs, so partitions of the live
//! set are keyed by the BLAKE3 hash of the canonical location instead.

use serde::{Deserialize, Serialize};

/// A BLAKE3 hash (32 bytes)
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Blake3Hash([u8; 32]);

impl Blake3Hash {
    /// Create a new Blake3Hash from bytes
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Convert to lowercase hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 16 hex characters, enough to name a partition
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl std::fmt::Debug for Blake3Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Blake3Hash({})", self.to_hex())
    }
}

/// Hash bytes using BLAKE3
pub fn hash_bytes(data: &[u8]) -> Blake3Hash {
    let hash = blake3::hash(data);
    Blake3Hash::from_bytes(*hash.as_bytes())
}

/// Partition key for a canonical storage location
pub fn partition_key(location: &str) -> Blake3Hash {
    hash_bytes(location.as_bytes())
}
