//! Block-list digests using BLAKE3

use std::fmt;

use serde::{Deserialize, Serialize};

/// A 256-bit BLAKE3 digest.
///
/// In record keys this identifies a file's block list: the digest over
/// the concatenated block hashes in file order. Stable across peers
/// and invocations, so identical content produces identical keys
/// everywhere. Ordered byte-wise lexicographically because the version
/// order uses the digest as its final tie-breaker.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Hash arbitrary bytes
    #[must_use]
    pub fn from_bytes(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Digest a sequence of hashes in order.
    ///
    /// This is how block lists are folded into a single key component:
    /// each 32-byte hash is fed to the hasher in file order.
    #[must_use]
    pub fn over<'a>(hashes: impl IntoIterator<Item = &'a ContentHash>) -> Self {
        let mut hasher = blake3::Hasher::new();
        for hash in hashes {
            hasher.update(&hash.0);
        }
        Self(*hasher.finalize().as_bytes())
    }

    /// Construct from raw bytes
    #[must_use]
    pub fn from_raw(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get raw bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "ContentHash({})", hex.get(..16).unwrap_or(&hex))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "{}", hex.get(..16).unwrap_or(&hex))
    }
}
