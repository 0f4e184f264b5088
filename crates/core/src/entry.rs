//! File descriptors as announced by peers
//!
//! A [`FileEntry`] is the unit the index tracks: one version of one
//! named file, with its modification time, flag word, size, and the
//! ordered list of content blocks. Entries are plain values; the
//! scanner and the protocol layer construct them, the index only
//! stores and compares them.

use serde::{Deserialize, Serialize};

use crate::hash::ContentHash;

/// The file was deleted; the entry is a tombstone
pub const FLAG_DELETED: u32 = 1 << 12;
/// The entry exists but must not be synced from this peer
pub const FLAG_INVALID: u32 = 1 << 13;
/// POSIX permission bits occupy the low twelve bits of the flag word
pub const MODE_MASK: u32 = 0o7777;

/// A contiguous span of file content and its hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    /// Byte offset in the file
    pub offset: u64,
    /// Length of this block in bytes
    pub size: u32,
    /// BLAKE3 hash of the block content
    pub hash: ContentHash,
}

/// Metadata for a single version of a named file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Name, unique within one peer's view
    pub name: String,
    /// Version counter chosen by the writing peer
    pub version: u64,
    /// Modification time, seconds since the Unix epoch
    pub modified: i64,
    /// Flag word: tombstone/invalid markers plus POSIX mode bits
    pub flags: u32,
    /// File size in bytes
    pub size: u64,
    /// Content blocks in file order
    pub blocks: Vec<BlockInfo>,
}

impl FileEntry {
    /// Whether this entry is a deletion tombstone
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.flags & FLAG_DELETED != 0
    }

    /// Whether this entry is marked invalid
    #[must_use]
    pub fn is_invalid(&self) -> bool {
        self.flags & FLAG_INVALID != 0
    }

    /// POSIX permission bits of the flag word
    #[must_use]
    pub fn mode(&self) -> u32 {
        self.flags & MODE_MASK
    }

    /// Digest over the block hashes in file order.
    ///
    /// Part of the record key: two entries with the same name, version
    /// and modification time are still distinct if their block lists
    /// differ.
    #[must_use]
    pub fn blocks_digest(&self) -> ContentHash {
        ContentHash::over(self.blocks.iter().map(|b| &b.hash))
    }

    /// The tombstone superseding this entry.
    ///
    /// Keeps the name and modification time, drops the content, and
    /// carries `version`, which the caller must draw from the
    /// monotonic clock so the tombstone sorts newer than the entry it
    /// replaces.
    #[must_use]
    pub fn tombstone(&self, version: u64) -> Self {
        Self {
            name: self.name.clone(),
            version,
            modified: self.modified,
            flags: FLAG_DELETED,
            size: 0,
            blocks: Vec::new(),
        }
    }
}
