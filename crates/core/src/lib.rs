//! meshsync-core: the in-memory file-set index of the meshsync engine
//!
//! Tracks which version of every file each peer in the synchronization
//! group currently holds and derives the global view: the newest known
//! version per name and the set of peers that have it. The pull loop
//! asks [`FileSet::need`] what to fetch and [`FileSet::availability`]
//! who to fetch it from; protocol handlers feed remote announcements
//! in through [`FileSet::update`] and [`FileSet::replace`], and the
//! local scanner publishes rescans through
//! [`FileSet::replace_with_delete`].

pub mod clock;
pub mod entry;
pub mod fileset;
pub mod hash;
pub mod peer;

pub use entry::{BlockInfo, FileEntry, FLAG_DELETED, FLAG_INVALID, MODE_MASK};
pub use fileset::FileSet;
pub use hash::ContentHash;
pub use peer::{PeerMap, PeerMapError, LOCAL_ID, LOCAL_NAME, MAX_PEERS};
