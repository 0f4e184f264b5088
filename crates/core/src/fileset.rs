//! Per-peer file-version tracking with a derived global view
//!
//! The [`FileSet`] keeps, for each of the 64 peer slots, a mapping
//! from file name to the exact version that peer announced; a
//! reference-counted pool of file records deduplicating identical
//! versions held by several peers; and two derived indices: the
//! newest known version per name and the mask of peers holding
//! exactly that version.
//!
//! Delete handling: [`FileSet::replace_with_delete`] compares the
//! incoming list against the local peer's current view and turns
//! every locally vanished file into a tombstone whose version comes
//! from the monotonic clock. [`FileSet::replace`] never synthesizes
//! tombstones; callers that carry their own deletions use it
//! directly.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::clock;
use crate::entry::FileEntry;
use crate::hash::ContentHash;
use crate::peer::{LOCAL_ID, MAX_PEERS};

/// Identity of one announced version of a named file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RecordKey {
    name: String,
    version: u64,
    modified: i64,
    digest: ContentHash,
}

impl RecordKey {
    fn of(file: &FileEntry) -> Self {
        Self {
            name: file.name.clone(),
            version: file.version,
            modified: file.modified,
            digest: file.blocks_digest(),
        }
    }

    // Total order for conflict resolution: higher version wins, then
    // later modification time, then the larger block digest. Equal
    // keys are not newer than each other, and the outcome never
    // depends on observation order, so all peers converge on the same
    // global view for the same inputs.
    fn newer_than(&self, other: &Self) -> bool {
        (self.version, self.modified, self.digest) > (other.version, other.modified, other.digest)
    }
}

// One pooled descriptor, shared by every peer that announced this
// exact version. usage counts (peer, name) bindings.
#[derive(Debug, Clone)]
struct FileRecord {
    usage: u32,
    file: FileEntry,
}

#[derive(Debug)]
struct Inner {
    records: HashMap<RecordKey, FileRecord>,
    peer_files: [HashMap<String, RecordKey>; MAX_PEERS],
    global: HashMap<String, RecordKey>,
    availability: HashMap<String, u64>,
    changes: [u64; MAX_PEERS],
}

impl Inner {
    fn new() -> Self {
        Self {
            records: HashMap::new(),
            peer_files: std::array::from_fn(|_| HashMap::new()),
            global: HashMap::new(),
            availability: HashMap::new(),
            changes: [0; MAX_PEERS],
        }
    }

    // True when files announces exactly the peer's current view: the
    // same names, each mapping to an equal key.
    fn same_view(&self, peer: usize, files: &[FileEntry]) -> bool {
        let index = &self.peer_files[peer];
        files.len() == index.len()
            && files.iter().all(|file| {
                index
                    .get(&file.name)
                    .is_some_and(|held| *held == RecordKey::of(file))
            })
    }

    // The shared update logic: fold files into the peer's view and
    // advance the global view. Bindings replaced here do not give
    // back the superseded record's usage; only release() does, on the
    // full resweep.
    fn merge(&mut self, peer: usize, files: &[FileEntry]) {
        for file in files {
            let key = RecordKey::of(file);

            if self.peer_files[peer]
                .get(&file.name)
                .is_some_and(|held| *held == key)
            {
                // The peer already announced exactly this version.
                continue;
            }

            self.peer_files[peer].insert(file.name.clone(), key.clone());

            self.records
                .entry(key.clone())
                .and_modify(|record| record.usage += 1)
                .or_insert_with(|| FileRecord {
                    usage: 1,
                    file: file.clone(),
                });

            let bit = 1u64 << peer;
            let current = self.global.get(&file.name);
            let ties_global = current.is_some_and(|held| *held == key);
            let takes_global = current.map_or(true, |held| key.newer_than(held));

            if ties_global {
                *self.availability.entry(file.name.clone()).or_insert(0) |= bit;
            } else if takes_global {
                trace!(peer, name = %file.name, version = file.version, "new global version");
                self.global.insert(file.name.clone(), key);
                self.availability.insert(file.name.clone(), bit);
            }
        }
    }

    // Drop the peer's claim on every record it references; records
    // nobody references anymore leave the table.
    fn release(&mut self, peer: usize) {
        for key in self.peer_files[peer].values() {
            let gone = match self.records.get_mut(key) {
                Some(record) if record.usage > 1 => {
                    record.usage -= 1;
                    false
                }
                Some(_) => true,
                None => false,
            };
            if gone {
                self.records.remove(key);
            }
        }
        self.peer_files[peer].clear();
    }

    // Rebuild global and availability for every tracked name by
    // scanning all 64 slots. O(names x 64), and 64 is a constant.
    fn rescan_global(&mut self) {
        let names: Vec<String> = self.global.keys().cloned().collect();
        for name in names {
            let mut newest: Option<(&RecordKey, u64)> = None;
            for (slot, index) in self.peer_files.iter().enumerate() {
                let Some(key) = index.get(&name) else { continue };
                newest = match newest {
                    Some((best, mask)) if key == best => Some((best, mask | 1 << slot)),
                    Some((best, _)) if key.newer_than(best) => Some((key, 1 << slot)),
                    Some(kept) => Some(kept),
                    None => Some((key, 1 << slot)),
                };
            }

            match newest {
                Some((key, mask)) => {
                    let key = key.clone();
                    self.global.insert(name.clone(), key);
                    self.availability.insert(name, mask);
                }
                None => {
                    self.global.remove(&name);
                    self.availability.remove(&name);
                }
            }
        }
    }

    // The replace body: skip if nothing changed, otherwise resweep.
    // synthesized carries tombstones from replace_with_delete; their
    // freshly ticked versions can never match an existing binding, so
    // their presence alone means the view changed.
    fn replace_view(&mut self, peer: usize, files: &[FileEntry], synthesized: &[FileEntry]) {
        if synthesized.is_empty() && self.same_view(peer, files) {
            trace!(peer, "replace with unchanged view");
            return;
        }

        self.changes[peer] += 1;
        self.release(peer);
        self.rescan_global();
        self.merge(peer, files);
        self.merge(peer, synthesized);
    }
}

/// The file-set index.
///
/// Tracks which version of every file each peer holds and derives,
/// per name, the newest known version together with the mask of peers
/// that have it. All operations take `&self` and serialize on one
/// internal mutex, so the index can be shared behind an `Arc` between
/// the scanner, the puller, and the protocol handlers.
#[derive(Debug)]
pub struct FileSet {
    inner: Mutex<Inner>,
}

impl FileSet {
    /// Create an empty index
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
        }
    }

    // Peer ids index fixed 64-slot tables and a 64-bit mask; anything
    // larger is a caller bug, not a recoverable condition.
    fn assert_peer(peer: usize) {
        assert!(
            peer < MAX_PEERS,
            "peer id {peer} out of range, slots are 0-{}",
            MAX_PEERS - 1
        );
    }

    /// Merge `files` into `peer`'s view as an incremental delta.
    ///
    /// Bindings replaced here keep the superseded record's usage
    /// alive until the next [`replace`](Self::replace) for the peer;
    /// deltas are additive, and callers promise not to silently drop
    /// files this way. The peer's change counter is bumped once per
    /// call, unconditionally, because a delta by assumption always
    /// carries news.
    ///
    /// # Panics
    /// If `peer` is not a valid slot id (0..=63).
    pub fn update(&self, peer: usize, files: &[FileEntry]) {
        Self::assert_peer(peer);
        let mut inner = self.inner.lock();
        inner.merge(peer, files);
        inner.changes[peer] += 1;
    }

    /// Atomically substitute `peer`'s entire view with `files`.
    ///
    /// When `files` announces a view identical to the peer's current
    /// one (same names, each mapping to an equal version) the call is
    /// a no-op and the change counter stays put. Otherwise the
    /// counter is bumped once and the peer's old records are
    /// released, the global view is recomputed from all remaining
    /// holders, and `files` is folded back in.
    ///
    /// # Panics
    /// If `peer` is not a valid slot id (0..=63).
    pub fn replace(&self, peer: usize, files: &[FileEntry]) {
        Self::assert_peer(peer);
        self.inner.lock().replace_view(peer, files, &[]);
    }

    /// Like [`replace`](Self::replace), but first synthesize a
    /// tombstone for every file the local peer currently holds that
    /// is absent from `files`.
    ///
    /// Each tombstone clones the local descriptor, marks it deleted,
    /// drops its content, and takes a version from the monotonic
    /// clock seeded with the superseded version, so it sorts newer
    /// than the file it replaces and newer than any tombstone minted
    /// concurrently from the same seed. This is the only place
    /// deletions are manufactured; callers normally pass the local
    /// peer's own id here after a rescan.
    ///
    /// # Panics
    /// If `peer` is not a valid slot id (0..=63).
    pub fn replace_with_delete(&self, peer: usize, files: &[FileEntry]) {
        Self::assert_peer(peer);
        let mut inner = self.inner.lock();

        let incoming: std::collections::HashSet<&str> =
            files.iter().map(|f| f.name.as_str()).collect();

        let mut tombstones = Vec::new();
        for key in inner.peer_files[LOCAL_ID].values() {
            if incoming.contains(key.name.as_str()) {
                continue;
            }
            if let Some(record) = inner.records.get(key) {
                let version = clock::tick(record.file.version);
                debug!(name = %record.file.name, version, "file vanished locally, synthesizing tombstone");
                tombstones.push(record.file.tombstone(version));
            }
        }

        inner.replace_view(peer, files, &tombstones);
    }

    /// Everything `peer` must fetch to reach the global view: every
    /// name whose global version is newer than the one the peer
    /// holds. A peer holding nothing for a name always needs it.
    ///
    /// # Panics
    /// If `peer` is not a valid slot id (0..=63).
    #[must_use]
    pub fn need(&self, peer: usize) -> Vec<FileEntry> {
        Self::assert_peer(peer);
        let inner = self.inner.lock();
        let mut out = Vec::new();
        for (name, global_key) in &inner.global {
            let needed = match inner.peer_files[peer].get(name) {
                Some(held) => global_key.newer_than(held),
                None => true,
            };
            if needed {
                if let Some(record) = inner.records.get(global_key) {
                    out.push(record.file.clone());
                }
            }
        }
        out
    }

    /// Every file `peer` currently holds
    ///
    /// # Panics
    /// If `peer` is not a valid slot id (0..=63).
    #[must_use]
    pub fn have(&self, peer: usize) -> Vec<FileEntry> {
        Self::assert_peer(peer);
        let inner = self.inner.lock();
        inner.peer_files[peer]
            .values()
            .filter_map(|key| inner.records.get(key))
            .map(|record| record.file.clone())
            .collect()
    }

    /// The newest known version of every tracked name
    #[must_use]
    pub fn global(&self) -> Vec<FileEntry> {
        let inner = self.inner.lock();
        inner
            .global
            .values()
            .filter_map(|key| inner.records.get(key))
            .map(|record| record.file.clone())
            .collect()
    }

    /// The version `peer` holds for `name`, if any.
    ///
    /// `None` means the peer has never announced the name; a peer
    /// that announced a deletion still returns the tombstone, so
    /// callers distinguish the two by [`FileEntry::is_deleted`].
    ///
    /// # Panics
    /// If `peer` is not a valid slot id (0..=63).
    #[must_use]
    pub fn get(&self, peer: usize, name: &str) -> Option<FileEntry> {
        Self::assert_peer(peer);
        let inner = self.inner.lock();
        let key = inner.peer_files[peer].get(name)?;
        inner.records.get(key).map(|record| record.file.clone())
    }

    /// The globally newest version of `name`, if any
    #[must_use]
    pub fn get_global(&self, name: &str) -> Option<FileEntry> {
        let inner = self.inner.lock();
        let key = inner.global.get(name)?;
        inner.records.get(key).map(|record| record.file.clone())
    }

    /// Mask of peers holding exactly the global version of `name`.
    ///
    /// Bit *i* is set when peer *i* holds the globally newest
    /// version. Zero for unknown names.
    #[must_use]
    pub fn availability(&self, name: &str) -> u64 {
        self.inner.lock().availability.get(name).copied().unwrap_or(0)
    }

    /// How many times `peer`'s view has changed.
    ///
    /// Monotonically non-decreasing; observers compare against a
    /// remembered value to detect that something happened without
    /// diffing views. Note the asymmetry: [`update`](Self::update)
    /// bumps this unconditionally, [`replace`](Self::replace) only
    /// when the view actually changed.
    ///
    /// # Panics
    /// If `peer` is not a valid slot id (0..=63).
    #[must_use]
    pub fn changes(&self, peer: usize) -> u64 {
        Self::assert_peer(peer);
        self.inner.lock().changes[peer]
    }
}

impl Default for FileSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl FileSet {
    // Cross-checks the four indices against each other. With
    // strict_usage, additionally requires usage counts to equal the
    // exact number of bindings and forbids unreferenced records;
    // those two only hold for histories that never rebind a name
    // through update (rebinding deltas deliberately leave the old
    // record's usage untouched until the next replace).
    fn assert_consistent(&self, strict_usage: bool) {
        let inner = self.inner.lock();

        let mut referents: HashMap<&RecordKey, u32> = HashMap::new();
        for index in &inner.peer_files {
            for key in index.values() {
                assert!(
                    inner.records.contains_key(key),
                    "binding points at a missing record: {key:?}"
                );
                *referents.entry(key).or_insert(0) += 1;
            }
        }

        for (key, record) in &inner.records {
            let bound = referents.get(key).copied().unwrap_or(0);
            assert!(record.usage >= 1, "zero-usage record survived: {key:?}");
            if strict_usage {
                assert_eq!(record.usage, bound, "usage drift on {key:?}");
            } else {
                assert!(record.usage >= bound, "usage undercount on {key:?}");
            }
        }
        if strict_usage {
            assert_eq!(referents.len(), inner.records.len(), "orphaned records");
        }

        let mut held_names: std::collections::HashSet<&str> = std::collections::HashSet::new();
        for index in &inner.peer_files {
            held_names.extend(index.keys().map(String::as_str));
        }
        let global_names: std::collections::HashSet<&str> =
            inner.global.keys().map(String::as_str).collect();
        assert_eq!(held_names, global_names, "global presence mismatch");
        assert_eq!(inner.global.len(), inner.availability.len());

        for (name, global_key) in &inner.global {
            let mut mask = 0u64;
            for (slot, index) in inner.peer_files.iter().enumerate() {
                if let Some(key) = index.get(name) {
                    assert!(
                        !key.newer_than(global_key),
                        "peer {slot} holds something newer than global for {name}"
                    );
                    if key == global_key {
                        mask |= 1 << slot;
                    }
                }
            }
            assert_ne!(mask, 0, "global entry for {name} has no holder");
            assert_eq!(
                mask,
                inner.availability.get(name).copied().unwrap_or(0),
                "availability drift for {name}"
            );
        }
    }

    fn record_count(&self) -> usize {
        self.inner.lock().records.len()
    }
}
