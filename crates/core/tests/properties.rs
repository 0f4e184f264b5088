//! Algebraic properties of the file-set index, checked through the
//! public API over generated inputs.

use std::collections::BTreeMap;

use proptest::prelude::*;

use meshsync_core::{BlockInfo, ContentHash, FileEntry, FileSet, MAX_PEERS};

const NAMES: [&str; 4] = ["alpha", "beta", "gamma", "delta"];

fn make_entry(name: &str, version: u64, modified: i64, seed: u8) -> FileEntry {
    let blocks = if seed == 0 {
        Vec::new()
    } else {
        vec![BlockInfo {
            offset: 0,
            size: 128,
            hash: ContentHash::from_bytes(&[seed]),
        }]
    };
    FileEntry {
        name: name.to_string(),
        version,
        modified,
        flags: 0o644,
        size: u64::from(seed) * 128,
        blocks,
    }
}

// A set unique by name over the fixed universe.
fn arb_file_set(names: &'static [&'static str]) -> impl Strategy<Value = Vec<FileEntry>> {
    prop::collection::vec((0usize..names.len(), 1u64..6, 0i64..4, 0u8..4), 0..6).prop_map(
        move |raw| {
            let mut by_name = BTreeMap::new();
            for (ni, version, modified, seed) in raw {
                by_name.insert(names[ni], make_entry(names[ni], version, modified, seed));
            }
            by_name.into_values().collect()
        },
    )
}

fn version_key(entry: &FileEntry) -> (u64, i64, ContentHash) {
    (entry.version, entry.modified, entry.blocks_digest())
}

fn sorted(mut files: Vec<FileEntry>) -> Vec<FileEntry> {
    files.sort_by(|a, b| a.name.cmp(&b.name));
    files
}

// Everything observable about the index: per-peer views, the global
// view, and the availability mask per known name.
#[allow(clippy::type_complexity)]
fn fingerprint(set: &FileSet) -> (Vec<Vec<FileEntry>>, Vec<FileEntry>, Vec<u64>) {
    let views = (0..MAX_PEERS).map(|peer| sorted(set.have(peer))).collect();
    let global = sorted(set.global());
    let masks = NAMES.iter().map(|name| set.availability(name)).collect();
    (views, global, masks)
}

proptest! {
    // Replacing with the same set twice leaves the state identical
    // and does not move the change counter a second time.
    #[test]
    fn replace_is_idempotent(
        setup in prop::collection::vec((0usize..5, arb_file_set(&NAMES)), 0..6),
        peer in 0usize..5,
        files in arb_file_set(&NAMES),
    ) {
        let set = FileSet::new();
        for (p, s) in setup {
            set.replace(p, &s);
        }

        set.replace(peer, &files);
        let state = fingerprint(&set);
        let counter = set.changes(peer);

        set.replace(peer, &files);
        prop_assert_eq!(fingerprint(&set), state);
        prop_assert_eq!(set.changes(peer), counter);
    }

    // Starting from an empty slot, replace and update install the
    // same view (their change counters may differ, which is part of
    // the contract).
    #[test]
    fn replace_matches_update_from_empty(
        peer in 0usize..5,
        files in arb_file_set(&NAMES),
    ) {
        let updated = FileSet::new();
        updated.update(peer, &files);

        let replaced = FileSet::new();
        replaced.replace(peer, &files);

        prop_assert_eq!(fingerprint(&updated), fingerprint(&replaced));
    }

    // Two deltas disjoint by name land the same as one combined
    // delta, in either order.
    #[test]
    fn update_is_order_independent_for_disjoint_sets(
        peer in 0usize..5,
        first in arb_file_set(&["alpha", "beta"]),
        second in arb_file_set(&["gamma", "delta"]),
    ) {
        let split = FileSet::new();
        split.update(peer, &first);
        split.update(peer, &second);

        let swapped = FileSet::new();
        swapped.update(peer, &second);
        swapped.update(peer, &first);

        let combined = FileSet::new();
        let mut both = first.clone();
        both.extend(second.clone());
        combined.update(peer, &both);

        prop_assert_eq!(fingerprint(&split), fingerprint(&combined));
        prop_assert_eq!(fingerprint(&swapped), fingerprint(&combined));
    }

    // Populating the peers in any order converges on the same global
    // view and the same availability masks.
    #[test]
    fn global_view_is_symmetric_in_population_order(
        views in prop::collection::vec(arb_file_set(&NAMES), 2..6),
    ) {
        let forward = FileSet::new();
        for (peer, files) in views.iter().enumerate() {
            forward.replace(peer, files);
        }

        let backward = FileSet::new();
        for (peer, files) in views.iter().enumerate().rev() {
            backward.replace(peer, files);
        }

        prop_assert_eq!(fingerprint(&forward), fingerprint(&backward));
    }

    // The publicly observable invariants hold after every replace:
    // a name is global iff someone holds it, the global version is
    // maximal, and the availability mask marks exactly the peers
    // holding that version.
    #[test]
    fn replace_histories_keep_the_global_view_consistent(
        ops in prop::collection::vec((0usize..5, arb_file_set(&NAMES)), 1..10),
    ) {
        let set = FileSet::new();
        for (peer, files) in ops {
            set.replace(peer, &files);

            for name in NAMES {
                let held: Vec<(usize, FileEntry)> = (0..5)
                    .filter_map(|p| set.get(p, name).map(|e| (p, e)))
                    .collect();

                match set.get_global(name) {
                    None => {
                        prop_assert!(held.is_empty());
                        prop_assert_eq!(set.availability(name), 0);
                    }
                    Some(global) => {
                        prop_assert!(!held.is_empty());

                        let global_key = version_key(&global);
                        let mut expected_mask = 0u64;
                        for (p, entry) in &held {
                            let key = version_key(entry);
                            prop_assert!(key <= global_key);
                            if key == global_key {
                                expected_mask |= 1 << p;
                            }
                        }
                        prop_assert!(expected_mask != 0);
                        prop_assert_eq!(set.availability(name), expected_mask);
                    }
                }
            }
        }
    }
}
