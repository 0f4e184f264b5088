//! Peer slot allocation
//!
//! Every member of the synchronization group occupies one of 64 fixed
//! slots, so the set of peers holding a file fits in a single `u64`
//! mask. Slot 0 always belongs to the local process; remote peers are
//! assigned the lowest free slot on first contact and give it back on
//! departure.

use std::collections::HashMap;

use thiserror::Error;

/// Slot id of this process's own view
pub const LOCAL_ID: usize = 0;
/// Name registered for the local slot
pub const LOCAL_NAME: &str = "<local>";
/// Fixed number of peer slots
pub const MAX_PEERS: usize = 64;

/// Errors that can occur when assigning peer slots.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PeerMapError {
    #[error("all {MAX_PEERS} peer slots are in use")]
    TableFull,
}

/// Bidirectional mapping between peer names and slot ids.
///
/// Cleared slots are recycled: a departing peer's slot goes back into
/// the pool and the lowest free slot is handed out first.
#[derive(Debug)]
pub struct PeerMap {
    to_slot: HashMap<String, usize>,
    names: Vec<Option<String>>,
}

impl PeerMap {
    /// Create a map with only the local peer registered
    #[must_use]
    pub fn new() -> Self {
        let mut names = vec![None; MAX_PEERS];
        names[LOCAL_ID] = Some(LOCAL_NAME.to_string());

        let mut to_slot = HashMap::new();
        to_slot.insert(LOCAL_NAME.to_string(), LOCAL_ID);

        Self { to_slot, names }
    }

    /// Slot for `name`, allocating the lowest free slot on first sight.
    ///
    /// # Errors
    /// Returns [`PeerMapError::TableFull`] when all 64 slots are taken.
    pub fn get(&mut self, name: &str) -> Result<usize, PeerMapError> {
        if let Some(&slot) = self.to_slot.get(name) {
            return Ok(slot);
        }

        let slot = self
            .names
            .iter()
            .position(Option::is_none)
            .ok_or(PeerMapError::TableFull)?;
        self.to_slot.insert(name.to_string(), slot);
        self.names[slot] = Some(name.to_string());
        Ok(slot)
    }

    /// Free the slot held by `name`, if any
    pub fn clear(&mut self, name: &str) {
        if let Some(slot) = self.to_slot.remove(name) {
            self.names[slot] = None;
        }
    }

    /// Name registered at `slot`
    #[must_use]
    pub fn name_of(&self, slot: usize) -> Option<&str> {
        self.names.get(slot).and_then(Option::as_deref)
    }
}

impl Default for PeerMap {
    fn default() -> Self {
        Self::new()
    }
}
