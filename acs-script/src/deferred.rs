//! Requests aimed at scripts on maps that are not loaded.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeferredAction {
    Execute,
    ExecuteAlways,
    Suspend,
    Terminate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredEntry {
    pub map: i32,
    pub action: DeferredAction,
    pub script: i32,
    pub args: [i32; 3],
    /// Player that issued the request; resolved to their current body when the map loads.
    pub player: Option<u8>,
}

/// FIFO per target map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredQueue {
    maps: BTreeMap<i32, VecDeque<DeferredEntry>>,
}

impl DeferredQueue {
    pub fn push(&mut self, entry: DeferredEntry) {
        log::debug!(
            "deferring {:?} of script {} until map {} loads",
            entry.action,
            entry.script,
            entry.map
        );
        self.maps.entry(entry.map).or_default().push_back(entry);
    }

    /// Remove and return every entry for `map`, oldest first.
    pub fn take(&mut self, map: i32) -> Vec<DeferredEntry> {
        self.maps.remove(&map).map(Vec::from).unwrap_or_default()
    }

    pub fn pending(&self, map: i32) -> usize {
        self.maps.get(&map).map_or(0, VecDeque::len)
    }

    pub fn len(&self) -> usize {
        self.maps.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeferredEntry> {
        self.maps.values().flatten()
    }
}
