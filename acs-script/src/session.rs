//! Variable scopes that outlive a level.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::deferred::DeferredQueue;
use crate::save::SaveError;

pub const WORLD_VAR_COUNT: usize = 256;
pub const WORLD_ARRAY_COUNT: usize = 256;
pub const GLOBAL_VAR_COUNT: usize = 64;
pub const GLOBAL_ARRAY_COUNT: usize = 64;

/// Unbounded array where unset elements read as 0.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SparseArray(BTreeMap<i32, i32>);

impl SparseArray {
    #[inline]
    pub fn get(&self, index: i32) -> i32 {
        self.0.get(&index).copied().unwrap_or(0)
    }

    pub fn set(&mut self, index: i32, value: i32) {
        if value == 0 {
            self.0.remove(&index);
        } else {
            self.0.insert(index, value);
        }
    }
}

/// World and global scopes plus the deferred queue.
///
/// World scope lives for a hub of levels, global scope for the whole run. The scheduler
/// borrows the session for every tick instead of keeping it in ambient state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    world_vars: Vec<i32>,
    world_arrays: Vec<SparseArray>,
    global_vars: Vec<i32>,
    global_arrays: Vec<SparseArray>,
    deferred: DeferredQueue,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            world_vars: vec![0; WORLD_VAR_COUNT],
            world_arrays: vec![SparseArray::default(); WORLD_ARRAY_COUNT],
            global_vars: vec![0; GLOBAL_VAR_COUNT],
            global_arrays: vec![SparseArray::default(); GLOBAL_ARRAY_COUNT],
            deferred: DeferredQueue::default(),
        }
    }
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn world_var(&self, index: usize) -> Option<i32> {
        self.world_vars.get(index).copied()
    }

    pub fn set_world_var(&mut self, index: usize, value: i32) -> bool {
        set(&mut self.world_vars, index, value)
    }

    pub fn global_var(&self, index: usize) -> Option<i32> {
        self.global_vars.get(index).copied()
    }

    pub fn set_global_var(&mut self, index: usize, value: i32) -> bool {
        set(&mut self.global_vars, index, value)
    }

    pub fn world_array(&self, array: usize) -> Option<&SparseArray> {
        self.world_arrays.get(array)
    }

    pub fn world_array_mut(&mut self, array: usize) -> Option<&mut SparseArray> {
        self.world_arrays.get_mut(array)
    }

    pub fn global_array(&self, array: usize) -> Option<&SparseArray> {
        self.global_arrays.get(array)
    }

    pub fn global_array_mut(&mut self, array: usize) -> Option<&mut SparseArray> {
        self.global_arrays.get_mut(array)
    }

    pub fn deferred(&self) -> &DeferredQueue {
        &self.deferred
    }

    pub fn deferred_mut(&mut self) -> &mut DeferredQueue {
        &mut self.deferred
    }

    /// Leaving a hub: world scope starts over, global scope and pending requests stay.
    pub fn reset_world(&mut self) {
        self.world_vars.fill(0);
        self.world_arrays.fill(SparseArray::default());
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SaveError> {
        bincode::serialize(self).map_err(SaveError::Encode)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SaveError> {
        let s: Session = bincode::deserialize(bytes).map_err(SaveError::Decode)?;
        if s.world_vars.len() != WORLD_VAR_COUNT
            || s.world_arrays.len() != WORLD_ARRAY_COUNT
            || s.global_vars.len() != GLOBAL_VAR_COUNT
            || s.global_arrays.len() != GLOBAL_ARRAY_COUNT
        {
            return Err(SaveError::Shape("session scope sizes"));
        }
        Ok(s)
    }
}

fn set(vars: &mut [i32], index: usize, value: i32) -> bool {
    match vars.get_mut(index) {
        Some(slot) => {
            *slot = value;
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deferred::{DeferredAction, DeferredEntry};

    #[test]
    fn sparse_arrays_accept_any_index() {
        let mut s = Session::new();
        let a = s.world_array_mut(3).unwrap();
        a.set(-7, 5);
        a.set(1_000_000, 9);
        assert_eq!(s.world_array(3).unwrap().get(-7), 5);
        assert_eq!(s.world_array(3).unwrap().get(1_000_000), 9);
        assert_eq!(s.world_array(3).unwrap().get(4), 0);
        assert!(s.world_array(WORLD_ARRAY_COUNT).is_none());
    }

    #[test]
    fn out_of_scope_variables_are_rejected() {
        let mut s = Session::new();
        assert!(s.set_global_var(63, 1));
        assert!(!s.set_global_var(64, 1));
        assert_eq!(s.global_var(64), None);
    }

    #[test]
    fn reset_world_keeps_globals_and_deferred() {
        let mut s = Session::new();
        s.set_world_var(0, 4);
        s.set_global_var(0, 5);
        s.deferred_mut().push(DeferredEntry {
            map: 2,
            action: DeferredAction::Terminate,
            script: 1,
            args: [0; 3],
            player: None,
        });
        s.reset_world();
        assert_eq!((s.world_var(0), s.global_var(0)), (Some(0), Some(5)));
        assert_eq!(s.deferred().pending(2), 1);
    }

    #[test]
    fn save_bytes_restore_the_session() {
        let mut s = Session::new();
        s.set_world_var(10, -3);
        s.global_array_mut(1).unwrap().set(2, 8);
        let back = Session::from_bytes(&s.to_bytes().unwrap()).unwrap();
        assert_eq!(back, s);
    }
}
