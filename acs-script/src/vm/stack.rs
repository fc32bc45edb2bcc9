use serde::{Deserialize, Serialize};

use super::VmError;

/// Where the current variable frame lives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    /// Script-level locals stored in the instance.
    #[default]
    Script,
    /// Function frame starting this many slots above the instance's segment base.
    Stack(u32),
}

/// Call linkage stored on the operand stack directly above a function's locals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnRecord {
    pub return_pc: u32,
    pub caller_frame: Frame,
    pub caller_function: Option<u32>,
    pub discard_result: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Slot {
    Value(i32),
    Return(ReturnRecord),
}

/// The operand stack shared by every instance of a level.
///
/// Only the running instance has slots on it; a yielding instance spills its segment back
/// into itself, so between dispatches the stack is empty.
#[derive(Debug, Clone)]
pub struct OperandStack {
    slots: Vec<Slot>,
    capacity: usize,
}

impl OperandStack {
    pub fn new(capacity: usize) -> Self {
        Self { slots: Vec::with_capacity(capacity), capacity }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[inline]
    pub fn free(&self) -> usize {
        self.capacity - self.slots.len()
    }

    pub(crate) fn push(&mut self, slot: Slot) -> Result<(), VmError> {
        if self.slots.len() >= self.capacity {
            return Err(VmError::StackOverflow { capacity: self.capacity });
        }
        self.slots.push(slot);
        Ok(())
    }

    #[inline]
    pub(crate) fn pop(&mut self) -> Option<Slot> {
        self.slots.pop()
    }

    #[inline]
    pub(crate) fn get(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index)
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut Slot> {
        self.slots.get_mut(index)
    }

    #[inline]
    pub(crate) fn truncate(&mut self, len: usize) {
        self.slots.truncate(len);
    }

    /// Move everything above `base` out of the shared stack.
    pub(crate) fn spill(&mut self, base: usize) -> Vec<Slot> {
        self.slots.split_off(base.min(self.slots.len()))
    }

    /// Push a previously spilled segment back; all or nothing.
    pub(crate) fn restore(&mut self, segment: Vec<Slot>) -> Result<(), VmError> {
        if segment.len() > self.free() {
            return Err(VmError::StackOverflow { capacity: self.capacity });
        }
        self.slots.extend(segment);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_stops_at_capacity() {
        let mut s = OperandStack::new(2);
        s.push(Slot::Value(1)).unwrap();
        s.push(Slot::Value(2)).unwrap();
        assert_eq!(s.push(Slot::Value(3)), Err(VmError::StackOverflow { capacity: 2 }));
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn spill_and_restore_segment() {
        let mut s = OperandStack::new(8);
        s.push(Slot::Value(1)).unwrap();
        s.push(Slot::Value(2)).unwrap();
        s.push(Slot::Value(3)).unwrap();
        let seg = s.spill(1);
        assert_eq!(seg, vec![Slot::Value(2), Slot::Value(3)]);
        assert_eq!(s.len(), 1);
        s.restore(seg).unwrap();
        assert_eq!(s.get(2), Some(&Slot::Value(3)));
        assert!(s.restore(vec![Slot::Value(0); 6]).is_err());
        assert_eq!(s.len(), 3);
    }
}
