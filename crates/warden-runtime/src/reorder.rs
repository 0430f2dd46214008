//! Restores sequence order after concurrent stages
//!
//! Every sequence number must be resolved exactly once, either with a value
//! or as an explicit drop. Output is strictly increasing with no gaps except
//! the drops.

use std::collections::BTreeMap;

/// Final outcome of one sequence number
#[derive(Debug, Clone, PartialEq)]
pub enum Slot<T> {
    Ready(T),
    Dropped,
}

/// Holds out-of-order results until their predecessors arrive
#[derive(Debug)]
pub struct ReorderBuffer<T> {
    next: u64,
    pending: BTreeMap<u64, Slot<T>>,
}

impl<T> ReorderBuffer<T> {
    /// Expect `first` as the first sequence number
    pub fn new(first: u64) -> Self {
        Self {
            next: first,
            pending: BTreeMap::new(),
        }
    }

    /// Next sequence number to be released
    pub fn next_sequence(&self) -> u64 {
        self.next
    }

    /// Results waiting for a gap to fill
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Record a result; returns `false` for an already-resolved number
    pub fn insert(&mut self, sequence: u64, value: T) -> bool {
        self.resolve(sequence, Slot::Ready(value))
    }

    /// Record an explicit drop; returns `false` for an already-resolved number
    pub fn drop_sequence(&mut self, sequence: u64) -> bool {
        self.resolve(sequence, Slot::Dropped)
    }

    fn resolve(&mut self, sequence: u64, slot: Slot<T>) -> bool {
        if sequence < self.next || self.pending.contains_key(&sequence) {
            return false;
        }
        self.pending.insert(sequence, slot);
        true
    }

    /// Release the next slot if it is resolved
    pub fn pop_ready(&mut self) -> Option<(u64, Slot<T>)> {
        let slot = self.pending.remove(&self.next)?;
        let sequence = self.next;
        self.next += 1;
        Some((sequence, slot))
    }

    /// Release every contiguous resolved slot
    pub fn drain_ready(&mut self) -> Vec<(u64, Slot<T>)> {
        std::iter::from_fn(|| self.pop_ready()).collect()
    }
}
