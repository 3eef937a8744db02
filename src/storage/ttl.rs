//! TTL Index
//!
//! Tracks which keys expire and when. A binary min-heap keyed on the
//! deadline answers "what expires next" in O(1); a key→slot map makes
//! updating or dropping an existing record O(log n) instead of a heap
//! scan. Every swap updates both structures together, so the map always
//! points at the record's true slot.
//!
//! At most one record exists per key; re-setting a TTL reprioritizes the
//! record in place and bumps its sequence number, which disambiguates a
//! record from any earlier assignment for the same key.
//!
//! The heap never deletes data itself: [`TtlHeap::sweep`] only pops due
//! records and hands the keys back. Applying the deletions to the data
//! structures is the caller's job (the engine, on the sweeper tick).

use bytes::Bytes;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// One tracked expiration.
#[derive(Debug, Clone)]
pub struct TtlRecord {
    pub key: Bytes,
    pub deadline: Instant,
    pub seq: u64,
}

/// Min-heap of TTL records with O(log n) keyed access.
#[derive(Debug, Default)]
pub struct TtlHeap {
    /// Binary heap layout: children of `i` at `2i + 1` and `2i + 2`.
    heap: Vec<TtlRecord>,
    /// Key → current heap slot. Exact at all times.
    slots: HashMap<Bytes, usize>,
    /// Source of record sequence numbers.
    next_seq: u64,
}

impl TtlHeap {
    /// Creates an empty heap.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys with a TTL.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// True if no key has a TTL.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// True if the key has a TTL record.
    pub fn has_ttl(&self, key: &[u8]) -> bool {
        self.slots.contains_key(key)
    }

    /// Attaches or reassigns a TTL for a key.
    ///
    /// An existing record is updated in place and sifted to its new
    /// position; otherwise a record is pushed and sifted up.
    pub fn set(&mut self, key: Bytes, deadline: Instant) {
        self.next_seq += 1;
        let seq = self.next_seq;

        if let Some(&slot) = self.slots.get(&key) {
            self.heap[slot].deadline = deadline;
            self.heap[slot].seq = seq;
            self.sift_up(slot);
            // sift_up may have moved the record; find it again for the
            // downward pass
            if let Some(&slot) = self.slots.get(&key) {
                self.sift_down(slot);
            }
            return;
        }

        let slot = self.heap.len();
        self.slots.insert(key.clone(), slot);
        self.heap.push(TtlRecord { key, deadline, seq });
        self.sift_up(slot);
    }

    /// Convenience for `set(key, now + duration)`.
    pub fn set_after(&mut self, key: Bytes, duration: Duration, now: Instant) {
        self.set(key, now + duration);
    }

    /// Drops a key's TTL record. Returns true if one existed.
    pub fn remove(&mut self, key: &[u8]) -> bool {
        match self.slots.get(key).copied() {
            Some(slot) => {
                self.remove_at(slot);
                true
            }
            None => false,
        }
    }

    /// Remaining lifetime in whole seconds.
    ///
    /// `-1` if the key has no record, `-2` if the record's deadline has
    /// passed but the sweep has not collected it yet.
    pub fn ttl_secs(&self, key: &[u8], now: Instant) -> i64 {
        match self.remaining(key, now) {
            TtlState::None => -1,
            TtlState::Expired => -2,
            TtlState::Remaining(d) => d.as_secs() as i64,
        }
    }

    /// Remaining lifetime in whole milliseconds, same codes as
    /// [`TtlHeap::ttl_secs`].
    pub fn ttl_millis(&self, key: &[u8], now: Instant) -> i64 {
        match self.remaining(key, now) {
            TtlState::None => -1,
            TtlState::Expired => -2,
            TtlState::Remaining(d) => d.as_millis() as i64,
        }
    }

    fn remaining(&self, key: &[u8], now: Instant) -> TtlState {
        match self.slots.get(key) {
            None => TtlState::None,
            Some(&slot) => {
                let deadline = self.heap[slot].deadline;
                if deadline <= now {
                    TtlState::Expired
                } else {
                    TtlState::Remaining(deadline - now)
                }
            }
        }
    }

    /// Pops every record whose deadline is at or before `now`, in
    /// deadline order, returning the expired keys.
    pub fn sweep(&mut self, now: Instant) -> Vec<Bytes> {
        let mut expired = Vec::new();
        while let Some(first) = self.heap.first() {
            if first.deadline > now {
                break;
            }
            expired.push(self.remove_at(0).key);
        }
        expired
    }

    /// Drops every record.
    pub fn clear(&mut self) {
        self.heap.clear();
        self.slots.clear();
    }

    /// Removes and returns the record at a heap slot, repairing the
    /// heap around the hole.
    fn remove_at(&mut self, slot: usize) -> TtlRecord {
        let last = self.heap.len() - 1;
        self.swap_slots(slot, last);

        let record = self.heap.remove(last);
        self.slots.remove(&record.key);

        if slot < self.heap.len() {
            self.sift_up(slot);
            self.sift_down(slot);
        }
        record
    }

    fn sift_up(&mut self, mut slot: usize) {
        while slot > 0 {
            let parent = (slot - 1) / 2;
            if self.heap[slot].deadline >= self.heap[parent].deadline {
                break;
            }
            self.swap_slots(slot, parent);
            slot = parent;
        }
    }

    fn sift_down(&mut self, mut slot: usize) {
        loop {
            let left = 2 * slot + 1;
            let right = 2 * slot + 2;
            let mut smallest = slot;

            if left < self.heap.len()
                && self.heap[left].deadline < self.heap[smallest].deadline
            {
                smallest = left;
            }
            if right < self.heap.len()
                && self.heap[right].deadline < self.heap[smallest].deadline
            {
                smallest = right;
            }
            if smallest == slot {
                break;
            }
            self.swap_slots(slot, smallest);
            slot = smallest;
        }
    }

    /// Swaps two heap slots, keeping the key→slot map exact.
    fn swap_slots(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.heap.swap(a, b);
        self.slots.insert(self.heap[a].key.clone(), a);
        self.slots.insert(self.heap[b].key.clone(), b);
    }

    #[cfg(test)]
    fn check_invariants(&self) {
        assert_eq!(self.heap.len(), self.slots.len());
        for (slot, record) in self.heap.iter().enumerate() {
            assert_eq!(self.slots.get(&record.key), Some(&slot), "stale slot map");
            if slot > 0 {
                let parent = (slot - 1) / 2;
                assert!(
                    self.heap[parent].deadline <= record.deadline,
                    "heap property violated at slot {}",
                    slot
                );
            }
        }
    }
}

enum TtlState {
    None,
    Expired,
    Remaining(Duration),
}
