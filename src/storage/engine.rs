//! Data Engine
//!
//! The engine owns the three data structures behind the command surface:
//! the string table, the named sorted sets, and the TTL heap. They are
//! plain fields: no globals, no per-structure locks. The server shares
//! one engine behind a single reader/writer lock at this boundary, and
//! handlers borrow it for the duration of one dispatch.
//!
//! Cross-structure bookkeeping lives here so the individual structures
//! stay self-contained:
//!
//! - deleting a key drops its string value, its sorted set, and its TTL
//!   record together;
//! - overwriting a string without a TTL option discards any TTL the key
//!   had;
//! - a sweep pops due TTL records and applies the deletions to both
//!   keyspaces.

use crate::storage::hash::{HashTable, SetOutcome, TableStats};
use crate::storage::ttl::TtlHeap;
use crate::storage::zset::{Score, SortedSet};
use bytes::Bytes;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// The in-memory store: strings, sorted sets, TTLs.
#[derive(Debug, Default)]
pub struct Engine {
    strings: HashTable,
    zsets: HashMap<Bytes, SortedSet>,
    ttl: TtlHeap,
    /// Keys removed by sweeps over the engine's lifetime.
    expired_total: u64,
}

impl Engine {
    /// Creates an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // String keyspace
    // ------------------------------------------------------------------

    /// Stores a string value with no TTL.
    ///
    /// Overwriting discards any TTL the key carried: a plain SET always
    /// yields a persistent key.
    pub fn set(&mut self, key: Bytes, value: Bytes) -> SetOutcome {
        self.ttl.remove(&key);
        self.strings.set(key, value)
    }

    /// Stores a string value and attaches a TTL in one step.
    pub fn set_with_ttl(
        &mut self,
        key: Bytes,
        value: Bytes,
        ttl: Duration,
        now: Instant,
    ) -> SetOutcome {
        let outcome = self.strings.set(key.clone(), value);
        self.ttl.set(key, now + ttl);
        outcome
    }

    /// Looks up a string value.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.strings.get(key).cloned()
    }

    /// True if the key exists in either keyspace.
    pub fn exists(&self, key: &[u8]) -> bool {
        self.strings.exists(key) || self.zsets.contains_key(key)
    }

    /// Deletes a key everywhere: string value, sorted set, TTL record.
    pub fn del(&mut self, key: &[u8]) -> bool {
        let had_string = self.strings.del(key);
        let had_zset = self.zsets.remove(key).is_some();
        if had_string || had_zset {
            self.ttl.remove(key);
            true
        } else {
            false
        }
    }

    /// String keys matching a glob pattern.
    pub fn keys(&self, pattern: &[u8]) -> Vec<Bytes> {
        self.strings.keys(pattern)
    }

    /// Drops everything.
    pub fn flush(&mut self) {
        self.strings.clear();
        self.zsets.clear();
        self.ttl.clear();
    }

    /// Total keys across both keyspaces.
    pub fn dbsize(&self) -> usize {
        self.strings.len() + self.zsets.len()
    }

    /// Number of string keys.
    pub fn string_count(&self) -> usize {
        self.strings.len()
    }

    /// Number of sorted-set keys.
    pub fn zset_count(&self) -> usize {
        self.zsets.len()
    }

    /// Number of keys with a TTL.
    pub fn ttl_count(&self) -> usize {
        self.ttl.len()
    }

    /// Occupancy statistics of the string table.
    pub fn table_stats(&self) -> TableStats {
        self.strings.stats()
    }

    // ------------------------------------------------------------------
    // Sorted sets
    // ------------------------------------------------------------------

    /// Read access to a named sorted set.
    pub fn zset(&self, key: &[u8]) -> Option<&SortedSet> {
        self.zsets.get(key)
    }

    /// Applies ZADD pairs, creating the set on first use. Returns the
    /// count of newly inserted members.
    pub fn zadd(&mut self, key: Bytes, pairs: Vec<(Bytes, Score)>) -> usize {
        let set = self.zsets.entry(key).or_default();
        pairs
            .into_iter()
            .filter(|(member, score)| set.add(member.clone(), *score))
            .count()
    }

    /// Removes members from a sorted set, dropping the set (and its TTL
    /// record) once it empties. Returns the count removed.
    pub fn zrem(&mut self, key: &[u8], members: &[Bytes]) -> usize {
        let Some(set) = self.zsets.get_mut(key) else {
            return 0;
        };
        let removed = members.iter().filter(|m| set.remove(m)).count();
        if set.is_empty() {
            self.zsets.remove(key);
            self.ttl.remove(key);
        }
        removed
    }

    // ------------------------------------------------------------------
    // TTL
    // ------------------------------------------------------------------

    /// Attaches a TTL to an existing key.
    ///
    /// A non-positive duration removes the record instead (the key
    /// becomes persistent). Returns false if the key does not exist, or
    /// if a non-positive duration found no record to remove.
    pub fn set_ttl(&mut self, key: &[u8], duration_millis: i64, now: Instant) -> bool {
        if !self.exists(key) {
            return false;
        }
        if duration_millis <= 0 {
            return self.ttl.remove(key);
        }
        self.ttl.set(
            Bytes::copy_from_slice(key),
            now + Duration::from_millis(duration_millis as u64),
        );
        true
    }

    /// Remaining TTL in seconds: `-2` for a missing (or expired but
    /// unswept) key, `-1` for a key without TTL.
    pub fn ttl_secs(&self, key: &[u8], now: Instant) -> i64 {
        if !self.exists(key) {
            return -2;
        }
        self.ttl.ttl_secs(key, now)
    }

    /// Remaining TTL in milliseconds, same codes as [`Engine::ttl_secs`].
    pub fn ttl_millis(&self, key: &[u8], now: Instant) -> i64 {
        if !self.exists(key) {
            return -2;
        }
        self.ttl.ttl_millis(key, now)
    }

    /// Removes a key's TTL without touching its value. Returns true if
    /// a record existed.
    pub fn persist(&mut self, key: &[u8]) -> bool {
        self.ttl.remove(key)
    }

    // ------------------------------------------------------------------
    // Expiration
    // ------------------------------------------------------------------

    /// Pops every due TTL record and deletes those keys from both
    /// keyspaces. Returns how many keys were expired.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let expired = self.ttl.sweep(now);
        for key in &expired {
            self.strings.del(key);
            self.zsets.remove(key.as_ref());
        }
        self.expired_total += expired.len() as u64;
        expired.len()
    }

    /// Keys removed by sweeps since startup.
    pub fn expired_total(&self) -> u64 {
        self.expired_total
    }
}
