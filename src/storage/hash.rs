//! Separate-Chaining Hash Table
//!
//! The primary string keyspace. This is a hand-rolled table rather than
//! `std::collections::HashMap` so the storage layer controls hashing,
//! growth, and chain layout:
//!
//! - Separate chaining, each chain a singly-linked list owned by its
//!   bucket head (`Option<Box<Node>>`).
//! - MurmurHash3 (32-bit) over the raw key bytes.
//! - Power-of-two bucket count (minimum 16), so the bucket index is
//!   `hash & (capacity - 1)`.
//! - Load factor above 0.75 doubles the bucket array; the rehash runs
//!   synchronously inside the write that crossed the threshold and moves
//!   the existing nodes without reallocating them.
//!
//! `keys()` supports glob patterns with `*` (any run of bytes) and `?`
//! (exactly one byte), matched over raw bytes so binary keys work too.
//! The scan is full-table and unordered.

use bytes::Bytes;

/// Smallest bucket array; always a power of two.
const MIN_CAPACITY: usize = 16;

/// Chains longer than this on average trigger a resize.
const MAX_LOAD_FACTOR: f64 = 0.75;

/// Seed for the key hash.
const HASH_SEED: u32 = 0x9747b28c;

/// Outcome of a [`HashTable::set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    /// The key was not present; a new entry was created.
    Inserted,
    /// The key was present; its value was replaced.
    Updated,
}

/// One chain link. `next` owns the rest of the chain.
#[derive(Debug)]
struct Node {
    key: Bytes,
    value: Bytes,
    next: Option<Box<Node>>,
}

/// Occupancy statistics, reported by INFO.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TableStats {
    pub entries: usize,
    pub buckets: usize,
    pub used_buckets: usize,
    pub max_chain_len: usize,
    pub avg_chain_len: f64,
    pub load_factor: f64,
}

/// String→string hash table with separate chaining.
#[derive(Debug)]
pub struct HashTable {
    buckets: Vec<Option<Box<Node>>>,
    len: usize,
}

impl Default for HashTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HashTable {
    /// Creates an empty table with the minimum capacity.
    pub fn new() -> Self {
        Self {
            buckets: (0..MIN_CAPACITY).map(|_| None).collect(),
            len: 0,
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current bucket count.
    pub fn capacity(&self) -> usize {
        self.buckets.len()
    }

    /// Entries divided by buckets.
    pub fn load_factor(&self) -> f64 {
        self.len as f64 / self.buckets.len() as f64
    }

    #[inline]
    fn bucket_index(&self, key: &[u8]) -> usize {
        murmur3_32(key, HASH_SEED) as usize & (self.buckets.len() - 1)
    }

    /// Inserts or replaces a key-value pair.
    ///
    /// Grows the table afterwards if the write pushed the load factor
    /// over the threshold, so `load_factor() <= 0.75` holds on return.
    pub fn set(&mut self, key: Bytes, value: Bytes) -> SetOutcome {
        let idx = self.bucket_index(&key);

        let mut cursor = &mut self.buckets[idx];
        while let Some(node) = cursor {
            if node.key == key {
                node.value = value;
                return SetOutcome::Updated;
            }
            cursor = &mut node.next;
        }

        // Not found: push a new node at the chain head
        let head = self.buckets[idx].take();
        self.buckets[idx] = Some(Box::new(Node { key, value, next: head }));
        self.len += 1;

        if self.load_factor() > MAX_LOAD_FACTOR {
            self.resize();
        }

        SetOutcome::Inserted
    }

    /// Looks up a key.
    pub fn get(&self, key: &[u8]) -> Option<&Bytes> {
        let mut cursor = self.buckets[self.bucket_index(key)].as_deref();
        while let Some(node) = cursor {
            if node.key.as_ref() == key {
                return Some(&node.value);
            }
            cursor = node.next.as_deref();
        }
        None
    }

    /// Removes a key. Returns true if it was present.
    pub fn del(&mut self, key: &[u8]) -> bool {
        let idx = self.bucket_index(key);
        if remove_from_chain(&mut self.buckets[idx], key).is_some() {
            self.len -= 1;
            true
        } else {
            false
        }
    }

    /// True if the key is present.
    pub fn exists(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// All keys matching a glob pattern, in no particular order.
    pub fn keys(&self, pattern: &[u8]) -> Vec<Bytes> {
        let mut result = Vec::new();
        for bucket in &self.buckets {
            let mut cursor = bucket.as_deref();
            while let Some(node) = cursor {
                if glob_match(pattern, &node.key) {
                    result.push(node.key.clone());
                }
                cursor = node.next.as_deref();
            }
        }
        result
    }

    /// Drops every entry, keeping the current bucket array.
    pub fn clear(&mut self) {
        for bucket in &mut self.buckets {
            *bucket = None;
        }
        self.len = 0;
    }

    /// Chain occupancy statistics.
    pub fn stats(&self) -> TableStats {
        let mut used_buckets = 0;
        let mut max_chain_len = 0;
        for bucket in &self.buckets {
            let mut chain_len = 0;
            let mut cursor = bucket.as_deref();
            while let Some(node) = cursor {
                chain_len += 1;
                cursor = node.next.as_deref();
            }
            if chain_len > 0 {
                used_buckets += 1;
                max_chain_len = max_chain_len.max(chain_len);
            }
        }

        TableStats {
            entries: self.len,
            buckets: self.buckets.len(),
            used_buckets,
            max_chain_len,
            avg_chain_len: if used_buckets == 0 {
                0.0
            } else {
                self.len as f64 / used_buckets as f64
            },
            load_factor: self.load_factor(),
        }
    }

    /// Doubles the bucket array and rehashes every entry.
    ///
    /// Nodes are unlinked from the old chains and relinked into the new
    /// ones; no key, value, or node allocation happens here.
    fn resize(&mut self) {
        let new_capacity = self.buckets.len() * 2;
        let old_buckets = std::mem::replace(
            &mut self.buckets,
            (0..new_capacity).map(|_| None).collect(),
        );

        for mut bucket in old_buckets {
            while let Some(mut node) = bucket {
                bucket = node.next.take();
                let idx = self.bucket_index(&node.key);
                node.next = self.buckets[idx].take();
                self.buckets[idx] = Some(node);
            }
        }
    }
}

/// Unlinks the node carrying `key` from a chain, returning it.
fn remove_from_chain(chain: &mut Option<Box<Node>>, key: &[u8]) -> Option<Box<Node>> {
    if chain.as_ref().map_or(false, |node| node.key.as_ref() == key) {
        let mut node = chain.take()?;
        *chain = node.next.take();
        return Some(node);
    }
    match chain {
        Some(node) => remove_from_chain(&mut node.next, key),
        None => None,
    }
}

/// Glob matcher over raw bytes: `*` matches any run, `?` one byte.
pub fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.first() {
        None => text.is_empty(),
        Some(b'*') => (0..=text.len()).any(|i| glob_match(&pattern[1..], &text[i..])),
        Some(b'?') => !text.is_empty() && glob_match(&pattern[1..], &text[1..]),
        Some(&literal) => {
            text.first() == Some(&literal) && glob_match(&pattern[1..], &text[1..])
        }
    }
}

/// MurmurHash3, 32-bit x86 variant.
pub fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    const C1: u32 = 0xcc9e2d51;
    const C2: u32 = 0x1b873593;

    let mut h = seed;
    let chunks = data.chunks_exact(4);
    let tail = chunks.remainder();

    for chunk in chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h ^= k;
        h = h.rotate_left(13).wrapping_mul(5).wrapping_add(0xe6546b64);
    }

    if !tail.is_empty() {
        let mut k = 0u32;
        for (i, &byte) in tail.iter().enumerate() {
            k ^= (byte as u32) << (8 * i);
        }
        k = k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h ^= k;
    }

    h ^= data.len() as u32;
    h ^= h >> 16;
    h = h.wrapping_mul(0x85ebca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2ae35);
    h ^= h >> 16;
    h
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::collections::HashMap;

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn test_set_and_get() {
        let mut table = HashTable::new();
        assert_eq!(table.set(b("name"), b("ember")), SetOutcome::Inserted);
        assert_eq!(table.get(b"name"), Some(&b("ember")));
        assert_eq!(table.get(b"missing"), None);
    }

    #[test]
    fn test_set_replaces_value() {
        let mut table = HashTable::new();
        table.set(b("k"), b("v1"));
        assert_eq!(table.set(b("k"), b("v2")), SetOutcome::Updated);
        assert_eq!(table.get(b"k"), Some(&b("v2")));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_del() {
        let mut table = HashTable::new();
        table.set(b("k"), b("v"));
        assert!(table.del(b"k"));
        assert_eq!(table.get(b"k"), None);
        assert_eq!(table.len(), 0);
        // Deleting again is a no-op
        assert!(!table.del(b"k"));
    }

    #[test]
    fn test_del_middle_of_chain() {
        let mut table = HashTable::new();
        // Enough keys that some bucket holds a multi-node chain
        for i in 0..48 {
            table.set(b(&format!("key:{}", i)), b("v"));
        }
        for i in (0..48).step_by(3) {
            assert!(table.del(format!("key:{}", i).as_bytes()));
        }
        assert_eq!(table.len(), 32);
        for i in 0..48 {
            let present = table.exists(format!("key:{}", i).as_bytes());
            assert_eq!(present, i % 3 != 0, "key:{}", i);
        }
    }

    #[test]
    fn test_exists() {
        let mut table = HashTable::new();
        assert!(!table.exists(b"k"));
        table.set(b("k"), b("v"));
        assert!(table.exists(b"k"));
    }

    #[test]
    fn test_resize_keeps_all_keys() {
        let mut table = HashTable::new();
        assert_eq!(table.capacity(), 16);

        for i in 0..200 {
            table.set(b(&format!("key:{}", i)), b(&format!("value:{}", i)));
            assert!(
                table.load_factor() <= MAX_LOAD_FACTOR,
                "load factor {} after {} inserts",
                table.load_factor(),
                i + 1
            );
        }

        assert_eq!(table.len(), 200);
        assert!(table.capacity() > 16);
        assert!(table.capacity().is_power_of_two());

        for i in 0..200 {
            assert_eq!(
                table.get(format!("key:{}", i).as_bytes()),
                Some(&b(&format!("value:{}", i)))
            );
        }
    }

    #[test]
    fn test_clear() {
        let mut table = HashTable::new();
        for i in 0..50 {
            table.set(b(&format!("k{}", i)), b("v"));
        }
        table.clear();
        assert_eq!(table.len(), 0);
        assert!(table.is_empty());
        assert_eq!(table.get(b"k0"), None);
    }

    #[test]
    fn test_keys_glob() {
        let mut table = HashTable::new();
        table.set(b("hello"), b("1"));
        table.set(b("hallo"), b("2"));
        table.set(b("hllo"), b("3"));
        table.set(b("world"), b("4"));

        assert_eq!(table.keys(b"*").len(), 4);
        assert_eq!(table.keys(b"h*llo").len(), 3);
        assert_eq!(table.keys(b"h?llo").len(), 2);
        assert_eq!(table.keys(b"world").len(), 1);
        assert!(table.keys(b"nothing*").is_empty());
    }

    #[test]
    fn test_binary_keys() {
        let mut table = HashTable::new();
        let key = Bytes::from_static(b"bin\x00key\xff");
        table.set(key.clone(), b("v"));
        assert_eq!(table.get(&key), Some(&b("v")));
        assert_eq!(table.keys(b"bin*").len(), 1);
    }

    #[test]
    fn test_stats() {
        let mut table = HashTable::new();
        for i in 0..10 {
            table.set(b(&format!("k{}", i)), b("v"));
        }
        let stats = table.stats();
        assert_eq!(stats.entries, 10);
        assert_eq!(stats.buckets, 16);
        assert!(stats.used_buckets > 0 && stats.used_buckets <= 10);
        assert!(stats.max_chain_len >= 1);
        assert!((stats.load_factor - 10.0 / 16.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_glob_match_edges() {
        assert!(glob_match(b"*", b""));
        assert!(glob_match(b"*", b"anything"));
        assert!(glob_match(b"", b""));
        assert!(!glob_match(b"", b"x"));
        assert!(glob_match(b"a*b*c", b"aXXbYYc"));
        assert!(!glob_match(b"a*b*c", b"aXXbYY"));
        assert!(glob_match(b"??", b"ab"));
        assert!(!glob_match(b"??", b"a"));
    }

    #[test]
    fn test_murmur3_known_vectors() {
        assert_eq!(murmur3_32(b"", 0), 0);
        assert_eq!(murmur3_32(b"a", 0), 0x3c2569b2);
        assert_eq!(murmur3_32(b"hello", 0), 0x248bfa47);
    }

    #[test]
    fn test_random_ops_match_model() {
        let mut table = HashTable::new();
        let mut model: HashMap<Vec<u8>, Vec<u8>> = HashMap::new();
        let mut rng = StdRng::seed_from_u64(0xe3be4);

        for _ in 0..2000 {
            let key = format!("key:{}", rng.gen_range(0..300)).into_bytes();
            if rng.gen_bool(0.7) {
                let value = format!("v{}", rng.gen::<u32>()).into_bytes();
                table.set(Bytes::from(key.clone()), Bytes::from(value.clone()));
                model.insert(key, value);
            } else {
                assert_eq!(table.del(&key), model.remove(&key).is_some());
            }
            assert!(table.load_factor() <= MAX_LOAD_FACTOR);
        }

        assert_eq!(table.len(), model.len());
        for (key, value) in &model {
            assert_eq!(table.get(key).map(|v| v.as_ref()), Some(value.as_slice()));
        }
    }
}
