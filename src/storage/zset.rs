//! Sorted Sets
//!
//! A sorted set keeps members ordered by `(score, member)`: score
//! ascending, ties broken by member bytes ascending. That pair ordering
//! is the canonical total order every rank and range operation is
//! defined against.
//!
//! Two structures are kept consistent:
//!
//! - a member→score `HashMap` for O(1) ZSCORE lookups, and
//! - an AVL tree keyed on `(score, member)` for ordered traversal.
//!
//! Every tree node carries its subtree size next to its height, so
//! rank queries and rank-range extraction descend the tree instead of
//! walking it: O(log n) for ZRANK, O(log n + k) for ZRANGE. The tree
//! owns its nodes outright (`Option<Box<AvlNode>>`); consistency between
//! the two indices is maintained by [`SortedSet`], not by the nodes.
//!
//! Scores are f64 values; NaN is rejected at the command layer and never
//! reaches this module. Ordering uses `f64::total_cmp`, so every score
//! the structure can hold has a defined position.

use bytes::Bytes;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Score type (IEEE 754 double, like Redis).
pub type Score = f64;

/// Tree key: the (score, member) pair.
#[derive(Debug, Clone)]
struct EntryKey {
    score: Score,
    member: Bytes,
}

impl EntryKey {
    fn cmp(&self, other: &EntryKey) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| self.member.cmp(&other.member))
    }
}

/// AVL node annotated with height and subtree size.
#[derive(Debug)]
struct AvlNode {
    key: EntryKey,
    height: i32,
    size: usize,
    left: Option<Box<AvlNode>>,
    right: Option<Box<AvlNode>>,
}

impl AvlNode {
    fn new(key: EntryKey) -> Box<AvlNode> {
        Box::new(AvlNode {
            key,
            height: 1,
            size: 1,
            left: None,
            right: None,
        })
    }
}

type Link = Option<Box<AvlNode>>;

fn height(link: &Link) -> i32 {
    link.as_ref().map_or(0, |n| n.height)
}

fn size(link: &Link) -> usize {
    link.as_ref().map_or(0, |n| n.size)
}

/// Recomputes a node's annotations from its children.
fn update(node: &mut AvlNode) {
    node.height = 1 + height(&node.left).max(height(&node.right));
    node.size = 1 + size(&node.left) + size(&node.right);
}

fn balance_factor(node: &AvlNode) -> i32 {
    height(&node.left) - height(&node.right)
}

fn rotate_left(mut node: Box<AvlNode>) -> Box<AvlNode> {
    let Some(mut pivot) = node.right.take() else {
        return node;
    };
    node.right = pivot.left.take();
    update(&mut node);
    pivot.left = Some(node);
    update(&mut pivot);
    pivot
}

fn rotate_right(mut node: Box<AvlNode>) -> Box<AvlNode> {
    let Some(mut pivot) = node.left.take() else {
        return node;
    };
    node.left = pivot.right.take();
    update(&mut node);
    pivot.right = Some(node);
    update(&mut pivot);
    pivot
}

/// Restores the AVL invariant at this node after a child changed.
fn rebalance(mut node: Box<AvlNode>) -> Box<AvlNode> {
    update(&mut node);
    let balance = balance_factor(&node);

    if balance > 1 {
        if let Some(left) = node.left.take() {
            // Left-right case needs the inner rotation first
            node.left = Some(if balance_factor(&left) < 0 {
                rotate_left(left)
            } else {
                left
            });
        }
        rotate_right(node)
    } else if balance < -1 {
        if let Some(right) = node.right.take() {
            node.right = Some(if balance_factor(&right) > 0 {
                rotate_right(right)
            } else {
                right
            });
        }
        rotate_left(node)
    } else {
        node
    }
}

fn insert(link: Link, key: EntryKey) -> (Box<AvlNode>, bool) {
    let Some(mut node) = link else {
        return (AvlNode::new(key), true);
    };

    let inserted = match key.cmp(&node.key) {
        Ordering::Less => {
            let (child, inserted) = insert(node.left.take(), key);
            node.left = Some(child);
            inserted
        }
        Ordering::Greater => {
            let (child, inserted) = insert(node.right.take(), key);
            node.right = Some(child);
            inserted
        }
        // The member map guarantees (score, member) uniqueness, so this
        // arm only fires on redundant re-adds of an identical pair
        Ordering::Equal => return (node, false),
    };

    (rebalance(node), inserted)
}

fn remove(link: Link, key: &EntryKey) -> (Link, bool) {
    let Some(mut node) = link else {
        return (None, false);
    };

    let removed = match key.cmp(&node.key) {
        Ordering::Less => {
            let (child, removed) = remove(node.left.take(), key);
            node.left = child;
            removed
        }
        Ordering::Greater => {
            let (child, removed) = remove(node.right.take(), key);
            node.right = child;
            removed
        }
        Ordering::Equal => match (node.left.take(), node.right.take()) {
            (None, right) => return (right, true),
            (Some(left), None) => return (Some(left), true),
            (Some(left), Some(right)) => {
                // Replace with the in-order successor
                let (rest, successor) = detach_min(right);
                node.key = successor;
                node.left = Some(left);
                node.right = rest;
                true
            }
        },
    };

    (Some(rebalance(node)), removed)
}

/// Unlinks the smallest key in the subtree, returning the remainder.
fn detach_min(mut node: Box<AvlNode>) -> (Link, EntryKey) {
    match node.left.take() {
        None => (node.right.take(), node.key),
        Some(left) => {
            let (rest, min_key) = detach_min(left);
            node.left = rest;
            (Some(rebalance(node)), min_key)
        }
    }
}

/// 0-based position of `key` in the in-order sequence.
fn rank_of(link: &Link, key: &EntryKey) -> Option<usize> {
    let mut preceding = 0;
    let mut cursor = link.as_deref();
    while let Some(node) = cursor {
        match key.cmp(&node.key) {
            Ordering::Less => cursor = node.left.as_deref(),
            Ordering::Greater => {
                preceding += size(&node.left) + 1;
                cursor = node.right.as_deref();
            }
            Ordering::Equal => return Some(preceding + size(&node.left)),
        }
    }
    None
}

/// Collects the in-order entries with ranks in `[start, stop]`,
/// both relative to this subtree. Subtree sizes prune whole branches.
fn collect_rank_range(link: &Link, start: usize, stop: usize, out: &mut Vec<(Bytes, Score)>) {
    let Some(node) = link.as_deref() else {
        return;
    };
    let left_size = size(&node.left);

    if start < left_size {
        collect_rank_range(&node.left, start, stop.min(left_size - 1), out);
    }
    if start <= left_size && left_size <= stop {
        out.push((node.key.member.clone(), node.key.score));
    }
    if stop > left_size {
        let shift = left_size + 1;
        collect_rank_range(&node.right, start.saturating_sub(shift), stop - shift, out);
    }
}

/// Collects entries with `min <= score <= max`, ascending.
fn collect_score_range(link: &Link, min: Score, max: Score, out: &mut Vec<(Bytes, Score)>) {
    let Some(node) = link.as_deref() else {
        return;
    };
    if node.key.score >= min {
        collect_score_range(&node.left, min, max, out);
    }
    if node.key.score >= min && node.key.score <= max {
        out.push((node.key.member.clone(), node.key.score));
    }
    if node.key.score <= max {
        collect_score_range(&node.right, min, max, out);
    }
}

fn count_score_range(link: &Link, min: Score, max: Score) -> usize {
    let Some(node) = link.as_deref() else {
        return 0;
    };
    let mut count = 0;
    if node.key.score >= min {
        count += count_score_range(&node.left, min, max);
    }
    if node.key.score >= min && node.key.score <= max {
        count += 1;
    }
    if node.key.score <= max {
        count += count_score_range(&node.right, min, max);
    }
    count
}

/// One named sorted set.
#[derive(Debug, Default)]
pub struct SortedSet {
    /// Member → score, the O(1) lookup side.
    scores: HashMap<Bytes, Score>,
    /// (score, member)-ordered side.
    root: Link,
}

impl SortedSet {
    /// Creates an empty sorted set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cardinality (ZCARD).
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    /// True if the set has no members.
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Inserts a member or updates its score (one ZADD pair).
    ///
    /// A score change re-files the ordered entry: the old (score,
    /// member) node is removed and a new one inserted. Returns true iff
    /// the member was newly added.
    pub fn add(&mut self, member: Bytes, score: Score) -> bool {
        if let Some(&old_score) = self.scores.get(&member) {
            if old_score.total_cmp(&score) != Ordering::Equal {
                let old_key = EntryKey {
                    score: old_score,
                    member: member.clone(),
                };
                let (root, _) = remove(self.root.take(), &old_key);
                let (root, _) = insert(
                    root,
                    EntryKey {
                        score,
                        member: member.clone(),
                    },
                );
                self.root = Some(root);
                self.scores.insert(member, score);
            }
            return false;
        }

        let (root, _) = insert(
            self.root.take(),
            EntryKey {
                score,
                member: member.clone(),
            },
        );
        self.root = Some(root);
        self.scores.insert(member, score);
        true
    }

    /// Removes a member (one ZREM argument). Returns true if present.
    pub fn remove(&mut self, member: &[u8]) -> bool {
        let Some((member, score)) = self.scores.remove_entry(member) else {
            return false;
        };
        let key = EntryKey { score, member };
        let (root, removed) = remove(self.root.take(), &key);
        self.root = root;
        debug_assert!(removed);
        true
    }

    /// Score of a member (ZSCORE).
    pub fn score(&self, member: &[u8]) -> Option<Score> {
        self.scores.get(member).copied()
    }

    /// 0-based ascending rank (ZRANK).
    pub fn rank(&self, member: &[u8]) -> Option<usize> {
        let score = *self.scores.get(member)?;
        rank_of(
            &self.root,
            &EntryKey {
                score,
                member: Bytes::copy_from_slice(member),
            },
        )
    }

    /// Descending rank: `card - 1 - rank` (ZREVRANK).
    pub fn rev_rank(&self, member: &[u8]) -> Option<usize> {
        self.rank(member).map(|rank| self.len() - 1 - rank)
    }

    /// Ascending range by rank with Redis index semantics (ZRANGE):
    /// negative indices count from the tail, out-of-range ends clamp,
    /// and an inverted range is empty.
    pub fn range(&self, start: i64, stop: i64) -> Vec<(Bytes, Score)> {
        let card = self.len() as i64;
        if card == 0 {
            return Vec::new();
        }

        let mut start = if start < 0 { card + start } else { start };
        let mut stop = if stop < 0 { card + stop } else { stop };
        if start < 0 {
            start = 0;
        }
        if stop >= card {
            stop = card - 1;
        }
        if start > stop || start >= card {
            return Vec::new();
        }

        let mut out = Vec::with_capacity((stop - start + 1) as usize);
        collect_rank_range(&self.root, start as usize, stop as usize, &mut out);
        out
    }

    /// Descending range by rank (ZREVRANGE): the ascending range,
    /// reversed.
    pub fn rev_range(&self, start: i64, stop: i64) -> Vec<(Bytes, Score)> {
        let mut out = self.range(start, stop);
        out.reverse();
        out
    }

    /// Members with `min <= score <= max`, ascending (ZRANGEBYSCORE).
    pub fn range_by_score(&self, min: Score, max: Score) -> Vec<(Bytes, Score)> {
        let mut out = Vec::new();
        collect_score_range(&self.root, min, max, &mut out);
        out
    }

    /// Number of members with `min <= score <= max` (ZCOUNT).
    pub fn count_by_score(&self, min: Score, max: Score) -> usize {
        count_score_range(&self.root, min, max)
    }

    /// Removes every member.
    pub fn clear(&mut self) {
        self.scores.clear();
        self.root = None;
    }

    #[cfg(test)]
    fn check_invariants(&self) {
        fn check(link: &Link) -> (i32, usize) {
            let Some(node) = link.as_deref() else {
                return (0, 0);
            };
            let (lh, ls) = check(&node.left);
            let (rh, rs) = check(&node.right);
            assert!((lh - rh).abs() <= 1, "unbalanced node");
            assert_eq!(node.height, 1 + lh.max(rh), "stale height");
            assert_eq!(node.size, 1 + ls + rs, "stale size");
            if let Some(left) = node.left.as_deref() {
                assert_eq!(left.key.cmp(&node.key), Ordering::Less);
            }
            if let Some(right) = node.right.as_deref() {
                assert_eq!(right.key.cmp(&node.key), Ordering::Greater);
            }
            (node.height, node.size)
        }

        let (_, total) = check(&self.root);
        assert_eq!(total, self.scores.len(), "index cardinality mismatch");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    fn populated() -> SortedSet {
        let mut set = SortedSet::new();
        set.add(b("x"), 1.0);
        set.add(b("y"), 2.0);
        set.add(b("w"), 1.0);
        set.add(b("z"), 3.0);
        set
    }

    #[test]
    fn test_add_and_score() {
        let mut set = SortedSet::new();
        assert!(set.add(b("a"), 1.5));
        assert!(!set.add(b("a"), 1.5));
        assert_eq!(set.score(b"a"), Some(1.5));
        assert_eq!(set.score(b"missing"), None);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_score_update_refiles_entry() {
        let mut set = populated();
        // "w" currently ranks before "x" at score 1
        assert_eq!(set.rank(b"w"), Some(0));

        assert!(!set.add(b("w"), 10.0));
        assert_eq!(set.len(), 4);
        assert_eq!(set.score(b"w"), Some(10.0));
        assert_eq!(set.rank(b"w"), Some(3));
        set.check_invariants();
    }

    #[test]
    fn test_remove() {
        let mut set = populated();
        assert!(set.remove(b"y"));
        assert!(!set.remove(b"y"));
        assert_eq!(set.len(), 3);
        assert_eq!(set.score(b"y"), None);
        assert_eq!(set.rank(b"z"), Some(2));
        set.check_invariants();
    }

    #[test]
    fn test_tie_break_is_lexicographic() {
        let set = populated();
        // Scores: w=1, x=1, y=2, z=3; w < x by member bytes
        let members: Vec<_> = set.range(0, -1).into_iter().map(|(m, _)| m).collect();
        assert_eq!(members, vec![b("w"), b("x"), b("y"), b("z")]);
    }

    #[test]
    fn test_rank_and_rev_rank() {
        let set = populated();
        assert_eq!(set.rank(b"w"), Some(0));
        assert_eq!(set.rank(b"z"), Some(3));
        assert_eq!(set.rev_rank(b"z"), Some(0));
        assert_eq!(set.rev_rank(b"w"), Some(3));
        assert_eq!(set.rank(b"missing"), None);
        assert_eq!(set.rev_rank(b"missing"), None);
    }

    #[test]
    fn test_range_negative_indices() {
        let set = populated();
        let last_two: Vec<_> = set.range(-2, -1).into_iter().map(|(m, _)| m).collect();
        assert_eq!(last_two, vec![b("y"), b("z")]);

        let all: Vec<_> = set.range(0, -1).into_iter().map(|(m, _)| m).collect();
        assert_eq!(all.len(), 4);
    }

    #[test]
    fn test_range_clamps_and_empties() {
        let set = populated();
        assert_eq!(set.range(0, 100).len(), 4);
        assert_eq!(set.range(-100, 1).len(), 2);
        assert!(set.range(2, 1).is_empty());
        assert!(set.range(10, 20).is_empty());
        assert!(SortedSet::new().range(0, -1).is_empty());
    }

    #[test]
    fn test_rev_range() {
        let set = populated();
        let members: Vec<_> = set.rev_range(0, -1).into_iter().map(|(m, _)| m).collect();
        assert_eq!(members, vec![b("z"), b("y"), b("x"), b("w")]);
    }

    #[test]
    fn test_range_by_score_inclusive() {
        let set = populated();
        let members: Vec<_> = set
            .range_by_score(1.0, 2.0)
            .into_iter()
            .map(|(m, _)| m)
            .collect();
        assert_eq!(members, vec![b("w"), b("x"), b("y")]);

        assert!(set.range_by_score(4.0, 10.0).is_empty());
        assert_eq!(set.range_by_score(f64::NEG_INFINITY, f64::INFINITY).len(), 4);
    }

    #[test]
    fn test_count_by_score() {
        let set = populated();
        assert_eq!(set.count_by_score(1.0, 1.0), 2);
        assert_eq!(set.count_by_score(1.0, 3.0), 4);
        assert_eq!(set.count_by_score(2.5, 2.9), 0);
    }

    #[test]
    fn test_clear() {
        let mut set = populated();
        set.clear();
        assert!(set.is_empty());
        assert!(set.range(0, -1).is_empty());
        assert_eq!(set.rank(b"x"), None);
    }

    #[test]
    fn test_negative_scores_order_before_positive() {
        let mut set = SortedSet::new();
        set.add(b("pos"), 5.0);
        set.add(b("neg"), -5.0);
        set.add(b("zero"), 0.0);
        let members: Vec<_> = set.range(0, -1).into_iter().map(|(m, _)| m).collect();
        assert_eq!(members, vec![b("neg"), b("zero"), b("pos")]);
    }

    #[test]
    fn test_random_ops_stay_sorted_and_consistent() {
        let mut set = SortedSet::new();
        let mut model: HashMap<Vec<u8>, f64> = HashMap::new();
        let mut rng = StdRng::seed_from_u64(0x5eed);

        for _ in 0..3000 {
            let member = format!("m{}", rng.gen_range(0..200)).into_bytes();
            if rng.gen_bool(0.75) {
                let score = f64::from(rng.gen_range(-50i32..50));
                set.add(Bytes::from(member.clone()), score);
                model.insert(member, score);
            } else {
                assert_eq!(set.remove(&member), model.remove(&member).is_some());
            }
        }

        set.check_invariants();
        assert_eq!(set.len(), model.len());

        // Full range must be the model sorted by (score, member), no dups
        let listed = set.range(0, -1);
        let mut expected: Vec<(Vec<u8>, f64)> = model.into_iter().collect();
        expected.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        assert_eq!(listed.len(), expected.len());
        for ((member, score), (exp_member, exp_score)) in listed.iter().zip(&expected) {
            assert_eq!(member.as_ref(), exp_member.as_slice());
            assert_eq!(score, exp_score);
        }

        // Every listed rank agrees with rank()
        for (i, (member, _)) in listed.iter().enumerate() {
            assert_eq!(set.rank(member), Some(i));
        }
    }
}
