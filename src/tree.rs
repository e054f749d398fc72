//! Tree-level traversal: owns the root OID, drives insert/search/remove
//! descents, and is the sole place that reacts to OID rewrites the cache
//! hands back by patching parent pointers on the fly.
//!
//! The retained-path discipline of §4.6 is implemented with
//! [`cache::WriteLatch`]/[`cache::ReadLatch`] -- owned guards, independent of
//! any stack borrow -- so a descent can hold an arbitrary-length chain of
//! node latches in a `Vec` and release a prefix of it early once a safe
//! ancestor is found.

use std::path::Path;
use std::sync::Arc;

use log::{debug, trace};
use parking_lot::RwLock;

use crate::cache::{Cache, ReadLatch, WriteLatch};
use crate::fixed::{Key, Value};
use crate::node::{InternalNode, Node, RebalancePlan};
use crate::oid::Oid;
use crate::store::{BackingStore, BlockFileStore, PmemStore, VolatileStore};
use crate::{Error, Result};

/// One entry of a retained descent path: the OID a node was last known
/// under, an owned write latch on it (the `ArcRwLockWriteGuard` this crate's
/// `arc_lock` feature provides keeps the node's backing `Arc` alive on its
/// own, so the cache can never consider the node evictable out from under
/// us -- eviction requires `ref_count == 1`), and, for internal nodes, the
/// index of the child this descent followed (needed later to locate
/// siblings for rebalancing).
struct PathEntry<K, V> {
    oid: Oid,
    guard: WriteLatch<K, V>,
    child_idx: Option<usize>,
}

/// The embedded B+ tree index.
///
/// Generic over any [`Key`]/[`Value`] pair satisfying the fixed-width, total
/// order, `Copy` bounds the crate's marshaller and node layer require.
pub struct Tree<K, V> {
    degree: usize,
    root: RwLock<Oid>,
    cache: Arc<Cache<K, V>>,
}

impl<K: Key, V: Value> Tree<K, V> {
    /// Opens a tree backed by a file at `backing_path`, or, if `None`, an
    /// in-memory-only volatile store (nothing is ever actually persisted;
    /// eviction still occurs, but evicted nodes can never be faulted back
    /// in, so callers should size `cache_capacity` generously for that mode).
    pub fn open(
        degree: usize,
        cache_capacity: usize,
        block_size: u16,
        storage_size_bytes: u64,
        backing_path: Option<impl AsRef<Path>>,
    ) -> Result<Self> {
        let store: Arc<dyn BackingStore<K, V>> = match backing_path {
            Some(path) => Arc::new(BlockFileStore::create(path, block_size, storage_size_bytes)?),
            None => Arc::new(VolatileStore::new()),
        };
        Ok(Self::with_store(degree, cache_capacity, store))
    }

    /// Opens a tree backed by a persistent-memory mapping at `backing_path`.
    pub fn open_pmem(
        degree: usize,
        cache_capacity: usize,
        block_size: u16,
        storage_size_bytes: u64,
        backing_path: impl AsRef<Path>,
    ) -> Result<Self> {
        let store = Arc::new(PmemStore::create(backing_path, block_size, storage_size_bytes)?);
        Ok(Self::with_store(degree, cache_capacity, store))
    }

    /// Opens a tree against an already-constructed backing store. Exposed so
    /// callers (and tests) can share one store across trees, or plug in a
    /// store implementation of their own.
    pub fn with_store(degree: usize, cache_capacity: usize, store: Arc<dyn BackingStore<K, V>>) -> Self {
        assert!(degree >= 2, "degree must allow at least a binary split");
        let cache = Arc::new(Cache::new(cache_capacity, store));
        let (root_oid, _) = cache.create(Node::empty_leaf());
        Tree {
            degree,
            root: RwLock::new(root_oid),
            cache,
        }
    }

    /// `(lru_len, map_len)` cache diagnostics, forwarded from the cache.
    pub fn cache_state(&self) -> (usize, usize) {
        self.cache.cache_state()
    }

    /// Data-only drain: flushes every dirty leaf to the backing store,
    /// leaving the tree's structure resident. Safe to call concurrently with
    /// readers and writers.
    pub fn flush(&self) -> Result<()> {
        self.cache.flush_leaves()
    }

    /// Full shutdown drain: persists every dirty node, leaves and internals
    /// alike, and returns the root OID a caller can record externally if it
    /// wants to reopen this tree's data later (bootstrap across restarts is
    /// explicitly out of scope for this crate -- see `DESIGN.md`).
    pub fn close(self) -> Result<Oid> {
        self.cache.drain_all()?;
        Ok(*self.root.read())
    }

    /// Patches `old` -> `new` into whichever node the current descent step's
    /// parent is (the last retained path entry), or into the root anchor if
    /// there is no retained parent yet (i.e. `old` was the root OID).
    fn apply_rewrite(&self, path: &mut [PathEntry<K, V>], root_guard: &mut Option<parking_lot::RwLockWriteGuard<'_, Oid>>, old: Oid, new: Oid) {
        if let Some(parent) = path.last_mut() {
            if let Some(internal) = parent.guard.as_internal_mut() {
                internal.rewrite_child_oid(old, new);
                self.cache.mark_dirty(parent.oid);
            }
        } else if let Some(rg) = root_guard.as_mut() {
            **rg = new;
        }
    }

    // ---------------------------------------------------------------
    // search
    // ---------------------------------------------------------------

    /// Looks up `key`. Returns `Ok(None)` if absent (the spec's
    /// `KeyDoesNotExist` is surfaced to the `Tree::search` caller as `None`,
    /// not an error, matching §6's "Option<value>" signature; `remove`, by
    /// contrast, returns the error variant, per §7's "search ... returns
    /// `KeyDoesNotExist` (not a null value)" note about *this crate's* value
    /// type being `Option` already).
    pub fn search(&self, key: &K) -> Result<Option<V>> {
        let mut current_oid = *self.root.read();
        trace!("search: descending from root {current_oid}");

        let (mut resident, rewritten) = self.cache.get(current_oid)?;
        if let Some(new_oid) = rewritten {
            let mut rg = self.root.write();
            if *rg == current_oid {
                *rg = new_oid;
            }
            drop(rg);
            current_oid = new_oid;
        }
        let mut guard: ReadLatch<K, V> = resident.read_arc();

        loop {
            match &*guard {
                Node::Leaf(leaf) => return Ok(leaf.lookup(key)),
                Node::Internal(internal) => {
                    let child_oid = internal.child(key);
                    let (child_resident, rewritten) = self.cache.get(child_oid)?;
                    let effective_child_oid = if let Some(new_oid) = rewritten {
                        drop(guard);
                        let mut wg = resident.write_arc();
                        if let Some(internal_mut) = wg.as_internal_mut() {
                            internal_mut.rewrite_child_oid(child_oid, new_oid);
                        }
                        drop(wg);
                        self.cache.mark_dirty(current_oid);
                        new_oid
                    } else {
                        drop(guard);
                        child_oid
                    };
                    let child_guard = child_resident.read_arc();
                    resident = child_resident;
                    current_oid = effective_child_oid;
                    guard = child_guard;
                }
            }
        }
    }

    // ---------------------------------------------------------------
    // insert
    // ---------------------------------------------------------------

    /// Inserts `(key, value)`. Returns `Err(InsertFailed)` if `key` is
    /// already present; the tree is left unmodified in that case.
    pub fn insert(&self, key: K, value: V) -> Result<()> {
        let mut root_guard = Some(self.root.write());
        let mut path: Vec<PathEntry<K, V>> = Vec::new();
        let mut visited: Vec<Oid> = Vec::new();
        let mut current_oid = *root_guard.as_ref().unwrap();

        loop {
            let (resident, rewritten) = self.cache.get(current_oid)?;
            if let Some(new_oid) = rewritten {
                self.apply_rewrite(&mut path, &mut root_guard, current_oid, new_oid);
                current_oid = new_oid;
            }
            visited.push(current_oid);
            let guard = resident.write_arc();

            let is_leaf = guard.is_leaf();
            if !is_leaf {
                let internal = guard.as_internal().unwrap();
                if !internal.can_trigger_split(self.degree) {
                    trace!("insert: {current_oid} is a safe ancestor, releasing ancestors");
                    path.clear();
                    root_guard = None;
                }
            }

            if is_leaf {
                path.push(PathEntry {
                    oid: current_oid,
                    guard,
                    child_idx: None,
                });
                break;
            }

            let child_idx = guard.as_internal().unwrap().child_index(&key);
            let child_oid = guard.as_internal().unwrap().child_at(child_idx);
            path.push(PathEntry {
                oid: current_oid,
                guard,
                child_idx: Some(child_idx),
            });
            current_oid = child_oid;
        }

        // Leaf insert.
        let leaf_entry = path.last_mut().unwrap();
        let leaf_oid = leaf_entry.oid;
        let inserted = leaf_entry
            .guard
            .as_leaf_mut()
            .expect("descent terminates at a leaf")
            .insert(key, value);
        if !inserted {
            debug!("insert: {leaf_oid} already holds the key, rejecting");
            return Err(Error::InsertFailed);
        }
        self.cache.mark_dirty(leaf_oid);

        if !path.last().unwrap().guard.requires_split(self.degree) {
            drop(path);
            self.cache.reorder(&visited, false)?;
            self.cache.maybe_evict()?;
            return Ok(());
        }

        // Split cascade, bottom-up over the retained path: each level either
        // absorbs the lifted (pivot, right_oid) pair without overflowing
        // (done), or splits in turn and hands a new pair up to the next
        // level. `pending` is `None` once some level absorbs it cleanly.
        let mut pending = {
            let leaf_entry = path.last_mut().unwrap();
            let (pivot, right) = leaf_entry.guard.as_leaf_mut().unwrap().split();
            let (right_oid, _) = self.cache.create(Node::Leaf(right));
            Some((pivot, right_oid))
        };

        for idx in (0..path.len() - 1).rev() {
            let (pivot, right_oid) = pending.take().unwrap();
            let internal = path[idx].guard.as_internal_mut().unwrap();
            internal.insert(pivot, right_oid);
            self.cache.mark_dirty(path[idx].oid);
            if internal.requires_split(self.degree) {
                let (lifted, right) = internal.split();
                let (new_right_oid, _) = self.cache.create(Node::Internal(right));
                pending = Some((lifted, new_right_oid));
            }
        }

        // A split still pending after exhausting the retained path means its
        // top entry is the true root (the safe-ancestor discipline
        // guarantees any non-root retained top absorbs its child's split
        // without overflowing itself).
        if let Some((pivot, right_oid)) = pending {
            let rg = root_guard
                .as_mut()
                .expect("split propagated past a safe ancestor");
            let new_root = Node::Internal(InternalNode::new_root(pivot, path[0].oid, right_oid));
            let (new_root_oid, _) = self.cache.create(new_root);
            **rg = new_root_oid;
        }

        drop(path);
        self.cache.reorder(&visited, false)?;
        self.cache.maybe_evict()?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // remove
    // ---------------------------------------------------------------

    /// Removes `key`. Returns `Err(KeyDoesNotExist)` if it was absent.
    pub fn remove(&self, key: &K) -> Result<()> {
        let mut root_guard = Some(self.root.write());
        let mut path: Vec<PathEntry<K, V>> = Vec::new();
        let mut visited: Vec<Oid> = Vec::new();
        let mut current_oid = *root_guard.as_ref().unwrap();

        loop {
            let (resident, rewritten) = self.cache.get(current_oid)?;
            if let Some(new_oid) = rewritten {
                self.apply_rewrite(&mut path, &mut root_guard, current_oid, new_oid);
                current_oid = new_oid;
            }
            visited.push(current_oid);
            let guard = resident.write_arc();

            let is_leaf = guard.is_leaf();
            if !is_leaf {
                let internal = guard.as_internal().unwrap();
                if !internal.can_trigger_merge(self.degree) {
                    trace!("remove: {current_oid} is a safe ancestor, releasing ancestors");
                    path.clear();
                    root_guard = None;
                }
            }

            if is_leaf {
                path.push(PathEntry {
                    oid: current_oid,
                    guard,
                    child_idx: None,
                });
                break;
            }

            let child_idx = guard.as_internal().unwrap().child_index(key);
            let child_oid = guard.as_internal().unwrap().child_at(child_idx);
            path.push(PathEntry {
                oid: current_oid,
                guard,
                child_idx: Some(child_idx),
            });
            current_oid = child_oid;
        }

        let leaf_entry = path.last_mut().unwrap();
        let leaf_oid = leaf_entry.oid;
        let removed = leaf_entry
            .guard
            .as_leaf_mut()
            .expect("descent terminates at a leaf")
            .remove(key);
        if !removed {
            return Err(Error::KeyDoesNotExist);
        }
        self.cache.mark_dirty(leaf_oid);

        if !path.last().unwrap().guard.requires_merge(self.degree) {
            drop(path);
            self.cache.reorder(&visited, false)?;
            self.cache.maybe_evict()?;
            return Ok(());
        }

        self.rebalance_cascade(&mut path)?;

        // Root collapse: an internal root with zero pivots is replaced by
        // its one remaining child.
        if let Some(mut rg) = root_guard {
            if let Node::Internal(p) = &*path[0].guard {
                if p.is_empty() {
                    let only_child = p.child_at(0);
                    let root_oid = path[0].oid;
                    drop(path.drain(..));
                    self.cache.remove(root_oid);
                    *rg = only_child;
                    self.cache.reorder(&visited, false)?;
                    self.cache.maybe_evict()?;
                    return Ok(());
                }
            }
        } else {
            drop(path);
        }

        self.cache.reorder(&visited, false)?;
        self.cache.maybe_evict()?;
        Ok(())
    }

    /// Walks the retained path bottom-up, borrowing or merging at each level
    /// that still underflows, per §4.3's `rebalance_after_child_underflow`.
    /// Stops as soon as a borrow resolves the underflow, or once a merge
    /// leaves the next level up no longer underflowing.
    fn rebalance_cascade(&self, path: &mut Vec<PathEntry<K, V>>) -> Result<()> {
        let mut i = path.len() - 1;
        while i > 0 {
            let needs_merge = path[i].guard.requires_merge(self.degree);
            if !needs_merge {
                return Ok(());
            }

            let child_idx = path[i - 1]
                .child_idx
                .expect("non-leaf retained entries always carry a child index");
            let left_oid = if child_idx > 0 {
                Some(path[i - 1].guard.as_internal().unwrap().child_at(child_idx - 1))
            } else {
                None
            };
            let right_oid = {
                let parent = path[i - 1].guard.as_internal().unwrap();
                if child_idx + 1 < parent.children().len() {
                    Some(parent.child_at(child_idx + 1))
                } else {
                    None
                }
            };

            let left = left_oid.map(|o| self.fetch_sibling(path, i - 1, o)).transpose()?;
            let right = right_oid.map(|o| self.fetch_sibling(path, i - 1, o)).transpose()?;

            let left_len = left.as_ref().map(|(_, g)| g.len());
            let right_len = right.as_ref().map(|(_, g)| g.len());
            let plan = path[i - 1]
                .guard
                .as_internal()
                .unwrap()
                .choose_rebalance(child_idx, self.degree, left_len, right_len);

            match plan {
                RebalancePlan::BorrowFromLeft => {
                    let (left_oid, mut left_guard) = left.expect("plan requires a left sibling");
                    let separator = path[i - 1]
                        .guard
                        .as_internal()
                        .unwrap()
                        .pivots()
                        .get(child_idx - 1)
                        .copied()
                        .expect("left sibling implies a separator to its left");
                    let new_pivot = borrow_from_left_node(&mut *path[i].guard, &mut *left_guard, separator);
                    path[i - 1]
                        .guard
                        .as_internal_mut()
                        .unwrap()
                        .set_pivot(child_idx - 1, new_pivot);
                    self.cache.mark_dirty(left_oid);
                    self.cache.mark_dirty(path[i].oid);
                    self.cache.mark_dirty(path[i - 1].oid);
                    return Ok(());
                }
                RebalancePlan::BorrowFromRight => {
                    let (right_oid, mut right_guard) = right.expect("plan requires a right sibling");
                    let separator = path[i - 1]
                        .guard
                        .as_internal()
                        .unwrap()
                        .pivots()
                        .get(child_idx)
                        .copied()
                        .expect("right sibling implies a separator to its right");
                    let new_pivot = borrow_from_right_node(&mut *path[i].guard, &mut *right_guard, separator);
                    path[i - 1]
                        .guard
                        .as_internal_mut()
                        .unwrap()
                        .set_pivot(child_idx, new_pivot);
                    self.cache.mark_dirty(right_oid);
                    self.cache.mark_dirty(path[i].oid);
                    self.cache.mark_dirty(path[i - 1].oid);
                    return Ok(());
                }
                RebalancePlan::MergeWithLeft => {
                    let (left_oid, mut left_guard) = left.expect("plan requires a left sibling");
                    let separator = path[i - 1]
                        .guard
                        .as_internal()
                        .unwrap()
                        .pivots()
                        .get(child_idx - 1)
                        .copied()
                        .expect("left sibling implies a separator to its left");
                    merge_node(&mut *left_guard, separator, &mut *path[i].guard);
                    path[i - 1]
                        .guard
                        .as_internal_mut()
                        .unwrap()
                        .remove_after_merge(child_idx - 1, child_idx);
                    self.cache.mark_dirty(left_oid);
                    self.cache.mark_dirty(path[i - 1].oid);
                    self.cache.remove(path[i].oid);
                }
                RebalancePlan::MergeWithRight => {
                    let (right_oid, mut right_guard) = right.expect("plan requires a right sibling");
                    let separator = path[i - 1]
                        .guard
                        .as_internal()
                        .unwrap()
                        .pivots()
                        .get(child_idx)
                        .copied()
                        .expect("right sibling implies a separator to its right");
                    merge_node(&mut *path[i].guard, separator, &mut *right_guard);
                    path[i - 1]
                        .guard
                        .as_internal_mut()
                        .unwrap()
                        .remove_after_merge(child_idx, child_idx + 1);
                    self.cache.mark_dirty(path[i].oid);
                    self.cache.mark_dirty(path[i - 1].oid);
                    self.cache.remove(right_oid);
                }
            }

            i -= 1;
        }
        Ok(())
    }

    /// Fetches a sibling node named by `oid`, patching its OID into the
    /// parent at `parent_idx` in `path` if the cache reports a rewrite.
    /// Returns the (possibly rewritten) OID alongside the write latch.
    fn fetch_sibling(
        &self,
        path: &mut [PathEntry<K, V>],
        parent_idx: usize,
        oid: Oid,
    ) -> Result<(Oid, WriteLatch<K, V>)> {
        let (resident, rewritten) = self.cache.get(oid)?;
        let effective_oid = if let Some(new_oid) = rewritten {
            if let Some(internal) = path[parent_idx].guard.as_internal_mut() {
                internal.rewrite_child_oid(oid, new_oid);
                self.cache.mark_dirty(path[parent_idx].oid);
            }
            new_oid
        } else {
            oid
        };
        Ok((effective_oid, resident.write_arc()))
    }

    #[cfg(feature = "internal-api")]
    /// Diagnostic dump for tooling built on top of this crate: the current
    /// `(lru_len, map_len)` cache occupancy alongside the tree's current
    /// height (leaf depth along the leftmost spine; an empty or single-leaf
    /// tree has height 1), gated behind `internal-api` matching the
    /// teacher's own diagnostics feature gate.
    pub fn node_info(&self) -> Result<NodeInfo> {
        let (lru_len, map_len) = self.cache.cache_state();
        let mut height = 1;
        let mut oid = *self.root.read();
        loop {
            let (resident, _) = self.cache.get(oid)?;
            let guard = resident.read();
            match &*guard {
                Node::Leaf(_) => break,
                Node::Internal(p) => {
                    let next = p.child_at(0);
                    drop(guard);
                    oid = next;
                    height += 1;
                }
            }
        }
        Ok(NodeInfo {
            lru_len,
            map_len,
            height,
        })
    }
}

#[cfg(feature = "internal-api")]
/// Snapshot returned by [`Tree::node_info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeInfo {
    pub lru_len: usize,
    pub map_len: usize,
    /// Number of levels from the root to a leaf, inclusive (a tree with only
    /// the root leaf has height 1).
    pub height: usize,
}

fn borrow_from_left_node<K: Key, V: Value>(
    node: &mut Node<K, V>,
    lhs: &mut Node<K, V>,
    separator: K,
) -> K {
    match (node, lhs) {
        (Node::Leaf(n), Node::Leaf(l)) => n.borrow_from_left(l),
        (Node::Internal(n), Node::Internal(l)) => n.borrow_from_left(l, separator),
        _ => unreachable!("rebalance: sibling shape mismatch"),
    }
}

fn borrow_from_right_node<K: Key, V: Value>(
    node: &mut Node<K, V>,
    rhs: &mut Node<K, V>,
    separator: K,
) -> K {
    match (node, rhs) {
        (Node::Leaf(n), Node::Leaf(r)) => n.borrow_from_right(r),
        (Node::Internal(n), Node::Internal(r)) => n.borrow_from_right(r, separator),
        _ => unreachable!("rebalance: sibling shape mismatch"),
    }
}

fn merge_node<K: Key, V: Value>(left: &mut Node<K, V>, separator: K, right: &mut Node<K, V>) {
    match (left, std::mem::take(right)) {
        (Node::Leaf(l), Node::Leaf(r)) => l.merge(r),
        (Node::Internal(l), Node::Internal(r)) => l.merge(separator, r),
        _ => unreachable!("rebalance: sibling shape mismatch"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::TestResult;
    use quickcheck_macros::quickcheck;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    fn tree(degree: usize, capacity: usize) -> Tree<u32, u32> {
        Tree::open(degree, capacity, 256, 1 << 20, None::<&std::path::Path>).unwrap()
    }

    /// `rand_xorshift` seeded from the quickcheck-supplied key set itself, so
    /// a failing case's insertion order is reproducible from the printed
    /// `keys` value alone.
    fn shuffled(mut keys: Vec<u32>, seed: u64) -> Vec<u32> {
        let mut rng = rand_xorshift::XorShiftRng::seed_from_u64(seed);
        keys.shuffle(&mut rng);
        keys
    }

    #[quickcheck]
    fn insert_then_search_roundtrip_property(mut keys: Vec<u32>) -> TestResult {
        keys.sort_unstable();
        keys.dedup();
        if keys.is_empty() || keys.len() > 500 {
            return TestResult::discard();
        }
        let t = tree(4, 32);
        for &k in &shuffled(keys.clone(), keys.len() as u64) {
            t.insert(k, k.wrapping_mul(7)).unwrap();
        }
        for &k in &keys {
            if t.search(&k).unwrap() != Some(k.wrapping_mul(7)) {
                return TestResult::failed();
            }
        }
        TestResult::passed()
    }

    #[quickcheck]
    fn insert_then_remove_then_search_is_absent(mut keys: Vec<u32>) -> TestResult {
        keys.sort_unstable();
        keys.dedup();
        if keys.is_empty() || keys.len() > 500 {
            return TestResult::discard();
        }
        let t = tree(4, 32);
        for &k in &shuffled(keys.clone(), keys.len() as u64) {
            t.insert(k, k).unwrap();
        }
        for &k in &shuffled(keys.clone(), keys.len() as u64 + 1) {
            t.remove(&k).unwrap();
            if t.search(&k).unwrap().is_some() {
                return TestResult::failed();
            }
        }
        TestResult::passed()
    }

    #[test]
    fn empty_tree_search_and_remove() {
        let t = tree(4, 64);
        assert_eq!(t.search(&7).unwrap(), None);
        assert!(matches!(t.remove(&7), Err(Error::KeyDoesNotExist)));
    }

    #[test]
    fn insert_then_search_roundtrip() {
        let t = tree(4, 64);
        for i in 1..=16u32 {
            t.insert(i, i * 10).unwrap();
        }
        for i in 1..=16u32 {
            assert_eq!(t.search(&i).unwrap(), Some(i * 10));
        }
        let (lru, map) = t.cache_state();
        assert_eq!(lru, map);
    }

    #[test]
    fn insert_remove_evens_then_search() {
        let t = tree(4, 64);
        for i in 1..=16u32 {
            t.insert(i, i * 10).unwrap();
        }
        for i in (2..=16u32).step_by(2) {
            t.remove(&i).unwrap();
        }
        for i in 1..=16u32 {
            if i % 2 == 0 {
                assert_eq!(t.search(&i).unwrap(), None);
            } else {
                assert_eq!(t.search(&i).unwrap(), Some(i * 10));
            }
        }
    }

    #[test]
    fn duplicate_insert_rejected() {
        let t = tree(4, 64);
        for i in (1..=16u32).rev() {
            t.insert(i, i).unwrap();
        }
        assert!(matches!(t.insert(1, 999), Err(Error::InsertFailed)));
        assert_eq!(t.search(&1).unwrap(), Some(1));
    }

    #[test]
    fn eviction_forces_store_round_trip() {
        // Needs a real backing medium: with no `backing_path` (the
        // `VolatileStore` used by the `tree()` helper above), an evicted
        // node is gone for good (see `store::volatile`), so this scenario --
        // scenario 5 of the spec -- is exercised against a file-backed tree.
        let file = tempfile::NamedTempFile::new().unwrap();
        let t: Tree<u32, u32> =
            Tree::open(4, 4, 256, 1 << 20, Some(file.path())).unwrap();
        for i in 1..=100u32 {
            t.insert(i, i).unwrap();
        }
        for i in 1..=100u32 {
            assert_eq!(t.search(&i).unwrap(), Some(i));
        }
        let (lru, _) = t.cache_state();
        assert!(lru <= 4 * 3, "lru_len {lru} grew unexpectedly large");
    }

    #[test]
    fn volatile_backing_survives_eviction_pressure_without_panicking() {
        // No durable medium: eviction must still shrink the footprint (by
        // dropping entries) rather than panicking while trying to mint a
        // `File`/`PMem` OID for them.
        let t = tree(4, 4);
        for i in 1..=100u32 {
            t.insert(i, i).unwrap();
        }
        let (lru, _) = t.cache_state();
        assert!(lru <= 4 * 3, "lru_len {lru} grew unexpectedly large");
    }
}
