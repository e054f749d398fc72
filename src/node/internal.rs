//! The internal ("pivot") node: sorted pivot keys plus one more child OID
//! than pivot.

use crate::fixed::Key;
use crate::oid::Oid;

/// An internal node holding `pivots.len()` separator keys and
/// `pivots.len() + 1` child OIDs.
#[derive(Debug, Clone)]
pub struct InternalNode<K> {
    pivots: Vec<K>,
    children: Vec<Oid>,
}

/// Which sibling absorbed / donated to whom, returned by rebalancing so the
/// tree layer knows which cache entry (if any) must be dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebalanceOutcome {
    /// A sibling donated an entry; no node was destroyed.
    Borrowed,
    /// The child at `absorbed_index` was merged into its neighbour and must
    /// be removed from the cache by the caller.
    Merged { absorbed_oid: Oid },
}

impl<K: Key> InternalNode<K> {
    /// A fresh internal node with exactly two children and one pivot,
    /// created when a root splits.
    pub fn new_root(pivot: K, left: Oid, right: Oid) -> Self {
        InternalNode {
            pivots: vec![pivot],
            children: vec![left, right],
        }
    }

    pub(crate) fn from_parts(pivots: Vec<K>, children: Vec<Oid>) -> Self {
        debug_assert_eq!(children.len(), pivots.len() + 1);
        debug_assert!(pivots.windows(2).all(|w| w[0] < w[1]));
        InternalNode { pivots, children }
    }

    /// Number of pivots (one less than the number of children).
    pub fn len(&self) -> usize {
        self.pivots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pivots.is_empty()
    }

    pub fn pivots(&self) -> &[K] {
        &self.pivots
    }

    pub fn children(&self) -> &[Oid] {
        &self.children
    }

    /// First pivot, used as a probe when a grandparent locates this node
    /// among its own children -- mirrors `LeafNode::first_key`, but an
    /// internal node's probe key is the minimum key reachable through it,
    /// which is its leftmost pivot's predecessor; callers instead use the
    /// OID identity match documented on `rewrite_child_oid`.
    pub fn first_pivot(&self) -> Option<K> {
        self.pivots.first().copied()
    }

    /// First pivot `> k` -- i.e. the index of the child subtree that must
    /// contain `k`.
    pub fn child_index(&self, k: &K) -> usize {
        self.pivots.partition_point(|p| *p <= k)
    }

    pub fn child(&self, k: &K) -> Oid {
        self.children[self.child_index(k)]
    }

    pub fn child_at(&self, idx: usize) -> Oid {
        self.children[idx]
    }

    pub fn requires_split(&self, degree: usize) -> bool {
        self.len() > degree
    }

    pub fn can_trigger_split(&self, degree: usize) -> bool {
        self.len() + 1 > degree
    }

    pub fn requires_merge(&self, degree: usize) -> bool {
        self.len() <= (degree + 1) / 2
    }

    /// Pre-check used by the descent: would one more removal push this node
    /// into underflow? Mirrors `can_trigger_split` for the merge side.
    pub fn can_trigger_merge(&self, degree: usize) -> bool {
        self.len() <= (degree + 1) / 2 + 1
    }

    /// Overwrites the separator at `idx` -- used after a leaf-level borrow
    /// changes which key divides two sibling subtrees without changing the
    /// child count.
    pub fn set_pivot(&mut self, idx: usize, key: K) {
        self.pivots[idx] = key;
    }

    /// Removes the pivot at `separator_idx` and the child at
    /// `absorbed_child_idx` after a merge has folded one child's contents
    /// into a sibling. The surviving child (not removed here) keeps its own
    /// slot and OID.
    pub fn remove_after_merge(&mut self, separator_idx: usize, absorbed_child_idx: usize) {
        self.pivots.remove(separator_idx);
        self.children.remove(absorbed_child_idx);
    }

    /// Inserts `pivot` at its sorted position, with `right_child` becoming
    /// the child immediately to its right.
    pub fn insert(&mut self, pivot: K, right_child: Oid) {
        let i = self.pivots.partition_point(|p| *p < pivot);
        self.pivots.insert(i, pivot);
        self.children.insert(i + 1, right_child);
    }

    /// Splits this node in half. The right sibling takes the upper half of
    /// pivots/children; the pivot separating them is lifted out (it belongs
    /// to neither side) and returned along with the new right sibling.
    pub fn split(&mut self) -> (K, InternalNode<K>) {
        let m = self.pivots.len() / 2;
        let lifted = self.pivots[m];
        let right_pivots = self.pivots.split_off(m + 1);
        let right_children = self.children.split_off(m + 1);
        self.pivots.truncate(m);
        (lifted, InternalNode::from_parts(right_pivots, right_children))
    }

    /// Rotates the maximum `(child, pivot)` pair out of `lhs`, through
    /// `separator` (the parent's pivot between the two), into `self`.
    /// Returns the new separator the parent must store.
    pub fn borrow_from_left(&mut self, lhs: &mut InternalNode<K>, separator: K) -> K {
        let moved_child = lhs.children.pop().expect("borrow_from_left: lhs empty");
        let new_separator = lhs.pivots.pop().expect("borrow_from_left: lhs empty");
        self.pivots.insert(0, separator);
        self.children.insert(0, moved_child);
        new_separator
    }

    /// Rotates the minimum `(child, pivot)` pair out of `rhs`, through
    /// `separator`, into `self`. Returns the new separator.
    pub fn borrow_from_right(&mut self, rhs: &mut InternalNode<K>, separator: K) -> K {
        let moved_child = rhs.children.remove(0);
        let new_separator = rhs.pivots.remove(0);
        self.pivots.push(separator);
        self.children.push(moved_child);
        new_separator
    }

    /// Absorbs `rhs` into `self`, with `separator` (the parent's pivot
    /// between them) becoming the pivot joining the two halves.
    pub fn merge(&mut self, separator: K, mut rhs: InternalNode<K>) {
        self.pivots.push(separator);
        self.pivots.append(&mut rhs.pivots);
        self.children.append(&mut rhs.children);
    }

    /// Finds `old` among the children and replaces it with `new`.
    ///
    /// Children are located structurally by their OID identity (the slot
    /// that still holds `old`), not by re-deriving the key range, since an
    /// OID rewrite never changes which subtree a child represents.
    pub fn rewrite_child_oid(&mut self, old: Oid, new: Oid) {
        for c in self.children.iter_mut() {
            if *c == old {
                *c = new;
                return;
            }
        }
        unreachable!("rewrite_child_oid: {old} not found among children");
    }

    /// Rebalances around the child at `child_idx`, which has just underflowed.
    /// `sibling_len` returns the pivot count of the sibling at the given
    /// index (the caller supplies this since siblings live in the cache, not
    /// in this node). Ties prefer the left sibling.
    ///
    /// On `Borrowed`, `self` has already been updated via `borrow_from_*` by
    /// the caller (this method only decides *which* sibling and *whether* to
    /// borrow or merge; the tree layer holds the actual sibling node guards
    /// and performs the mutation, since this node does not own them).
    pub fn choose_rebalance(
        &self,
        child_idx: usize,
        degree: usize,
        left_len: Option<usize>,
        right_len: Option<usize>,
    ) -> RebalancePlan {
        let min = (degree + 1) / 2;
        if let Some(len) = left_len {
            if len > min {
                return RebalancePlan::BorrowFromLeft;
            }
        }
        if let Some(len) = right_len {
            if len > min {
                return RebalancePlan::BorrowFromRight;
            }
        }
        if left_len.is_some() {
            RebalancePlan::MergeWithLeft
        } else {
            debug_assert!(right_len.is_some(), "child {child_idx} has no siblings");
            RebalancePlan::MergeWithRight
        }
    }
}

/// The decision `choose_rebalance` reaches; the tree layer carries it out
/// since it requires mutable access to sibling node guards this node does
/// not hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebalancePlan {
    BorrowFromLeft,
    BorrowFromRight,
    MergeWithLeft,
    MergeWithRight,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(pivots: Vec<u32>, children: Vec<Oid>) -> InternalNode<u32> {
        InternalNode::from_parts(pivots, children)
    }

    fn oid(n: u64) -> Oid {
        Oid::from_file(crate::oid::TypeTag::Leaf, n, 8)
    }

    #[test]
    fn child_index_upper_bound() {
        let n = node(vec![10, 20, 30], vec![oid(0), oid(1), oid(2), oid(3)]);
        assert_eq!(n.child_index(&5), 0);
        assert_eq!(n.child_index(&10), 1);
        assert_eq!(n.child_index(&15), 1);
        assert_eq!(n.child_index(&30), 3);
        assert_eq!(n.child_index(&31), 3);
    }

    #[test]
    fn insert_keeps_sorted() {
        let mut n = node(vec![10, 30], vec![oid(0), oid(1), oid(2)]);
        n.insert(20, oid(99));
        assert_eq!(n.pivots(), &[10, 20, 30]);
        assert_eq!(n.children(), &[oid(0), oid(1), oid(99), oid(2)]);
    }

    #[test]
    fn split_lifts_middle_pivot() {
        let mut n = node(
            vec![10, 20, 30, 40, 50],
            vec![oid(0), oid(1), oid(2), oid(3), oid(4), oid(5)],
        );
        let (lifted, right) = n.split();
        assert_eq!(lifted, 30);
        assert_eq!(n.pivots(), &[10, 20]);
        assert_eq!(right.pivots(), &[40, 50]);
        assert_eq!(n.children().len(), n.pivots().len() + 1);
        assert_eq!(right.children().len(), right.pivots().len() + 1);
    }

    #[test]
    fn rewrite_child_oid_replaces_matching_slot() {
        let mut n = node(vec![10], vec![oid(0), oid(1)]);
        n.rewrite_child_oid(oid(1), oid(42));
        assert_eq!(n.children(), &[oid(0), oid(42)]);
    }

    #[test]
    fn choose_rebalance_prefers_left_on_tie() {
        let n = node(vec![10], vec![oid(0), oid(1)]);
        let plan = n.choose_rebalance(0, 4, Some(3), Some(3));
        assert_eq!(plan, RebalancePlan::BorrowFromLeft);
    }

    #[test]
    fn choose_rebalance_merges_when_no_donor() {
        let n = node(vec![10], vec![oid(0), oid(1)]);
        let plan = n.choose_rebalance(0, 4, Some(2), None);
        assert_eq!(plan, RebalancePlan::MergeWithLeft);
    }

    #[test]
    fn remove_after_merge_drops_separator_and_child() {
        let mut n = node(vec![10, 20], vec![oid(0), oid(1), oid(2)]);
        n.remove_after_merge(0, 1);
        assert_eq!(n.pivots(), &[20]);
        assert_eq!(n.children(), &[oid(0), oid(2)]);
    }
}
