//! End-to-end scenarios exercising `Tree` against a real file-backed store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use pivotree::error::Result;
use pivotree::store::{BackingStore, BlockFileStore, FlushItem};
use pivotree::{Error, Oid, Tree};

/// Wraps a `BlockFileStore` and counts every item handed to `write_batch`,
/// so tests can assert on store-level write pressure without reaching into
/// the cache's internals.
struct CountingStore {
    inner: BlockFileStore,
    writes: AtomicUsize,
}

impl BackingStore<u32, u32> for CountingStore {
    fn block_size(&self) -> u16 {
        <BlockFileStore as BackingStore<u32, u32>>::block_size(&self.inner)
    }

    fn storage_type(&self) -> pivotree::oid::Medium {
        <BlockFileStore as BackingStore<u32, u32>>::storage_type(&self.inner)
    }

    fn next_block_offset(&self) -> u64 {
        <BlockFileStore as BackingStore<u32, u32>>::next_block_offset(&self.inner)
    }

    fn read_object(&self, oid: Oid) -> Result<pivotree::node::Node<u32, u32>> {
        <BlockFileStore as BackingStore<u32, u32>>::read_object(&self.inner, oid)
    }

    fn write_batch(&self, items: &[FlushItem], new_next_offset: u64) -> Result<()> {
        self.writes.fetch_add(items.len(), Ordering::SeqCst);
        <BlockFileStore as BackingStore<u32, u32>>::write_batch(&self.inner, items, new_next_offset)
    }

    fn remove(&self, oid: Oid) -> Result<()> {
        <BlockFileStore as BackingStore<u32, u32>>::remove(&self.inner, oid)
    }
}

fn file_backed_tree(degree: usize, capacity: usize) -> (Tree<u32, u32>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pivotree.dat");
    let tree = Tree::open(degree, capacity, 512, 1 << 24, Some(&path)).unwrap();
    (tree, dir)
}

#[test]
fn scenario_1_empty_tree() {
    let (t, _dir) = file_backed_tree(4, 64);
    assert_eq!(t.search(&7).unwrap(), None);
    assert!(matches!(t.remove(&7), Err(Error::KeyDoesNotExist)));
}

#[test]
fn scenario_2_ordered_insert_then_search() {
    let (t, _dir) = file_backed_tree(4, 64);
    for i in 1..=16u32 {
        t.insert(i, i).unwrap();
    }
    for i in 1..=16u32 {
        assert_eq!(t.search(&i).unwrap(), Some(i));
    }
    let (lru, map) = t.cache_state();
    assert_eq!(lru, map);
}

#[test]
fn scenario_3_remove_evens_preserves_odds() {
    let (t, _dir) = file_backed_tree(4, 64);
    for i in 1..=16u32 {
        t.insert(i, i).unwrap();
    }
    for i in (2..=16u32).step_by(2) {
        t.remove(&i).unwrap();
    }
    for i in 1..=16u32 {
        let expected = if i % 2 == 0 { None } else { Some(i) };
        assert_eq!(t.search(&i).unwrap(), expected);
    }
}

#[test]
fn scenario_4_reverse_insert_then_duplicate_rejected() {
    let (t, _dir) = file_backed_tree(4, 64);
    for i in (1..=16u32).rev() {
        t.insert(i, i).unwrap();
    }
    assert!(matches!(t.insert(1, 999), Err(Error::InsertFailed)));
    assert_eq!(t.search(&1).unwrap(), Some(1));
    for i in 1..=16u32 {
        assert_eq!(t.search(&i).unwrap(), Some(i));
    }
}

#[test]
fn scenario_5_small_capacity_forces_eviction() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pivotree.dat");
    let inner = BlockFileStore::create(&path, 512, 1 << 24).unwrap();
    let store = Arc::new(CountingStore {
        inner,
        writes: AtomicUsize::new(0),
    });
    let t: Tree<u32, u32> = Tree::with_store(4, 4, store.clone());

    for i in 1..=100u32 {
        t.insert(i, i).unwrap();
    }
    for i in 1..=100u32 {
        assert_eq!(t.search(&i).unwrap(), Some(i));
    }

    let (lru, _) = t.cache_state();
    assert!(lru <= 4 * 3, "lru_len {lru} grew unexpectedly large for a capacity-4 cache");
    assert!(
        store.writes.load(Ordering::SeqCst) >= 96,
        "expected the backing store to have absorbed at least 96 writes, saw {}",
        store.writes.load(Ordering::SeqCst)
    );
}

#[test]
fn flush_then_reopen_root_is_stable() {
    let (t, _dir) = file_backed_tree(4, 64);
    for i in 1..=16u32 {
        t.insert(i, i).unwrap();
    }
    t.flush().unwrap();
    for i in 1..=16u32 {
        assert_eq!(t.search(&i).unwrap(), Some(i));
    }
    let root = t.close().unwrap();
    assert!(!root.is_volatile(), "a root surviving close() must be durable");
}
