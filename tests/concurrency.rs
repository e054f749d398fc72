//! The 8-thread concurrent insert/search/delete workload from spec scenario 6:
//! disjoint inserts, then full-union searches, then disjoint deletes, with
//! every key gone and the cache settled to a single resident node at the end.

use std::sync::Arc;
use std::thread;

use pivotree::Tree;

const THREADS: u32 = 8;
const KEYS_PER_THREAD: u32 = 10_000;

#[test]
fn eight_threads_insert_search_delete() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pivotree.dat");
    let tree: Arc<Tree<u32, u32>> = Arc::new(
        Tree::open(64, 256, 4096, 1 << 26, Some(&path)).expect("tree opens against a fresh file"),
    );

    thread::scope(|scope| {
        for t in 0..THREADS {
            let tree = Arc::clone(&tree);
            scope.spawn(move || {
                let base = t * KEYS_PER_THREAD;
                for k in base..base + KEYS_PER_THREAD {
                    tree.insert(k, k).unwrap();
                }
            });
        }
    });

    thread::scope(|scope| {
        for t in 0..THREADS {
            let tree = Arc::clone(&tree);
            scope.spawn(move || {
                let base = t * KEYS_PER_THREAD;
                for k in base..base + KEYS_PER_THREAD {
                    assert_eq!(tree.search(&k).unwrap(), Some(k));
                }
            });
        }
    });

    thread::scope(|scope| {
        for t in 0..THREADS {
            let tree = Arc::clone(&tree);
            scope.spawn(move || {
                let base = t * KEYS_PER_THREAD;
                for k in base..base + KEYS_PER_THREAD {
                    tree.remove(&k).unwrap();
                }
            });
        }
    });

    for k in 0..THREADS * KEYS_PER_THREAD {
        assert_eq!(tree.search(&k).unwrap(), None);
    }

    let (lru, map) = tree.cache_state();
    assert_eq!((lru, map), (1, 1), "an empty tree should settle to a single resident root leaf");
}
