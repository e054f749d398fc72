//! The volatile backing store: the identity implementation used when no
//! durable medium is configured. Every resident node is, by construction,
//! still in the cache's `map` -- a `Volatile` OID reaching this store's
//! `read_object` indicates the cache lost track of a resident it never
//! evicted (evictions always rewrite to `File`/`PMem` first), which is a
//! corruption, not a normal miss.

use super::BackingStore;
use crate::fixed::{Key, Value};
use crate::node::Node;
use crate::oid::{Medium, Oid};
use crate::{Error, Result};

/// The in-memory-only store. `write_batch` is a no-op: volatile objects are
/// never actually persisted, they are only ever rewritten *away* from this
/// medium by the cache's eviction path before a real store's `write_batch`
/// is invoked.
#[derive(Debug, Default)]
pub struct VolatileStore;

impl VolatileStore {
    pub fn new() -> Self {
        VolatileStore
    }
}

impl<K: Key, V: Value> BackingStore<K, V> for VolatileStore {
    fn block_size(&self) -> u16 {
        1
    }

    fn storage_type(&self) -> Medium {
        Medium::Volatile
    }

    fn next_block_offset(&self) -> u64 {
        0
    }

    fn read_object(&self, oid: Oid) -> Result<Node<K, V>> {
        Err(Error::Fatal(format!(
            "volatile OID {oid} was not resident in the cache; this is a corrupted cache state"
        )))
    }

    fn write_batch(&self, items: &[super::FlushItem], _new_next_offset: u64) -> Result<()> {
        debug_assert!(items.is_empty(), "volatile store received items to flush");
        Ok(())
    }
}
