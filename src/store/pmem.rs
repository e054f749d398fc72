//! The persistent-memory store: an append-only allocator over an mmap'd
//! region.
//!
//! The teacher crate backs this with a native PMDK binding (`pmdk`, built via
//! `bindgen` against `libpmemobj`); that native dependency cannot be fetched
//! here, so this implementation is grounded instead on `memmap2` -- the mmap
//! crate used for the same "map a region, treat it as a byte-addressable
//! store" purpose elsewhere in this retrieval pack. See `DESIGN.md`.

use std::fs::OpenOptions;
use std::path::Path;

use memmap2::MmapMut;
use parking_lot::RwLock;

use super::{allocate, BackingStore, FlushItem};
use crate::fixed::{Key, Value};
use crate::marshal;
use crate::node::Node;
use crate::oid::{Medium, Oid};
use crate::{Error, Result};

struct Inner {
    mmap: MmapMut,
    next_offset: u64,
}

/// Append-only allocator over a memory-mapped region.
pub struct PmemStore {
    block_size: u16,
    inner: RwLock<Inner>,
}

impl PmemStore {
    /// Creates (or truncates) the backing file and maps `capacity_bytes` of
    /// it.
    pub fn create(path: impl AsRef<Path>, block_size: u16, capacity_bytes: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(capacity_bytes)?;
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        Ok(PmemStore {
            block_size,
            inner: RwLock::new(Inner {
                mmap,
                next_offset: 0,
            }),
        })
    }
}

impl<K: Key, V: Value> BackingStore<K, V> for PmemStore {
    fn block_size(&self) -> u16 {
        self.block_size
    }

    fn storage_type(&self) -> Medium {
        Medium::PMem
    }

    fn next_block_offset(&self) -> u64 {
        self.inner.read().next_offset
    }

    fn read_object(&self, oid: Oid) -> Result<Node<K, V>> {
        let (offset, size) = oid.location();
        let guard = self.inner.read();
        let start = offset as usize;
        let end = start + size as usize;
        let slice = guard
            .mmap
            .get(start..end)
            .ok_or_else(|| Error::Fatal(format!("OID {oid} out of bounds of the pmem mapping")))?;
        marshal::deserialize(slice)
    }

    fn write_batch(&self, items: &[FlushItem], new_next_offset: u64) -> Result<()> {
        let mut guard = self.inner.write();
        for item in items {
            let (offset, size) = item.new_oid.location();
            debug_assert_eq!(size as usize, item.bytes.len());
            let start = offset as usize;
            let end = start + item.bytes.len();
            guard
                .mmap
                .get_mut(start..end)
                .ok_or_else(|| {
                    Error::Fatal(format!("write of {size} bytes at {offset} overruns pmem mapping"))
                })?
                .copy_from_slice(&item.bytes);
        }
        guard.mmap.flush_async()?;
        guard.next_offset = new_next_offset;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oid::TypeTag;
    use tempfile::NamedTempFile;

    #[test]
    fn write_then_read_round_trips() {
        let file = NamedTempFile::new().unwrap();
        let store = PmemStore::create(file.path(), 256, 64 * 1024).unwrap();

        let mut leaf = crate::node::LeafNode::<u32, u32>::empty();
        leaf.insert(7, 70);
        let node = Node::Leaf(leaf);
        let bytes = marshal::serialize(&node).unwrap();

        let offset = BackingStore::<u32, u32>::next_block_offset(&store);
        let (_, next) = allocate(offset, bytes.len(), 256);
        let new_oid = Oid::from_pmem(TypeTag::Leaf, offset, bytes.len() as u32);
        BackingStore::<u32, u32>::write_batch(&store, &[FlushItem { new_oid, bytes }], next)
            .unwrap();

        let round_tripped: Node<u32, u32> = store.read_object(new_oid).unwrap();
        assert_eq!(round_tripped.as_leaf().unwrap().keys(), &[7]);
    }
}
