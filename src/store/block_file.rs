//! The file-backed store: an append-only block allocator over a regular
//! file, addressed via `File` OIDs.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;

use parking_lot::Mutex;

use super::{allocate, BackingStore, FlushItem};
use crate::fixed::{Key, Value};
use crate::marshal;
use crate::node::Node;
use crate::oid::{Medium, Oid};
use crate::{Error, Result};

struct Inner {
    file: File,
    next_offset: u64,
}

/// Append-only block allocator over a file. `block_size` is fixed at
/// construction time; every write is rounded up to a whole number of blocks.
pub struct BlockFileStore {
    block_size: u16,
    inner: Mutex<Inner>,
}

impl BlockFileStore {
    /// Creates (or truncates) the file at `path`, pre-allocating
    /// `capacity_bytes` if the filesystem supports it.
    pub fn create(path: impl AsRef<Path>, block_size: u16, capacity_bytes: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(capacity_bytes)?;
        Ok(BlockFileStore {
            block_size,
            inner: Mutex::new(Inner {
                file,
                next_offset: 0,
            }),
        })
    }

    /// Opens an already-initialized file at `path` without resetting the
    /// append offset -- not used by the core (persistence across restarts is
    /// explicitly out of scope, per the spec), but kept as the natural
    /// counterpart to `create` for callers layering that bootstrap on top.
    pub fn open_existing(path: impl AsRef<Path>, block_size: u16, next_offset: u64) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(BlockFileStore {
            block_size,
            inner: Mutex::new(Inner { file, next_offset }),
        })
    }
}

impl<K: Key, V: Value> BackingStore<K, V> for BlockFileStore {
    fn block_size(&self) -> u16 {
        self.block_size
    }

    fn storage_type(&self) -> Medium {
        Medium::File
    }

    fn next_block_offset(&self) -> u64 {
        self.inner.lock().next_offset
    }

    fn read_object(&self, oid: Oid) -> Result<Node<K, V>> {
        let (offset, size) = oid.location();
        let mut buf = vec![0u8; size as usize];
        let file = {
            let inner = self.inner.lock();
            // `File` supports concurrent `read_at` across clones of the same
            // descriptor without additional synchronization; we only need the
            // lock to get at the handle itself here.
            inner.file.try_clone()?
        };
        file.read_at(&mut buf, offset)?;
        marshal::deserialize(&buf)
    }

    fn write_batch(&self, items: &[FlushItem], new_next_offset: u64) -> Result<()> {
        let inner = self.inner.lock();
        for item in items {
            let (offset, size) = item.new_oid.location();
            debug_assert_eq!(size as usize, item.bytes.len());
            inner.file.write_at(&item.bytes, offset)?;
        }
        drop(inner);
        self.inner.lock().next_offset = new_next_offset;
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
        let store = BlockFileStore::create(file.path(), 512, 64 * 1024).unwrap();

        let mut leaf = crate::node::LeafNode::<u64, u64>::empty();
        leaf.insert(1, 10);
        leaf.insert(2, 20);
        let node = Node::Leaf(leaf);
        let bytes = marshal::serialize(&node).unwrap();

        let offset = BackingStore::<u64, u64>::next_block_offset(&store);
        let (_, next) = allocate(offset, bytes.len(), 512);
        let new_oid = Oid::from_file(TypeTag::Leaf, offset, bytes.len() as u32);
        BackingStore::<u64, u64>::write_batch(
            &store,
            &[FlushItem {
                new_oid,
                bytes,
            }],
            next,
        )
        .unwrap();

        let round_tripped: Node<u64, u64> = store.read_object(new_oid).unwrap();
        assert_eq!(round_tripped.as_leaf().unwrap().keys(), &[1, 2]);
    }
}
