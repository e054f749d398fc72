//! The backing store: a uniform interface over the three media an [`Oid`]
//! can address, implemented by [`volatile::VolatileStore`],
//! [`block_file::BlockFileStore`] and [`pmem::PmemStore`].

pub mod block_file;
pub mod pmem;
pub mod volatile;

use crate::fixed::{Key, Value};
use crate::node::Node;
use crate::oid::{Medium, Oid};
use crate::Result;

pub use block_file::BlockFileStore;
pub use pmem::PmemStore;
pub use volatile::VolatileStore;

/// A single item handed to [`BackingStore::write_batch`]: the already-decided
/// destination OID (its offset was computed by the caller from
/// `next_block_offset()` before the call) and its serialized bytes.
pub struct FlushItem {
    pub new_oid: Oid,
    pub bytes: Vec<u8>,
}

/// Uniform interface each backing medium implements. All three
/// implementations shipped here are append-only: there is no in-place update
/// and no free list, matching the spec's best-effort, non-WAL persistence
/// model.
pub trait BackingStore<K: Key, V: Value>: Send + Sync {
    /// The allocation granularity this store rounds writes up to.
    fn block_size(&self) -> u16;

    /// Which [`Medium`] this store's OIDs use.
    fn storage_type(&self) -> Medium;

    /// The append offset the next `write_batch` call will start from.
    fn next_block_offset(&self) -> u64;

    /// Reads and deserializes the object at `oid`. Synchronous; the spec
    /// treats backing-store I/O as blocking.
    fn read_object(&self, oid: Oid) -> Result<Node<K, V>>;

    /// Appends every item in `items`, in order, at the offset each item's
    /// OID already carries, then advances the store's append pointer to
    /// `new_next_offset`.
    fn write_batch(&self, items: &[FlushItem], new_next_offset: u64) -> Result<()>;

    /// Optional: most append-only stores treat this as a no-op, since there
    /// is no free list to return space to.
    fn remove(&self, _oid: Oid) -> Result<()> {
        Ok(())
    }
}

/// Rounds `size` up to the next multiple of `block_size`, in blocks.
pub(crate) fn blocks_for(size: usize, block_size: u16) -> u64 {
    let block_size = block_size as usize;
    ((size + block_size - 1) / block_size) as u64
}

/// Computes `(offset, next_offset)` for a write of `size` bytes starting at
/// `current_offset`: the write lands at `current_offset`, and the following
/// write must start at `current_offset` rounded up by whole blocks.
pub(crate) fn allocate(current_offset: u64, size: usize, block_size: u16) -> (u64, u64) {
    let blocks = blocks_for(size, block_size);
    let advance = blocks * block_size as u64;
    (current_offset, current_offset + advance)
}
