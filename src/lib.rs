//! `pivotree`: an embedded, ordered key-value index built as a B+ tree.
//!
//! The tree's nodes live behind a uniform [`oid::Oid`] addressing layer and
//! are paged through a bounded, relocating [`cache::Cache`] backed by one of
//! three [`store::BackingStore`] implementations: purely in-memory
//! ([`store::VolatileStore`]), an append-only block file
//! ([`store::BlockFileStore`]), or an append-only persistent-memory mapping
//! ([`store::PmemStore`]).
//!
//! The value this crate provides over a textbook B+ tree is the coupling
//! between the tree's structural-modification-aware descent and the cache's
//! eviction protocol: evicted nodes are relocated to new OIDs, and those
//! rewrites are propagated back into parent pointers lazily, by whichever
//! caller next touches the affected subtree.
//!
//! Keys and values are any totally ordered (for keys), fixed-width,
//! trivially-copyable scalar or POD type -- see [`fixed::Key`] and
//! [`fixed::Value`]. Transactions, MVCC, crash-consistent recovery, secondary
//! indexes, range scans, and a catalog format for reopening a persisted tree
//! across process restarts are all out of scope; see `DESIGN.md`.

pub mod cache;
#[cfg(feature = "config")]
pub mod config;
pub mod error;
pub mod fixed;
pub mod marshal;
pub mod node;
pub mod oid;
pub mod store;
pub mod tree;

pub use error::{Error, Result};
pub use oid::Oid;
pub use tree::Tree;

#[cfg(feature = "init_env_logger")]
#[doc(hidden)]
pub fn init_env_logger() {
    let _ = env_logger::try_init();
}
