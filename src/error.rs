//! The crate's error type.
//!
//! `Success` from the spec is modeled as `Ok(())`; this enum only carries the
//! ways an operation can fail.

use thiserror::Error;

/// Errors returned from the public API.
#[derive(Debug, Error)]
pub enum Error {
    /// A lookup or removal targeted a key that is not present.
    #[error("key does not exist")]
    KeyDoesNotExist,

    /// An insert targeted a key that is already present.
    #[error("insert failed: key already exists")]
    InsertFailed,

    /// The cache was poisoned by an earlier fatal eviction failure and is no
    /// longer safe to use.
    #[error("cache is poisoned by a prior fatal error")]
    Poisoned,

    /// A backing-store I/O operation failed.
    #[error("backing store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An invariant the library relies on to be memory/data safe was
    /// violated. This indicates corruption, not bad input, and is not
    /// expected to be handled by callers beyond surfacing it.
    #[error("fatal invariant violation: {0}")]
    Fatal(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
