//! Optional layered configuration, gated behind the `config` feature.
//!
//! Grounded in the teacher crate's `figment_config` feature, which pulls in
//! `figment` purely as a convenience loader over the same parameters its
//! primary constructor already accepts explicitly. [`Tree::open`] remains
//! the always-available path; this module exists for embedders that want to
//! assemble those same parameters from environment variables or a TOML file
//! instead of hand-rolling that themselves.

use std::path::PathBuf;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Mirrors the parameters of [`crate::tree::Tree::open`]. Every field has a
/// default so a partial TOML file or environment overlay is enough to
/// produce a usable config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum entries (keys in a leaf, pivots in an internal node) before a
    /// node splits.
    pub degree: usize,
    /// Bounded cache capacity, in resident entries.
    pub cache_capacity: usize,
    /// Allocation granularity for file/pmem backing stores.
    pub block_size: u16,
    /// Capacity, in bytes, to pre-allocate for the backing medium.
    pub storage_size_bytes: u64,
    /// Path to the backing file, for the `File`/`PMem` media. `None` selects
    /// the volatile (in-memory-only) store.
    pub backing_path: Option<PathBuf>,
    /// Which durable medium `backing_path` addresses, if set.
    #[serde(default)]
    pub medium: BackingMedium,
}

/// Which backing store a [`Config`] with a `backing_path` set should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackingMedium {
    #[default]
    File,
    PMem,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            degree: 64,
            cache_capacity: 1024,
            block_size: 4096,
            storage_size_bytes: 1 << 30,
            backing_path: None,
            medium: BackingMedium::default(),
        }
    }
}

impl Config {
    /// Loads a `Config`, layering (in increasing priority) built-in defaults,
    /// an optional TOML file at `path`, and `PIVOTREE_`-prefixed environment
    /// variables.
    pub fn load(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        Figment::from(figment::providers::Serialized::defaults(Config::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("PIVOTREE_"))
            .extract()
            .map_err(|e| crate::Error::Fatal(format!("config load failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert!(cfg.degree >= 2);
        assert!(cfg.cache_capacity > 0);
    }
}
