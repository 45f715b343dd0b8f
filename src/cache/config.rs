//! Cache configuration.
//!
//! Runtime view of the `[cache]` settings consumed by the render cache and the
//! in-memory store.

use std::collections::HashMap;
use std::num::NonZeroUsize;

use super::descriptor::{Expiry, Granularity};
use super::keys::HashAlgorithm;

// Default values for cache configuration
const DEFAULT_BIN: &str = "cache_render";
const DEFAULT_BIN_CAPACITY: usize = 1000;

/// Cache configuration resolved from settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Global cache toggle.
    pub enabled: bool,
    /// Per-kind toggles. Kinds not listed are enabled.
    pub kinds: HashMap<String, bool>,
    /// Digest used to fold descriptor hash fragments into a key fragment.
    pub hash_algorithm: HashAlgorithm,
    /// Bin used by default descriptors.
    pub default_bin: String,
    /// Granularity of default descriptors; `None` disables caching.
    pub default_granularity: Option<Granularity>,
    /// Expiry of default descriptors.
    pub default_expire: Expiry,
    /// Maximum entries per bin in the in-memory store.
    pub bin_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            kinds: HashMap::new(),
            hash_algorithm: HashAlgorithm::default(),
            default_bin: DEFAULT_BIN.to_string(),
            default_granularity: Some(Granularity::PerObject),
            default_expire: Expiry::Permanent,
            bin_capacity: DEFAULT_BIN_CAPACITY,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            kinds: settings.kinds.clone(),
            hash_algorithm: settings.hash_algorithm,
            default_bin: settings.default_bin.clone(),
            default_granularity: settings.default_granularity,
            default_expire: settings.default_expire,
            bin_capacity: settings.bin_capacity,
        }
    }
}

impl CacheConfig {
    /// Returns true if caching is enabled for `kind`.
    pub fn is_kind_enabled(&self, kind: &str) -> bool {
        self.kinds.get(kind).copied().unwrap_or(true)
    }

    /// Returns the bin capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn bin_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.bin_capacity).unwrap_or(NonZeroUsize::MIN)
    }
}
