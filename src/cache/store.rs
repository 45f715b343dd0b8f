//! Cache store adapter.
//!
//! The render cache talks to its backing store through [`CacheStore`]: one
//! batched read per render pass and one write per freshly rendered object.
//! [`MemoryStore`] is the in-process implementation.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::RwLock;

use async_trait::async_trait;
use lru::LruCache;
use metrics::counter;
use serde_json::Value;
use time::OffsetDateTime;
use tracing::debug;

use super::config::CacheConfig;
use super::descriptor::Expiry;
use super::error::StoreError;
use super::lock::{rw_read, rw_write};
use super::registry::TagRegistry;

const SOURCE: &str = "cache::store";
const METRIC_EVICT_TOTAL: &str = "render_cache_evict_total";

/// A stored render.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub data: Value,
    pub expire: Expiry,
    pub tags: Vec<String>,
    pub created: OffsetDateTime,
}

impl CacheEntry {
    pub fn new(data: Value, expire: Expiry, tags: Vec<String>) -> Self {
        Self {
            data,
            expire,
            tags,
            created: OffsetDateTime::now_utc(),
        }
    }

    /// Point in time after which the entry is stale, if any.
    pub fn expires_at(&self) -> Option<OffsetDateTime> {
        match self.expire {
            Expiry::Permanent | Expiry::Temporary => None,
            Expiry::After(ttl) => time::Duration::try_from(ttl)
                .ok()
                .and_then(|ttl| self.created.checked_add(ttl)),
        }
    }

    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at().is_some_and(|deadline| now >= deadline)
    }
}

/// Batch key-value store holding rendered output.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch the entries present for `cids`. Missing ids are simply absent.
    async fn get_multiple(
        &self,
        bin: &str,
        cids: &[String],
    ) -> Result<HashMap<String, CacheEntry>, StoreError>;

    async fn set(&self, bin: &str, cid: &str, entry: CacheEntry) -> Result<(), StoreError>;
}

/// In-memory store with one LRU per bin and tag-based invalidation.
pub struct MemoryStore {
    capacity: NonZeroUsize,
    bins: RwLock<HashMap<String, LruCache<String, CacheEntry>>>,
    tags: TagRegistry,
}

impl MemoryStore {
    /// Create a new store; every bin holds at most `config.bin_capacity` entries.
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            capacity: config.bin_capacity_non_zero(),
            bins: RwLock::new(HashMap::new()),
            tags: TagRegistry::new(),
        }
    }

    pub fn get(&self, bin: &str, cid: &str) -> Option<CacheEntry> {
        let now = OffsetDateTime::now_utc();
        let mut bins = rw_write(&self.bins, SOURCE, "get");
        let entries = bins.get_mut(bin)?;
        let entry = entries.get(cid)?.clone();
        if !entry.is_expired_at(now) {
            return Some(entry);
        }

        entries.pop(cid);
        self.tags.unregister(&(bin.to_string(), cid.to_string()));
        None
    }

    fn put(&self, bin: &str, cid: &str, entry: CacheEntry) {
        let tags: HashSet<String> = entry.tags.iter().cloned().collect();
        let evicted = {
            let mut bins = rw_write(&self.bins, SOURCE, "put");
            let capacity = self.capacity;
            bins.entry(bin.to_string())
                .or_insert_with(|| LruCache::new(capacity))
                .push(cid.to_string(), entry)
                .filter(|(evicted_cid, _)| evicted_cid != cid)
        };

        if let Some((evicted_cid, _)) = evicted {
            counter!(METRIC_EVICT_TOTAL, "bin" => bin.to_string()).increment(1);
            self.tags.unregister(&(bin.to_string(), evicted_cid));
        }
        self.tags.register((bin.to_string(), cid.to_string()), tags);
    }

    /// Drop every entry carrying one of `tags`; returns how many were removed.
    pub fn invalidate_tags<'a, I>(&self, tags: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        let affected = self.tags.unregister_tags(tags);
        let mut bins = rw_write(&self.bins, SOURCE, "invalidate_tags");
        let removed = affected
            .iter()
            .filter(|(bin, cid)| {
                bins.get_mut(bin)
                    .and_then(|entries| entries.pop(cid))
                    .is_some()
            })
            .count();

        debug!(removed, "render cache entries invalidated by tag");
        removed
    }

    /// Drop every entry of `bin`.
    pub fn clear_bin(&self, bin: &str) {
        let removed = rw_write(&self.bins, SOURCE, "clear_bin").remove(bin);
        if let Some(entries) = removed {
            for (cid, _) in entries.iter() {
                self.tags.unregister(&(bin.to_string(), cid.clone()));
            }
        }
    }

    /// Drop every entry of every bin.
    pub fn clear(&self) {
        rw_write(&self.bins, SOURCE, "clear").clear();
        self.tags.clear();
    }

    /// Drop every entry stored with [`Expiry::Temporary`] or already expired.
    pub fn clear_temporary(&self) {
        let now = OffsetDateTime::now_utc();
        let mut dropped = Vec::new();
        {
            let mut bins = rw_write(&self.bins, SOURCE, "clear_temporary");
            for (bin, entries) in bins.iter_mut() {
                let stale: Vec<String> = entries
                    .iter()
                    .filter(|(_, entry)| {
                        entry.expire == Expiry::Temporary || entry.is_expired_at(now)
                    })
                    .map(|(cid, _)| cid.clone())
                    .collect();
                for cid in stale {
                    entries.pop(&cid);
                    dropped.push((bin.clone(), cid));
                }
            }
        }

        for entry in &dropped {
            self.tags.unregister(entry);
        }
    }

    /// Number of entries in `bin`, expired ones included.
    pub fn len(&self, bin: &str) -> usize {
        rw_read(&self.bins, SOURCE, "len")
            .get(bin)
            .map_or(0, |entries| entries.len())
    }

    pub fn is_empty(&self, bin: &str) -> bool {
        self.len(bin) == 0
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get_multiple(
        &self,
        bin: &str,
        cids: &[String],
    ) -> Result<HashMap<String, CacheEntry>, StoreError> {
        Ok(cids
            .iter()
            .filter_map(|cid| self.get(bin, cid).map(|entry| (cid.clone(), entry)))
            .collect())
    }

    async fn set(&self, bin: &str, cid: &str, entry: CacheEntry) -> Result<(), StoreError> {
        self.put(bin, cid, entry);
        Ok(())
    }
}
