//! Bidirectional tag registry.
//!
//! Tracks the relationship between invalidation tags and stored entries,
//! enabling tag-based invalidation in the in-memory store.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::registry";

/// A stored entry: (bin, cid).
pub type EntryKey = (String, String);

/// Tracks tag → entries and entry → tags mappings.
pub struct TagRegistry {
    tag_to_entries: RwLock<HashMap<String, HashSet<EntryKey>>>,
    entry_to_tags: RwLock<HashMap<EntryKey, HashSet<String>>>,
}

impl TagRegistry {
    pub fn new() -> Self {
        Self {
            tag_to_entries: RwLock::new(HashMap::new()),
            entry_to_tags: RwLock::new(HashMap::new()),
        }
    }

    /// Register an entry with its tags, replacing any previous registration.
    pub fn register(&self, entry: EntryKey, tags: HashSet<String>) {
        self.unregister(&entry);

        let mut t2e = rw_write(&self.tag_to_entries, SOURCE, "register.tag_to_entries");
        let mut e2t = rw_write(&self.entry_to_tags, SOURCE, "register.entry_to_tags");

        for tag in &tags {
            t2e.entry(tag.clone()).or_default().insert(entry.clone());
        }
        e2t.insert(entry, tags);
    }

    /// Get all entries carrying a tag.
    pub fn entries_for_tag(&self, tag: &str) -> HashSet<EntryKey> {
        rw_read(&self.tag_to_entries, SOURCE, "entries_for_tag")
            .get(tag)
            .cloned()
            .unwrap_or_default()
    }

    /// Remove an entry and clean up tag mappings.
    ///
    /// Called when an entry is evicted, expired or overwritten.
    pub fn unregister(&self, entry: &EntryKey) {
        let mut t2e = rw_write(&self.tag_to_entries, SOURCE, "unregister.tag_to_entries");
        let mut e2t = rw_write(&self.entry_to_tags, SOURCE, "unregister.entry_to_tags");

        if let Some(tags) = e2t.remove(entry) {
            for tag in tags {
                if let Some(entries) = t2e.get_mut(&tag) {
                    entries.remove(entry);
                    if entries.is_empty() {
                        t2e.remove(&tag);
                    }
                }
            }
        }
    }

    /// Remove every entry carrying one of `tags`.
    ///
    /// Returns the affected entries.
    pub fn unregister_tags<'a, I>(&self, tags: I) -> HashSet<EntryKey>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let affected: HashSet<EntryKey> = {
            let t2e = rw_read(&self.tag_to_entries, SOURCE, "unregister_tags");
            tags.into_iter()
                .filter_map(|tag| t2e.get(tag))
                .flatten()
                .cloned()
                .collect()
        };

        for entry in &affected {
            self.unregister(entry);
        }
        affected
    }

    /// Clear all mappings.
    pub fn clear(&self) {
        rw_write(&self.tag_to_entries, SOURCE, "clear.tag_to_entries").clear();
        rw_write(&self.entry_to_tags, SOURCE, "clear.entry_to_tags").clear();
    }

    /// Get the number of tracked tags.
    pub fn tag_count(&self) -> usize {
        rw_read(&self.tag_to_entries, SOURCE, "tag_count").len()
    }

    /// Get the number of tracked entries.
    pub fn entry_count(&self) -> usize {
        rw_read(&self.entry_to_tags, SOURCE, "entry_count").len()
    }
}

impl Default for TagRegistry {
    fn default() -> Self {
        Self::new()
    }
}
