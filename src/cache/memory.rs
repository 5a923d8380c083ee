//! In-memory LRU tier with a byte budget.

use chrono::{DateTime, Utc};
use lru::LruCache;

use super::CachedValue;

/// An entry held by the memory tier.
#[derive(Debug, Clone)]
pub(crate) struct MemoryEntry {
    pub value: CachedValue,
    pub expires_at: DateTime<Utc>,
    bytes: usize,
}

/// LRU tier bounded by an approximate byte budget rather than an entry
/// count: payload sizes vary by orders of magnitude across sources.
pub(crate) struct MemoryTier {
    entries: LruCache<String, MemoryEntry>,
    byte_budget: usize,
    bytes_used: usize,
    evictions: u64,
}

impl MemoryTier {
    pub fn new(byte_budget: usize) -> Self {
        Self {
            entries: LruCache::unbounded(),
            byte_budget: byte_budget.max(1),
            bytes_used: 0,
            evictions: 0,
        }
    }

    /// Capacity-bounded variant used by tests.
    #[cfg(test)]
    pub fn with_capacity(byte_budget: usize, entries: usize) -> Self {
        use std::num::NonZeroUsize;
        Self {
            entries: LruCache::new(NonZeroUsize::new(entries.max(1)).expect("nonzero")),
            byte_budget: byte_budget.max(1),
            bytes_used: 0,
            evictions: 0,
        }
    }

    pub fn get(&mut self, key: &str, now: DateTime<Utc>) -> Option<MemoryEntry> {
        match self.entries.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.clone()),
            Some(_) => {
                // Expired: drop rather than serve.
                if let Some(old) = self.entries.pop(key) {
                    self.bytes_used = self.bytes_used.saturating_sub(old.bytes);
                }
                None
            }
            None => None,
        }
    }

    pub fn put(&mut self, key: String, value: CachedValue, expires_at: DateTime<Utc>) {
        let bytes = key.len() + value.approximate_bytes();
        if let Some(old) = self.entries.pop(&key) {
            self.bytes_used = self.bytes_used.saturating_sub(old.bytes);
        }
        self.entries.put(
            key,
            MemoryEntry {
                value,
                expires_at,
                bytes,
            },
        );
        self.bytes_used += bytes;
        self.evict_over_budget();
    }

    pub fn remove(&mut self, key: &str) -> bool {
        if let Some(old) = self.entries.pop(key) {
            self.bytes_used = self.bytes_used.saturating_sub(old.bytes);
            true
        } else {
            false
        }
    }

    /// Remove every key starting with `prefix`; returns the count.
    pub fn remove_prefix(&mut self, prefix: &str) -> usize {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &keys {
            self.remove(key);
        }
        keys.len()
    }

    /// Remove entries for which `predicate` holds; returns the count.
    pub fn remove_matching<F>(&mut self, predicate: F) -> usize
    where
        F: Fn(&str, &MemoryEntry) -> bool,
    {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(k, e)| predicate(k, e))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &keys {
            self.remove(key);
        }
        keys.len()
    }

    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    pub fn bytes_used(&self) -> usize {
        self.bytes_used
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn evict_over_budget(&mut self) {
        while self.bytes_used > self.byte_budget && self.entries.len() > 1 {
            if let Some((_, old)) = self.entries.pop_lru() {
                self.bytes_used = self.bytes_used.saturating_sub(old.bytes);
                self.evictions += 1;
            } else {
                break;
            }
        }
    }
}
