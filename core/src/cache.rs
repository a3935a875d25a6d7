//! Response cache used by `ApiClient`.
//!
//! # Design
//! The executor only needs get, set-with-TTL-and-tags and tag invalidation,
//! so the store is a small trait. Stores must be safe to share across
//! threads; each operation is expected to be atomic on its own. Concurrent
//! misses on the same key all go upstream and the last write wins.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::CacheError;

/// Key/value store for raw response bodies.
pub trait CacheStore: Send + Sync + fmt::Debug {
    /// Unexpired value stored under `key`.
    fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Store `value` under `key` for `ttl`, labelled with `tags`.
    fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
        tags: &BTreeSet<String>,
    ) -> Result<(), CacheError>;

    /// Remove `key`. Returns whether an entry existed.
    fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Remove every entry carrying at least one of `tags`. Returns how many
    /// entries were removed.
    fn invalidate_tags(&self, tags: &[&str]) -> Result<usize, CacheError>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
    tags: BTreeSet<String>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// In-process `CacheStore`. Expired entries are dropped lazily on read or by
/// [`MemoryCache::purge_expired`].
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get(key) else {
            return Ok(None);
        };
        if !entry.is_expired(Instant::now()) {
            return Ok(Some(entry.value.clone()));
        }
        entries.remove(key);
        Ok(None)
    }

    fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
        tags: &BTreeSet<String>,
    ) -> Result<(), CacheError> {
        let entry = Entry {
            value: value.to_string(),
            expires_at: Instant::now() + ttl,
            tags: tags.clone(),
        };
        self.entries.lock().insert(key.to_string(), entry);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.lock().remove(key).is_some())
    }

    fn invalidate_tags(&self, tags: &[&str]) -> Result<usize, CacheError> {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !tags.iter().any(|tag| entry.tags.contains(*tag)));
        Ok(before - entries.len())
    }
}
