//! In-memory query cache keyed by (view, page, filter digest).
//!
//! There is no TTL and no eviction. Every confirmed write calls
//! [`QueryCache::invalidate_all`], because a single ledger edit can move a
//! record across any number of filter buckets at once.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

/// Which read pipeline a cached result belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewKind {
    Aggregate,
    Table,
}

impl fmt::Display for ViewKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewKind::Aggregate => write!(f, "aggregate"),
            ViewKind::Table => write!(f, "table"),
        }
    }
}

/// Composite lookup key. Identical inputs always produce equal keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    view: ViewKind,
    page: u32,
    digest: String,
}

impl CacheKey {
    pub fn new(view: ViewKind, page: u32, digest: impl Into<String>) -> Self {
        Self {
            view,
            page,
            digest: digest.into(),
        }
    }

    pub fn view(&self) -> ViewKind {
        self.view
    }

    pub fn page(&self) -> u32 {
        self.page
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.digest.get(..12).unwrap_or(&self.digest);
        write!(f, "{}:{}:{}", self.view, self.page, short)
    }
}

#[derive(Debug)]
pub struct CacheEntry<T> {
    pub key: CacheKey,
    pub value: T,
    pub inserted_at: DateTime<Utc>,
}

/// Generation counter value captured when a fetch starts.
pub type Generation = u64;

#[derive(Debug)]
pub struct QueryCache<T> {
    entries: HashMap<CacheKey, Arc<CacheEntry<T>>>,
    generation: Generation,
}

impl<T> Default for QueryCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> QueryCache<T> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            generation: 0,
        }
    }

    /// Shared handle to the cached entry, if present.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<CacheEntry<T>>> {
        let hit = self.entries.get(key).cloned();
        debug!(key = %key, hit = hit.is_some(), "Query cache lookup");
        hit
    }

    pub fn set(&mut self, key: CacheKey, value: T) -> Arc<CacheEntry<T>> {
        let entry = Arc::new(CacheEntry {
            key: key.clone(),
            value,
            inserted_at: Utc::now(),
        });
        self.entries.insert(key, Arc::clone(&entry));
        entry
    }

    /// Stores the value only if no invalidation happened since `generation` was captured.
    pub fn set_if_current(
        &mut self,
        generation: Generation,
        key: CacheKey,
        value: T,
    ) -> Option<Arc<CacheEntry<T>>> {
        if generation != self.generation {
            debug!(
                key = %key,
                started = generation,
                current = self.generation,
                "Skipping cache store for pre-invalidation fetch"
            );
            return None;
        }
        Some(self.set(key, value))
    }

    /// Drops every entry. Returns how many were removed.
    pub fn invalidate_all(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        self.generation += 1;
        debug!(removed, generation = self.generation, "Query cache invalidated");
        removed
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(page: u32, digest: &str) -> CacheKey {
        CacheKey::new(ViewKind::Table, page, digest)
    }

    #[test]
    fn test_repeated_get_returns_same_instance() {
        let mut cache = QueryCache::new();
        cache.set(key(0, "all"), vec![1, 2, 3]);

        let first = cache.get(&key(0, "all")).unwrap();
        let second = cache.get(&key(0, "all")).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.value, vec![1, 2, 3]);
    }

    #[test]
    fn test_keys_distinguish_view_page_and_digest() {
        let mut cache = QueryCache::new();
        cache.set(key(0, "all"), 1);
        assert!(cache.get(&key(1, "all")).is_none());
        assert!(cache.get(&key(0, "other")).is_none());
        assert!(cache.get(&CacheKey::new(ViewKind::Aggregate, 0, "all")).is_none());
    }

    #[test]
    fn test_invalidate_all_clears_everything_and_bumps_generation() {
        let mut cache = QueryCache::new();
        cache.set(key(0, "a"), 1);
        cache.set(key(1, "a"), 2);
        cache.set(key(0, "b"), 3);
        let before = cache.generation();

        assert_eq!(cache.invalidate_all(), 3);
        assert!(cache.is_empty());
        assert_eq!(cache.generation(), before + 1);
    }

    #[test]
    fn test_set_if_current_rejects_stale_generation() {
        let mut cache = QueryCache::new();
        let started = cache.generation();
        cache.invalidate_all();

        assert!(cache.set_if_current(started, key(0, "a"), 1).is_none());
        assert!(cache.is_empty());

        let now = cache.generation();
        assert!(cache.set_if_current(now, key(0, "a"), 1).is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_key_display_is_short() {
        let k = CacheKey::new(ViewKind::Table, 2, "0123456789abcdef0123");
        assert_eq!(k.to_string(), "table:2:0123456789ab");
    }
}
