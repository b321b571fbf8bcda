use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use client_logging::client_trace;
use docsearch_core::OperationKey;
use tokio::time::Instant;

use crate::settings::DEFAULT_CACHE_TTL;

struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self, now: Instant) -> bool {
        now < self.stored_at + self.ttl
    }
}

struct CacheState<V> {
    entries: HashMap<OperationKey, CacheEntry<V>>,
    /// Bumped by every invalidation, so a response fetched before a mutation
    /// can be recognised and kept out of the cache.
    generation: u64,
}

/// TTL-keyed response store. Passive: it never fetches anything itself.
///
/// Expired entries are treated as absent and evicted by the lookup that finds
/// them. Every operation runs under one lock, so check-then-evict is atomic.
pub struct CacheStore<V> {
    state: Mutex<CacheState<V>>,
    default_ttl: Duration,
}

impl<V: Clone> CacheStore<V> {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                generation: 0,
            }),
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn get(&self, key: &OperationKey) -> Option<V> {
        let now = Instant::now();
        let mut state = self.lock();
        let fresh = state.entries.get(key).map(|entry| entry.is_fresh(now))?;
        if fresh {
            client_trace!("cache hit {}", key);
            return state.entries.get(key).map(|entry| entry.value.clone());
        }
        client_trace!("cache entry expired {}", key);
        state.entries.remove(key);
        None
    }

    pub fn set(&self, key: OperationKey, value: V, ttl: Duration) {
        let entry = CacheEntry {
            value,
            stored_at: Instant::now(),
            ttl,
        };
        self.lock().entries.insert(key, entry);
    }

    /// Current invalidation generation; pair with [`CacheStore::set_if_current`].
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Stores `value` only if nothing was invalidated since `generation` was
    /// read. Returns whether the value was stored.
    pub fn set_if_current(
        &self,
        key: OperationKey,
        value: V,
        ttl: Duration,
        generation: u64,
    ) -> bool {
        let mut state = self.lock();
        if state.generation != generation {
            client_trace!("cache skipped stale response for {}", key);
            return false;
        }
        let entry = CacheEntry {
            value,
            stored_at: Instant::now(),
            ttl,
        };
        state.entries.insert(key, entry);
        true
    }

    /// Stores `value` with the store's default ttl.
    pub fn insert(&self, key: OperationKey, value: V) {
        self.set(key, value, self.default_ttl);
    }

    pub fn invalidate(&self, key: &OperationKey) -> bool {
        let mut state = self.lock();
        state.generation += 1;
        state.entries.remove(key).is_some()
    }

    /// Drops every entry whose key starts with `prefix`; returns how many.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut state = self.lock();
        state.generation += 1;
        let before = state.entries.len();
        state.entries.retain(|key, _| !key.as_str().starts_with(prefix));
        let removed = before - state.entries.len();
        if removed > 0 {
            client_trace!("cache invalidated {} entries under {}", removed, prefix);
        }
        removed
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.generation += 1;
        state.entries.clear();
    }

    /// Entries currently held, including expired ones not yet looked up.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, CacheState<V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<V: Clone> Default for CacheStore<V> {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}
