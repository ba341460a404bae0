//! Bounded least-recently-used store of raw per-instance byte buffers.
//!
//! The cache copies on the way in and on the way out, so a caller that
//! consumes or mutates a buffer it received can never affect what the cache
//! hands to the next reader.

use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, warn};
use lru::LruCache;

/// 2 GiB.
pub const DEFAULT_CAPACITY_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Entries in recency order plus their byte accounting.
#[derive(Debug)]
struct CacheState {
    entries: LruCache<String, Vec<u8>>,
    total_bytes: u64,
    hits: u64,
    misses: u64,
}

impl CacheState {
    fn remove(&mut self, id: &str) -> Option<Vec<u8>> {
        let bytes = self.entries.pop(id)?;
        self.total_bytes -= bytes.len() as u64;
        Some(bytes)
    }

    fn evict_lru(&mut self) -> bool {
        match self.entries.pop_lru() {
            Some((id, bytes)) => {
                self.total_bytes -= bytes.len() as u64;
                debug!("evicted {id} ({} bytes) from byte cache", bytes.len());
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: u64,
    pub capacity_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses)`, `0.0` before the first lookup.
    pub hit_rate: f64,
}

/// Shared byte cache bounded by total size. Construct once and hand out by
/// reference (or `Arc`).
#[derive(Debug)]
pub struct ByteCache {
    capacity_bytes: u64,
    state: Mutex<CacheState>,
}

impl Default for ByteCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY_BYTES)
    }
}

impl ByteCache {
    pub fn new(capacity_bytes: u64) -> Self {
        Self {
            capacity_bytes,
            state: Mutex::new(CacheState {
                entries: LruCache::unbounded(),
                total_bytes: 0,
                hits: 0,
                misses: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    /// Returns a copy of the cached bytes and marks the entry most recently used.
    pub fn get(&self, id: &str) -> Option<Vec<u8>> {
        let mut state = self.lock();
        let bytes = state.entries.get(id).cloned();
        match bytes {
            Some(_) => state.hits += 1,
            None => state.misses += 1,
        }
        bytes
    }

    /// Stores a copy of `bytes`, evicting least recently used entries until it fits.
    ///
    /// A buffer larger than the whole capacity is not stored, and an entry
    /// already cached under `id` is then left as it was.
    pub fn put(&self, id: &str, bytes: &[u8]) {
        let size = bytes.len() as u64;
        if size > self.capacity_bytes {
            warn!(
                "not caching {id}: {size} bytes exceeds cache capacity of {} bytes",
                self.capacity_bytes
            );
            return;
        }

        let mut state = self.lock();
        state.remove(id);
        while state.total_bytes + size > self.capacity_bytes && state.evict_lru() {}

        state.total_bytes += size;
        state.entries.put(id.to_owned(), bytes.to_vec());
    }

    /// Does not count as an access.
    pub fn has(&self, id: &str) -> bool {
        self.lock().entries.contains(id)
    }

    pub fn remove(&self, id: &str) -> bool {
        self.lock().remove(id).is_some()
    }

    /// Drops every entry. Hit/miss counters are kept.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.total_bytes = 0;
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        let lookups = state.hits + state.misses;
        CacheStats {
            entries: state.entries.len(),
            total_bytes: state.total_bytes,
            capacity_bytes: self.capacity_bytes,
            hits: state.hits,
            misses: state.misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                state.hits as f64 / lookups as f64
            },
        }
    }
}
