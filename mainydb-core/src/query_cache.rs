// src/query_cache.rs
//! Per-collection LRU cache of filter → matching-id results.
//!
//! Grounded on the teacher's `QueryCache` (LRU keyed by a filter hash); that
//! version invalidated per-document via a reverse index of id → dependent
//! hashes. Retargeted here to a single collection-wide generation counter:
//! any mutation bumps the generation, and a cached entry is only returned
//! when its stamped generation still matches current. Simpler than a
//! reverse index and still correct, at the cost of over-invalidating on
//! writes that touch unrelated documents — acceptable since the cache exists
//! to help repeated-read workloads, not write-heavy ones.

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHasher;
use lru::LruCache;
use parking_lot::Mutex;

use crate::document::DocumentId;
use crate::value::Value;

pub type QueryHash = u64;

pub fn hash_filter(filter: &Value) -> QueryHash {
    let mut hasher = AHasher::default();
    format!("{:?}", filter).hash(&mut hasher);
    hasher.finish()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
}

struct Entry {
    ids: Vec<DocumentId>,
    generation: u64,
}

pub struct QueryCache {
    entries: Mutex<LruCache<QueryHash, Entry>>,
    generation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

impl QueryCache {
    pub fn new(capacity: usize) -> Self {
        QueryCache {
            entries: Mutex::new(LruCache::new(std::num::NonZeroUsize::new(capacity.max(1)).unwrap())),
            generation: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    pub fn get(&self, hash: QueryHash) -> Option<Vec<DocumentId>> {
        let current_gen = self.generation.load(Ordering::Acquire);
        let mut guard = self.entries.lock();
        match guard.get(&hash) {
            Some(entry) if entry.generation == current_gen => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.ids.clone())
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn put(&self, hash: QueryHash, ids: Vec<DocumentId>) {
        let generation = self.generation.load(Ordering::Acquire);
        self.entries.lock().put(hash, Entry { ids, generation });
    }

    /// Invalidate every cached entry for this collection. Called after any
    /// insert/update/delete.
    pub fn invalidate_all(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}
