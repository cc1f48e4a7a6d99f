//! FIFO location cache.
//!
//! Entries remember where a chunk was last found. They are hints, never
//! authority: the store re-reads the slot and revalidates the bytes before
//! serving from a cached location.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use hashlink::LinkedHashMap;
use parking_lot::Mutex;
use serde::Serialize;
use strata_primitives::ContentHash;

use crate::block::{Leaf, SlotLocation};

/// Where a chunk was found.
#[derive(Clone)]
pub(crate) struct Location {
    pub(crate) leaf: Arc<Leaf>,
    pub(crate) slot: SlotLocation,
}

/// Bounded map from hash to [`Location`], evicted in insertion order.
pub(crate) struct LocationCache {
    entries: Mutex<LinkedHashMap<ContentHash, Location>>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    stale: AtomicU64,
}

impl LocationCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(LinkedHashMap::new()),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stale: AtomicU64::new(0),
        }
    }

    pub(crate) fn get(&self, hash: &ContentHash) -> Option<Location> {
        let found = self.entries.lock().get(hash).cloned();
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    pub(crate) fn contains(&self, hash: &ContentHash) -> bool {
        let found = self.entries.lock().contains_key(hash);
        match found {
            true => self.hits.fetch_add(1, Ordering::Relaxed),
            false => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    pub(crate) fn insert(&self, hash: ContentHash, location: Location) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.lock();
        entries.remove(&hash);
        while entries.len() >= self.capacity {
            if entries.pop_front().is_none() {
                break;
            }
        }
        entries.insert(hash, location);
    }

    pub(crate) fn remove(&self, hash: &ContentHash) {
        self.entries.lock().remove(hash);
    }

    /// Drop an entry that failed revalidation.
    pub(crate) fn invalidate(&self, hash: &ContentHash) {
        self.stale.fetch_add(1, Ordering::Relaxed);
        self.remove(hash);
    }

    pub(crate) fn stats(&self) -> CacheStats {
        CacheStats {
            capacity: self.capacity,
            size: self.entries.lock().len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Maximum cache capacity.
    pub capacity: usize,
    /// Current cache size.
    pub size: usize,
    /// Lookups that found an entry.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Entries dropped because the bytes at the location no longer matched.
    pub stale: u64,
}
