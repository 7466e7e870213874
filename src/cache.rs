//! A bounded tile cache shared by every query a storage manager hosts
//! (§4.3, §5). The hot path — lookup and recency promotion — never takes a
//! lock: `DashMap` shards the table internally and recency is a per-entry
//! atomic tick, so concurrent readers on different tiles never contend.
//! Admission (computing whether the cache is over budget and evicting)
//! is the one place that takes a single coarse `Mutex`, exactly the
//! two-granularity split the concurrency model calls for.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;

use crate::tile::TileData;

/// Identifies one cached tile. `fragment_id` is interned as `Arc<str>` so
/// repeated lookups against the same fragment (the common case: a read
/// query touches many tiles of one fragment) don't allocate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub fragment_id: Arc<str>,
    pub attribute: Arc<str>,
    pub tile_id: u64,
}

impl CacheKey {
    pub fn new(fragment_id: impl Into<Arc<str>>, attribute: impl Into<Arc<str>>, tile_id: u64) -> Self {
        Self { fragment_id: fragment_id.into(), attribute: attribute.into(), tile_id }
    }
}

struct CacheEntry {
    tile: Arc<TileData>,
    size: usize,
    last_used: AtomicU64,
}

/// LRU tile cache with size-budget eviction over decompressed bytes.
pub struct TileCache {
    entries: DashMap<CacheKey, CacheEntry>,
    eviction_lock: Mutex<()>,
    current_bytes: AtomicUsize,
    budget_bytes: usize,
    clock: AtomicU64,
}

impl TileCache {
    pub fn new(budget_bytes: usize) -> Self {
        Self {
            entries: DashMap::new(),
            eviction_lock: Mutex::new(()),
            current_bytes: AtomicUsize::new(0),
            budget_bytes,
            clock: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<TileData>> {
        let entry = self.entries.get(key)?;
        entry.last_used.store(self.tick(), Ordering::Relaxed);
        Some(Arc::clone(&entry.tile))
    }

    /// Admits `tile` under `key`, evicting least-recently-used entries if
    /// the cache is now over its byte budget. A single tile larger than the
    /// whole budget is still admitted — evicting it immediately would defeat
    /// the point of caching it — but is noted, mirroring the teacher
    /// library's own "suspiciously large size" notice in `io::Data::read_into_vec`.
    pub fn insert(&self, key: CacheKey, tile: Arc<TileData>) {
        let size = tile.byte_size();

        if size > self.budget_bytes {
            eprintln!(
                "tile cache: admitting a {}-byte tile that exceeds the {}-byte budget on its own",
                size, self.budget_bytes
            );
        }

        let tick = self.tick();
        self.entries.insert(key, CacheEntry { tile, size, last_used: AtomicU64::new(tick) });
        self.current_bytes.fetch_add(size, Ordering::Relaxed);
        self.evict_if_needed();
    }

    pub fn remove(&self, key: &CacheKey) {
        if let Some((_, entry)) = self.entries.remove(key) {
            self.current_bytes.fetch_sub(entry.size, Ordering::Relaxed);
        }
    }

    /// Drops every tile belonging to `fragment_id`. Used when a fragment is
    /// deleted (consolidation, out of scope here, would call this).
    pub fn evict_fragment(&self, fragment_id: &str) {
        let victims: Vec<CacheKey> = self.entries.iter()
            .filter(|entry| entry.key().fragment_id.as_ref() == fragment_id)
            .map(|entry| entry.key().clone())
            .collect();

        for key in victims {
            self.remove(&key);
        }
    }

    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
    pub fn bytes_in_use(&self) -> usize { self.current_bytes.load(Ordering::Relaxed) }

    fn tick(&self) -> u64 { self.clock.fetch_add(1, Ordering::Relaxed) }

    fn evict_if_needed(&self) {
        if self.current_bytes.load(Ordering::Relaxed) <= self.budget_bytes {
            return;
        }

        let _guard = self.eviction_lock.lock().unwrap();

        while self.current_bytes.load(Ordering::Relaxed) > self.budget_bytes {
            let victim = self.entries.iter()
                .min_by_key(|entry| entry.last_used.load(Ordering::Relaxed))
                .map(|entry| entry.key().clone());

            match victim {
                Some(key) => self.remove(&key),
                None => break, // nothing left to evict; budget is simply smaller than one entry
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn tile(bytes: usize) -> Arc<TileData> {
        Arc::new(TileData::Fixed(vec![0u8; bytes]))
    }

    #[test]
    fn hit_then_miss_after_removal() {
        let cache = TileCache::new(1024);
        let key = CacheKey::new("frag-1", "a1", 0);
        cache.insert(key.clone(), tile(64));

        assert!(cache.get(&key).is_some());
        cache.remove(&key);
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn evicts_least_recently_used_when_over_budget() {
        let cache = TileCache::new(100);

        let a = CacheKey::new("frag-1", "a1", 0);
        let b = CacheKey::new("frag-1", "a1", 1);
        let c = CacheKey::new("frag-1", "a1", 2);

        cache.insert(a.clone(), tile(40));
        cache.insert(b.clone(), tile(40));
        cache.get(&a); // touch a so b becomes the least recently used
        cache.insert(c.clone(), tile(40)); // pushes total to 120 > 100, evicts b

        assert!(cache.get(&a).is_some());
        assert!(cache.get(&b).is_none());
        assert!(cache.get(&c).is_some());
    }

    #[test]
    fn oversized_tile_is_still_admitted() {
        let cache = TileCache::new(10);
        let key = CacheKey::new("frag-1", "a1", 0);
        cache.insert(key.clone(), tile(1000));
        assert!(cache.get(&key).is_some());
    }

    #[test]
    fn evict_fragment_drops_only_that_fragments_tiles() {
        let cache = TileCache::new(1024);
        let kept = CacheKey::new("frag-2", "a1", 0);
        cache.insert(CacheKey::new("frag-1", "a1", 0), tile(16));
        cache.insert(kept.clone(), tile(16));

        cache.evict_fragment("frag-1");

        assert_eq!(cache.len(), 1);
        assert!(cache.get(&kept).is_some());
    }
}
