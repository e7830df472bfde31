//! Byte-bounded in-memory LRU cache for decoded radar tiles.

use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use crate::error::RadarError;
use crate::types::{RadarTile, TileKey};

/// Default byte budget (50 MiB)
pub const DEFAULT_CAPACITY_BYTES: usize = 50 * 1024 * 1024;

struct CacheEntry {
    tile: Arc<RadarTile>,
    size_bytes: usize,
}

/// Hit/miss/eviction counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub rejections: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct Inner {
    entries: LruCache<TileKey, CacheEntry>,
    total_bytes: usize,
    stats: CacheStats,
}

/// Key-addressed tile store with a fixed byte budget.
///
/// Recency is refreshed by [`TileCache::get`]; when an insert would exceed the
/// budget, least-recently-used entries are evicted until it fits. All
/// bookkeeping happens under one mutex, so the cache can be shared across
/// concurrent fetches.
pub struct TileCache {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl std::fmt::Debug for TileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("TileCache")
            .field("capacity", &self.capacity)
            .field("entries", &inner.entries.len())
            .field("total_bytes", &inner.total_bytes)
            .finish()
    }
}

impl Default for TileCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY_BYTES)
    }
}

impl TileCache {
    /// Create a cache holding at most `capacity_bytes`.
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                total_bytes: 0,
                stats: CacheStats::default(),
            }),
            capacity: capacity_bytes,
        }
    }

    /// Look up a tile, marking it most recently used.
    pub fn get(&self, key: &TileKey) -> Option<Arc<RadarTile>> {
        let mut inner = self.inner.lock();
        let tile = inner.entries.get(key).map(|entry| Arc::clone(&entry.tile));
        if tile.is_some() {
            inner.stats.hits += 1;
        } else {
            inner.stats.misses += 1;
        }
        tile
    }

    /// Store a tile accounted at `size_bytes`.
    ///
    /// Replacing an existing key is last-write-wins and releases the old
    /// entry's size first. A tile larger than the whole budget is rejected
    /// and the cache is left untouched.
    pub fn put(&self, key: TileKey, tile: Arc<RadarTile>, size_bytes: usize) -> Result<(), RadarError> {
        let mut inner = self.inner.lock();

        if size_bytes > self.capacity {
            inner.stats.rejections += 1;
            tracing::debug!(
                "Rejected tile {} ({} bytes > capacity {})",
                key,
                size_bytes,
                self.capacity
            );
            return Err(RadarError::CacheRejected {
                size: size_bytes,
                capacity: self.capacity,
            });
        }

        if let Some(previous) = inner.entries.pop(&key) {
            inner.total_bytes -= previous.size_bytes;
        }

        while inner.total_bytes + size_bytes > self.capacity {
            match inner.entries.pop_lru() {
                Some((evicted_key, evicted)) => {
                    inner.total_bytes -= evicted.size_bytes;
                    inner.stats.evictions += 1;
                    tracing::trace!("Evicted tile {} ({} bytes)", evicted_key, evicted.size_bytes);
                }
                None => break,
            }
        }

        inner.entries.put(key, CacheEntry { tile, size_bytes });
        inner.total_bytes += size_bytes;
        Ok(())
    }

    /// Store a tile using its own memory footprint as the size.
    pub fn insert(&self, key: TileKey, tile: Arc<RadarTile>) -> Result<(), RadarError> {
        let size = tile.size_bytes();
        self.put(key, tile, size)
    }

    /// Whether a key is present, without touching recency.
    pub fn contains(&self, key: &TileKey) -> bool {
        self.inner.lock().entries.contains(key)
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.total_bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Sum of the sizes of all entries
    pub fn size_bytes(&self) -> usize {
        self.inner.lock().total_bytes
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use crate::types::FrameRef;
    use bytes::Bytes;
    use image::RgbaImage;

    fn tile(payload: &'static [u8]) -> Arc<RadarTile> {
        Arc::new(RadarTile::new(Bytes::from_static(payload), RgbaImage::new(1, 1)))
    }

    fn key(name: &str) -> TileKey {
        TileKey::new(name, 3, 1, 2, FrameRef::At(100))
    }

    #[test]
    fn test_put_then_get_returns_same_bytes() {
        let cache = TileCache::new(1024);
        let original = tile(b"radar");
        cache.put(key("a"), Arc::clone(&original), 5).unwrap();

        for _ in 0..3 {
            let cached = cache.get(&key("a")).unwrap();
            assert!(Arc::ptr_eq(&cached, &original));
            assert_eq!(cached.encoded().as_ref(), b"radar");
        }
    }

    #[test]
    fn test_evicts_to_stay_within_capacity() {
        let cache = TileCache::new(10);
        cache.put(key("A"), tile(b"aaaaaa"), 6).unwrap();
        cache.put(key("B"), tile(b"bbbbbb"), 6).unwrap();

        assert!(cache.get(&key("A")).is_none());
        assert!(cache.get(&key("B")).is_some());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.size_bytes(), 6);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_eviction_follows_last_access_not_insertion() {
        let cache = TileCache::new(12);
        cache.put(key("A"), tile(b"a"), 4).unwrap();
        cache.put(key("B"), tile(b"b"), 4).unwrap();
        cache.put(key("C"), tile(b"c"), 4).unwrap();

        // Touch A so B becomes least recently used
        assert!(cache.get(&key("A")).is_some());
        cache.put(key("D"), tile(b"d"), 4).unwrap();

        assert!(cache.contains(&key("A")));
        assert!(!cache.contains(&key("B")));
        assert!(cache.contains(&key("C")));
        assert!(cache.contains(&key("D")));
    }

    #[test]
    fn test_oversized_tile_is_rejected_and_cache_unchanged() {
        let cache = TileCache::new(10);
        cache.put(key("A"), tile(b"a"), 4).unwrap();

        let result = cache.put(key("huge"), tile(b"h"), 11);
        assert!(matches!(
            result,
            Err(RadarError::CacheRejected { size: 11, capacity: 10 })
        ));
        assert!(cache.contains(&key("A")));
        assert!(!cache.contains(&key("huge")));
        assert_eq!(cache.size_bytes(), 4);
        assert_eq!(cache.stats().rejections, 1);
    }

    #[test]
    fn test_tile_exactly_at_capacity_fits() {
        let cache = TileCache::new(10);
        cache.put(key("A"), tile(b"a"), 3).unwrap();
        cache.put(key("full"), tile(b"f"), 10).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.size_bytes(), 10);
    }

    #[test]
    fn test_duplicate_put_does_not_double_count() {
        let cache = TileCache::new(100);
        cache.put(key("A"), tile(b"first"), 8).unwrap();
        cache.put(key("A"), tile(b"second"), 8).unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.size_bytes(), 8);
        assert_eq!(cache.get(&key("A")).unwrap().encoded().as_ref(), b"second");
    }

    #[test]
    fn test_clear() {
        let cache = TileCache::new(100);
        cache.put(key("A"), tile(b"a"), 8).unwrap();
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.size_bytes(), 0);
    }

    #[test]
    fn test_hit_miss_stats() {
        let cache = TileCache::new(100);
        cache.put(key("A"), tile(b"a"), 1).unwrap();
        let _ = cache.get(&key("A"));
        let _ = cache.get(&key("missing"));
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_total_never_exceeds_capacity_under_varied_puts() {
        let cache = TileCache::new(50);
        let sizes = [7, 13, 1, 50, 22, 9, 31, 4, 4, 17, 60, 2];
        for (i, size) in sizes.iter().enumerate() {
            let _ = cache.put(key(&format!("t{}", i % 5)), tile(b"x"), *size);
            assert!(cache.size_bytes() <= cache.capacity());
        }
    }

    #[test]
    fn test_concurrent_puts_stay_consistent() {
        let cache = Arc::new(TileCache::new(64));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        // Threads race on a shared key space
                        let name = format!("k{}", (i + t) % 16);
                        let _ = cache.put(key(&name), tile(b"x"), 1 + (i % 9));
                        let _ = cache.get(&key(&name));
                        assert!(cache.size_bytes() <= 64);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(cache.size_bytes() <= 64);
        assert!(cache.len() <= 16);
    }
}
