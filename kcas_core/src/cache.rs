//! In-memory content cache keyed by content identifier.
//!
//! Entries live in a sharded concurrent map. Recency is a logical clock
//! stamped on every `insert` hit and `get`, and each stamp is also recorded
//! in an ordered recency index. Eviction pops the oldest stamp and removes
//! the entry only if that stamp is still its latest, so an entry touched
//! after it was picked as a victim survives. Superseded stamps are skipped
//! when popped and compacted away once they outnumber live entries.
//! Payloads are reference counted, so a reader keeps its bytes even if the
//! entry is evicted while it is being returned.

use crate::cancel::CancelToken;
use crate::config::CacheStrategy;
use crate::content_id::ContentId;
use crate::error::Result;
use crate::metrics::{CacheCounters, CacheMetrics};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::debug;

/// A cached payload with access metadata.
#[derive(Debug)]
pub struct CacheEntry {
    value: Bytes,
    inserted_at: DateTime<Utc>,
    last_access: AtomicU64,
    hits: AtomicU64,
}

impl CacheEntry {
    fn new(value: Bytes, tick: u64) -> Self {
        Self {
            value,
            inserted_at: Utc::now(),
            last_access: AtomicU64::new(tick),
            hits: AtomicU64::new(0),
        }
    }

    /// Size of the payload in bytes.
    pub fn size_bytes(&self) -> usize {
        self.value.len()
    }

    fn touch(&self, tick: u64) {
        self.last_access.fetch_max(tick, Ordering::AcqRel);
    }
}

/// Snapshot of one entry's metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntryInfo {
    pub cid: ContentId,
    pub size_bytes: usize,
    pub inserted_at: DateTime<Utc>,
    /// Logical access time; larger is more recent.
    pub last_access: u64,
    pub hits: u64,
}

/// Result of an eviction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionStats {
    pub evicted: usize,
    pub freed_bytes: usize,
}

/// Concurrent LRU-style cache.
#[derive(Debug)]
pub struct ContentCache {
    entries: DashMap<ContentId, CacheEntry>,
    /// Access stamp to identifier. Never locked while a map guard is held.
    recency: Mutex<BTreeMap<u64, ContentId>>,
    clock: AtomicU64,
    bytes: AtomicUsize,
    max_size: AtomicUsize,
    strategy: CacheStrategy,
    counters: CacheCounters,
}

impl ContentCache {
    /// Create an empty cache holding at most `max_size` entries.
    pub fn new(max_size: usize, strategy: CacheStrategy) -> Self {
        Self {
            entries: DashMap::new(),
            recency: Mutex::new(BTreeMap::new()),
            clock: AtomicU64::new(0),
            bytes: AtomicUsize::new(0),
            max_size: AtomicUsize::new(max_size.max(1)),
            strategy,
            counters: CacheCounters::default(),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn stamp(&self, cid: &ContentId, tick: u64) {
        let mut recency = self.recency.lock();
        recency.insert(tick, cid.clone());
        if recency.len() > 2 * self.entries.len() + 64 {
            compact(&mut recency, &self.entries);
        }
    }

    /// Insert `value` under `cid`.
    ///
    /// Returns `false` without rewriting when the entry already exists. Of
    /// several concurrent inserts of the same content exactly one returns
    /// `true`.
    pub fn insert(&self, cid: &ContentId, value: Bytes) -> bool {
        let tick = self.tick();
        let inserted = match self.entries.entry(cid.clone()) {
            Entry::Occupied(existing) => {
                existing.get().touch(tick);
                false
            }
            Entry::Vacant(slot) => {
                self.bytes.fetch_add(value.len(), Ordering::AcqRel);
                slot.insert(CacheEntry::new(value, tick));
                true
            }
        };
        self.stamp(cid, tick);

        if inserted {
            debug!(%cid, "cache store");
            self.evict_overflow();
        } else {
            self.counters.deduplicated.fetch_add(1, Ordering::Relaxed);
            debug!(%cid, "cache dedup");
        }
        inserted
    }

    /// Look up `cid`, counting a hit or a miss and refreshing recency on hit.
    pub fn get(&self, cid: &ContentId) -> Option<Bytes> {
        let tick = self.tick();
        let value = self.entries.get(cid).map(|entry| {
            entry.touch(tick);
            entry.hits.fetch_add(1, Ordering::Relaxed);
            entry.value.clone()
        });
        if let Some(value) = value {
            self.stamp(cid, tick);
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            debug!(%cid, "cache hit");
            return Some(value);
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        debug!(%cid, "cache miss");
        None
    }

    /// Look up `cid` without counting a request or touching recency.
    pub fn peek(&self, cid: &ContentId) -> Option<Bytes> {
        self.entries.get(cid).map(|entry| entry.value.clone())
    }

    /// Whether `cid` is cached. Does not count as a request or touch recency.
    pub fn contains(&self, cid: &ContentId) -> bool {
        self.entries.contains_key(cid)
    }

    /// Metadata of one entry.
    pub fn entry_info(&self, cid: &ContentId) -> Option<CacheEntryInfo> {
        self.entries.get(cid).map(|entry| CacheEntryInfo {
            cid: cid.clone(),
            size_bytes: entry.size_bytes(),
            inserted_at: entry.inserted_at,
            last_access: entry.last_access.load(Ordering::Acquire),
            hits: entry.hits.load(Ordering::Relaxed),
        })
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resident payload bytes.
    pub fn bytes(&self) -> usize {
        self.bytes.load(Ordering::Acquire)
    }

    /// Capacity in entries.
    pub fn max_size(&self) -> usize {
        self.max_size.load(Ordering::Acquire)
    }

    /// Change capacity. Shrinking does not evict; the next collection does.
    pub fn set_max_size(&self, max_size: usize) {
        self.max_size.store(max_size.max(1), Ordering::Release);
    }

    /// Counter snapshot.
    pub fn metrics(&self) -> CacheMetrics {
        self.counters.snapshot()
    }

    /// Zero the counters.
    pub fn reset_metrics(&self) {
        self.counters.reset();
    }

    /// Drop every entry without counting evictions.
    pub fn clear(&self) {
        self.entries.clear();
        self.recency.lock().clear();
        self.bytes.store(0, Ordering::Release);
    }

    fn evict_overflow(&self) {
        let max_size = self.max_size();
        if self.entries.len() <= max_size {
            return;
        }
        let target = self.strategy.overflow_target(max_size);
        let stats = self.evict_until(target, usize::MAX, None);
        if let Ok(stats) = stats {
            debug!(evicted = stats.evicted, target, "evicted cache entries");
        }
    }

    /// Evict least-recently-accessed entries until at most `max_entries`
    /// entries and `max_bytes` bytes remain.
    ///
    /// `cancel` is checked between victims; entries already removed stay
    /// removed and are counted.
    pub fn evict_until(
        &self,
        max_entries: usize,
        max_bytes: usize,
        cancel: Option<&CancelToken>,
    ) -> Result<EvictionStats> {
        let mut stats = EvictionStats::default();
        let outcome = self.evict_passes(max_entries, max_bytes, cancel, &mut stats);
        self.counters
            .evictions
            .fetch_add(stats.evicted as u64, Ordering::Relaxed);
        outcome.map(|()| stats)
    }

    fn evict_passes(
        &self,
        max_entries: usize,
        max_bytes: usize,
        cancel: Option<&CancelToken>,
        stats: &mut EvictionStats,
    ) -> Result<()> {
        while self.over(max_entries, max_bytes) {
            if let Some(token) = cancel {
                token.check()?;
            }
            // Entries whose stamp is not yet recorded are not candidates
            let Some((seen, cid)) = self.recency.lock().pop_first() else {
                break;
            };
            // Stale when the entry was touched again; its newer stamp stays indexed
            let removed = self.entries.remove_if(&cid, |_, entry| {
                entry.last_access.load(Ordering::Acquire) == seen
            });
            if let Some((_, entry)) = removed {
                self.bytes.fetch_sub(entry.size_bytes(), Ordering::AcqRel);
                stats.evicted += 1;
                stats.freed_bytes += entry.size_bytes();
            }
        }
        Ok(())
    }

    fn over(&self, max_entries: usize, max_bytes: usize) -> bool {
        self.entries.len() > max_entries || self.bytes() > max_bytes
    }
}

/// Rebuild the index from the live entries, one stamp each.
fn compact(recency: &mut BTreeMap<u64, ContentId>, entries: &DashMap<ContentId, CacheEntry>) {
    recency.clear();
    for entry in entries.iter() {
        recency.insert(
            entry.value().last_access.load(Ordering::Acquire),
            entry.key().clone(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content_id::Codec;
    use crate::hash::Algorithm;

    fn cid(data: &[u8]) -> ContentId {
        ContentId::generate(data, Algorithm::Sha256, Codec::Raw).unwrap()
    }

    fn put(cache: &ContentCache, data: &'static [u8]) -> ContentId {
        let id = cid(data);
        cache.insert(&id, Bytes::from_static(data));
        id
    }

    #[test]
    fn test_insert_get() {
        let cache = ContentCache::new(10, CacheStrategy::Lru);
        let id = cid(b"test data");

        assert!(cache.get(&id).is_none());
        assert!(cache.insert(&id, Bytes::from_static(b"test data")));
        assert_eq!(cache.get(&id).unwrap(), Bytes::from_static(b"test data"));

        let metrics = cache.metrics();
        assert_eq!(metrics.hits, 1);
        assert_eq!(metrics.misses, 1);
        assert_eq!(cache.bytes(), 9);
    }

    #[test]
    fn test_duplicate_insert_not_rewritten() {
        let cache = ContentCache::new(10, CacheStrategy::Lru);
        let id = put(&cache, b"same");
        let inserted_at = cache.entry_info(&id).unwrap().inserted_at;

        assert!(!cache.insert(&id, Bytes::from_static(b"same")));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.bytes(), 4);
        assert_eq!(cache.entry_info(&id).unwrap().inserted_at, inserted_at);
        assert_eq!(cache.metrics().deduplicated, 1);
    }

    #[test]
    fn test_lru_eviction_order() {
        let cache = ContentCache::new(2, CacheStrategy::Lru);
        let a = put(&cache, b"a");
        let b = put(&cache, b"b");

        // Touch a so that b becomes least recently used
        assert!(cache.get(&a).is_some());
        let c = put(&cache, b"c");

        assert_eq!(cache.len(), 2);
        assert!(cache.contains(&a));
        assert!(!cache.contains(&b));
        assert!(cache.contains(&c));
        assert_eq!(cache.metrics().evictions, 1);
    }

    #[test]
    fn test_duplicate_store_refreshes_recency() {
        let cache = ContentCache::new(2, CacheStrategy::Lru);
        let a = put(&cache, b"a");
        let b = put(&cache, b"b");
        put(&cache, b"a");
        put(&cache, b"c");

        assert!(cache.contains(&a));
        assert!(!cache.contains(&b));
    }

    #[test]
    fn test_aggressive_strategy_batches() {
        let cache = ContentCache::new(10, CacheStrategy::LruAggressive);
        for i in 0..11u8 {
            let data = vec![i];
            cache.insert(&cid(&data), Bytes::from(data));
        }
        assert_eq!(cache.len(), 9);
        assert_eq!(cache.metrics().evictions, 2);
    }

    #[test]
    fn test_aggressive_strategy_single_slot() {
        let cache = ContentCache::new(1, CacheStrategy::LruAggressive);
        let a = put(&cache, b"a");
        let b = put(&cache, b"b");
        assert_eq!(cache.len(), 1);
        assert!(!cache.contains(&a));
        assert_eq!(cache.get(&b).unwrap(), Bytes::from_static(b"b"));
    }

    #[test]
    fn test_peek_is_not_a_request() {
        let cache = ContentCache::new(2, CacheStrategy::Lru);
        let a = put(&cache, b"a");
        let b = put(&cache, b"b");
        assert_eq!(cache.peek(&a).unwrap(), Bytes::from_static(b"a"));
        assert!(cache.peek(&cid(b"missing")).is_none());
        assert_eq!(cache.metrics().total_requests, 0);

        // a was only peeked, so it is still the eviction victim
        put(&cache, b"c");
        assert!(!cache.contains(&a));
        assert!(cache.contains(&b));
    }

    #[test]
    fn test_recency_index_stays_bounded() {
        let cache = ContentCache::new(4, CacheStrategy::Lru);
        let ids: Vec<ContentId> = (0..4u8)
            .map(|i| {
                let data = vec![i];
                let id = cid(&data);
                cache.insert(&id, Bytes::from(data));
                id
            })
            .collect();
        for _ in 0..1000 {
            for id in &ids {
                cache.get(id);
            }
        }
        assert!(cache.recency.lock().len() <= 2 * cache.len() + 64);

        // Least recent of the hot set goes first
        put(&cache, b"fresh");
        assert!(!cache.contains(&ids[0]));
        assert_eq!(cache.len(), 4);
    }

    #[test]
    fn test_shrink_does_not_evict() {
        let cache = ContentCache::new(10, CacheStrategy::Lru);
        for i in 0..5u8 {
            let data = vec![i];
            cache.insert(&cid(&data), Bytes::from(data));
        }
        cache.set_max_size(2);
        assert_eq!(cache.len(), 5);
        assert_eq!(cache.max_size(), 2);

        let stats = cache.evict_until(2, usize::MAX, None).unwrap();
        assert_eq!(stats.evicted, 3);
        assert_eq!(stats.freed_bytes, 3);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_evict_by_bytes() {
        let cache = ContentCache::new(100, CacheStrategy::Lru);
        put(&cache, b"aaaa");
        put(&cache, b"bbbb");
        put(&cache, b"cccc");
        let stats = cache.evict_until(100, 8, None).unwrap();
        assert_eq!(stats.evicted, 1);
        assert_eq!(cache.bytes(), 8);
    }

    #[test]
    fn test_evict_cancelled() {
        let cache = ContentCache::new(100, CacheStrategy::Lru);
        put(&cache, b"a");
        put(&cache, b"b");
        let token = CancelToken::new();
        token.cancel();
        assert!(cache.evict_until(0, usize::MAX, Some(&token)).is_err());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_reader_keeps_bytes_after_eviction() {
        let cache = ContentCache::new(10, CacheStrategy::Lru);
        let id = put(&cache, b"held by reader");
        let held = cache.get(&id).unwrap();
        cache.evict_until(0, usize::MAX, None).unwrap();
        assert!(!cache.contains(&id));
        assert_eq!(&held[..], b"held by reader");
    }

    #[test]
    fn test_concurrent_same_content_single_insert() {
        let cache = ContentCache::new(100, CacheStrategy::Lru);
        let id = cid(b"contended");
        let wins = AtomicUsize::new(0);

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    if cache.insert(&id, Bytes::from_static(b"contended")) {
                        wins.fetch_add(1, Ordering::Relaxed);
                    }
                });
            }
        });

        assert_eq!(wins.load(Ordering::Relaxed), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.bytes(), 9);
        assert_eq!(cache.metrics().deduplicated, 7);
    }

    #[test]
    fn test_concurrent_distinct_content() {
        let cache = ContentCache::new(10_000, CacheStrategy::Lru);
        std::thread::scope(|s| {
            for t in 0..4u32 {
                let cache = &cache;
                s.spawn(move || {
                    for i in 0..250u32 {
                        let data = format!("{}-{}", t, i).into_bytes();
                        let id = cid(&data);
                        assert!(cache.insert(&id, Bytes::from(data)));
                        assert!(cache.get(&id).is_some());
                    }
                });
            }
        });
        assert_eq!(cache.len(), 1000);
        assert_eq!(cache.metrics().hits, 1000);
    }
}
