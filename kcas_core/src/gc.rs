//! Garbage collection.

use crate::cancel::CancelToken;
use crate::engine::CasEngine;
use crate::error::Result;
use serde::Serialize;
use tracing::info;

/// Statistics from a garbage collection run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GcStats {
    /// Number of cache entries evicted.
    pub evicted: usize,
    /// Payload bytes released from the cache.
    pub freed_bytes: usize,
    /// Number of disk objects deleted.
    pub disk_objects_removed: usize,
    /// Bytes freed on disk.
    pub disk_bytes_freed: u64,
}

impl CasEngine {
    /// Run garbage collection.
    ///
    /// Over capacity, trims the cache to `max_size`; with `force`, trims
    /// further to the policy's low watermark. A cache within capacity is left
    /// alone. Entries being returned by a concurrent `retrieve` keep their
    /// bytes alive until the reader drops them.
    pub fn gc(&self, force: bool) -> Result<GcStats> {
        self.collect(force, None)
    }

    /// Like [`CasEngine::gc`], checking `cancel` between victims.
    pub fn gc_with_cancel(&self, force: bool, cancel: &CancelToken) -> Result<GcStats> {
        self.collect(force, Some(cancel))
    }

    fn collect(&self, force: bool, cancel: Option<&CancelToken>) -> Result<GcStats> {
        let mut stats = GcStats::default();
        let policy = self.config.gc_policy;
        let max_size = self.cache.max_size();
        let max_bytes = if policy.trims_bytes() {
            self.config.max_bytes
        } else {
            usize::MAX
        };

        let over_capacity = self.cache.len() > max_size || self.cache.bytes() > max_bytes;
        if over_capacity {
            let (entry_target, byte_target) = if force {
                let watermark = policy.low_watermark();
                (scale(max_size, watermark), scale(max_bytes, watermark))
            } else {
                (max_size, max_bytes)
            };

            let eviction = self.cache.evict_until(entry_target, byte_target, cancel)?;
            stats.evicted = eviction.evicted;
            stats.freed_bytes = eviction.freed_bytes;
        }

        if policy.prunes_disk()
            && let Some(disk) = &self.disk
        {
            let pruned = disk.prune_to(self.config.max_disk_bytes, cancel)?;
            stats.disk_objects_removed = pruned.objects_deleted;
            stats.disk_bytes_freed = pruned.bytes_freed;
        }

        info!(
            force,
            evicted = stats.evicted,
            freed_bytes = stats.freed_bytes,
            disk_objects_removed = stats.disk_objects_removed,
            "gc complete"
        );
        Ok(stats)
    }
}

fn scale(limit: usize, fraction: f64) -> usize {
    if limit == usize::MAX {
        return limit;
    }
    (limit as f64 * fraction).floor() as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, GcPolicy};
    use tempfile::TempDir;

    fn fill(engine: &CasEngine, count: usize) {
        for i in 0..count {
            engine.store(format!("entry {}", i).into_bytes()).unwrap();
        }
    }

    #[test]
    fn test_gc_under_capacity_is_noop() {
        let engine = CasEngine::new(EngineConfig::default().with_max_size(100)).unwrap();
        fill(&engine, 10);
        let before = engine.get_metrics().cache.evictions;

        for force in [false, true] {
            let stats = engine.gc(force).unwrap();
            assert_eq!(stats.evicted, 0);
            assert_eq!(stats.freed_bytes, 0);
        }
        assert_eq!(engine.len(), 10);
        assert_eq!(engine.get_metrics().cache.evictions, before);
    }

    #[test]
    fn test_forced_gc_over_capacity() {
        let engine = CasEngine::new(EngineConfig::default().with_max_size(100)).unwrap();
        fill(&engine, 50);
        engine.set_max_size(20);
        assert_eq!(engine.len(), 50);

        let stats = engine.gc(true).unwrap();
        assert!(engine.len() <= 20);
        // Auto watermark is 80% of capacity
        assert_eq!(engine.len(), 16);
        assert_eq!(stats.evicted, 34);
        assert_eq!(engine.get_metrics().cache.evictions, 34);
    }

    #[test]
    fn test_unforced_gc_trims_to_capacity() {
        let engine = CasEngine::new(EngineConfig::default().with_max_size(100)).unwrap();
        fill(&engine, 30);
        engine.set_max_size(25);
        let stats = engine.gc(false).unwrap();
        assert_eq!(stats.evicted, 5);
        assert_eq!(engine.len(), 25);
    }

    #[test]
    fn test_aggressive_policy_watermark() {
        let engine = CasEngine::new(
            EngineConfig::default()
                .with_max_size(100)
                .with_gc_policy(GcPolicy::Aggressive),
        )
        .unwrap();
        fill(&engine, 30);
        engine.set_max_size(20);
        engine.gc(true).unwrap();
        assert_eq!(engine.len(), 10);
    }

    #[test]
    fn test_memory_pressure_trims_bytes() {
        let mut config = EngineConfig::default().with_gc_policy(GcPolicy::MemoryPressure);
        config.max_bytes = 1000;
        let engine = CasEngine::new(config).unwrap();
        for i in 0..20u8 {
            engine.store(vec![i; 100]).unwrap();
        }
        assert_eq!(engine.cache().bytes(), 2000);

        engine.gc(true).unwrap();
        assert!(engine.cache().bytes() <= 700);
    }

    #[test]
    fn test_gc_keeps_recently_read_entries() {
        let engine = CasEngine::new(EngineConfig::default().with_max_size(100)).unwrap();
        let hot = engine.store(&b"hot"[..]).unwrap().cid;
        fill(&engine, 20);
        engine.retrieve(&hot).unwrap();

        engine.set_max_size(5);
        engine.gc(false).unwrap();
        assert!(engine.contains(&hot));
    }

    #[test]
    fn test_gc_cancelled() {
        let engine = CasEngine::new(EngineConfig::default().with_max_size(100)).unwrap();
        fill(&engine, 10);
        engine.set_max_size(2);

        let token = CancelToken::new();
        token.cancel();
        assert!(engine.gc_with_cancel(true, &token).is_err());
        assert_eq!(engine.len(), 10);
    }

    #[test]
    fn test_disk_pressure_prunes_object_store() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = EngineConfig::default()
            .with_storage_dir(temp_dir.path())
            .with_gc_policy(GcPolicy::DiskPressure);
        config.max_disk_bytes = 500;
        let engine = CasEngine::new(config).unwrap();
        for i in 0..10u8 {
            engine.store(vec![i; 100]).unwrap();
        }

        let stats = engine.gc(false).unwrap();
        assert_eq!(stats.evicted, 0);
        assert!(stats.disk_objects_removed > 0);
        let usage = engine.object_store().unwrap().usage().unwrap();
        assert!(usage.bytes <= 500);
    }
}
