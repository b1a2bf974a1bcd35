//! The CAS engine facade.

use crate::cache::ContentCache;
use crate::config::EngineConfig;
use crate::content_id::{Codec, ContentId};
use crate::error::Result;
use crate::hash::{Algorithm, Digest};
use crate::metrics::{
    CacheSection, MetricsSnapshot, PerformanceSamples, PerformanceSection, TargetStatus,
};
use crate::store::ObjectStore;
use bytes::Bytes;
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info};

/// Result of a `store` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreOutcome {
    pub cid: ContentId,
    /// `false` when the content was already present.
    pub stored: bool,
    pub size_bytes: usize,
}

/// Result of `compare_content`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Comparison {
    pub identical: bool,
    pub drift: bool,
    pub cid1: ContentId,
    pub cid2: ContentId,
}

/// Content-addressed storage engine.
///
/// Composes hashing, identifier generation, the in-memory cache and an
/// optional on-disk object tier. All methods take `&self`; share the engine
/// between threads by reference or `Arc`.
#[derive(Debug)]
pub struct CasEngine {
    pub(crate) config: EngineConfig,
    pub(crate) cache: ContentCache,
    samples: PerformanceSamples,
    pub(crate) disk: Option<ObjectStore>,
}

impl CasEngine {
    /// Create an engine. Opens (or initializes) the object tier when
    /// `storage_dir` is configured.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let disk = match &config.storage_dir {
            Some(dir) => Some(ObjectStore::open_or_init(dir, config.algorithm)?),
            None => None,
        };

        info!(
            algorithm = %config.algorithm,
            max_size = config.max_size,
            persistent = disk.is_some(),
            "cas engine initialized"
        );

        Ok(Self {
            cache: ContentCache::new(config.max_size, config.cache_strategy),
            samples: PerformanceSamples::new(config.sample_window),
            disk,
            config,
        })
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The in-memory cache.
    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    /// The on-disk object tier, if configured.
    pub fn object_store(&self) -> Option<&ObjectStore> {
        self.disk.as_ref()
    }

    /// Hash `content`, recording the duration in the sample window.
    pub fn digest(&self, content: &[u8], algorithm: Algorithm) -> Digest {
        let start = Instant::now();
        let digest = Digest::compute(content, algorithm);
        self.samples.record(start.elapsed());
        digest
    }

    /// Hex digest of `content`.
    pub fn calculate_hash(&self, content: &[u8], algorithm: Algorithm) -> String {
        self.digest(content, algorithm).to_hex()
    }

    /// Hex digest of `content` with an algorithm given by name.
    pub fn calculate_hash_named(&self, content: &[u8], algorithm: &str) -> Result<String> {
        let algorithm = Algorithm::parse(algorithm)?;
        Ok(self.calculate_hash(content, algorithm))
    }

    /// Identifier of `content` with the configured algorithm and codec.
    pub fn generate_cid(&self, content: &[u8]) -> Result<ContentId> {
        self.generate_cid_with(content, self.config.algorithm, self.config.codec)
    }

    /// Identifier of `content` with an explicit algorithm and codec.
    pub fn generate_cid_with(
        &self,
        content: &[u8],
        algorithm: Algorithm,
        codec: Codec,
    ) -> Result<ContentId> {
        ContentId::from_digest(self.digest(content, algorithm), codec)
    }

    /// Store `content` under its identifier.
    pub fn store(&self, content: impl Into<Bytes>) -> Result<StoreOutcome> {
        self.store_with_codec(content, self.config.codec)
    }

    /// Store `content` tagged with `codec`.
    ///
    /// With a disk tier the object is written before it is cached, so a
    /// failed write leaves no trace and a retry stores it.
    pub fn store_with_codec(&self, content: impl Into<Bytes>, codec: Codec) -> Result<StoreOutcome> {
        let content: Bytes = content.into();
        let cid = self.generate_cid_with(&content, self.config.algorithm, codec)?;
        let size_bytes = content.len();

        let written = match &self.disk {
            Some(disk) => disk.put(&cid, &content)?,
            None => true,
        };
        let stored = self.cache.insert(&cid, content.clone()) && written;

        Ok(StoreOutcome {
            cid,
            stored,
            size_bytes,
        })
    }

    /// Fetch content by identifier. Unknown identifiers yield `None`.
    pub fn retrieve(&self, cid: &ContentId) -> Result<Option<Bytes>> {
        if let Some(value) = self.cache.get(cid) {
            return Ok(Some(value));
        }

        let Some(disk) = &self.disk else {
            return Ok(None);
        };
        match disk.get(cid)? {
            Some(payload) => {
                let value = Bytes::from(payload);
                self.cache.insert(cid, value.clone());
                debug!(%cid, "promoted from object store");
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Fetch content without counting a cache request or promoting a disk
    /// object into memory.
    pub fn peek(&self, cid: &ContentId) -> Result<Option<Bytes>> {
        if let Some(value) = self.cache.peek(cid) {
            return Ok(Some(value));
        }
        match &self.disk {
            Some(disk) => Ok(disk.get(cid)?.map(Bytes::from)),
            None => Ok(None),
        }
    }

    /// Whether `cid` is held in memory or on disk.
    pub fn contains(&self, cid: &ContentId) -> bool {
        self.cache.contains(cid) || self.disk.as_ref().is_some_and(|d| d.contains(cid))
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Compare two byte sequences by identifier.
    pub fn compare_content(&self, a: &[u8], b: &[u8]) -> Result<Comparison> {
        let cid1 = self.generate_cid(a)?;
        let cid2 = self.generate_cid(b)?;
        let identical = cid1 == cid2;
        Ok(Comparison {
            identical,
            drift: !identical,
            cid1,
            cid2,
        })
    }

    /// Resize the cache. Excess entries are reclaimed by the next `gc`.
    pub fn set_max_size(&self, max_size: usize) {
        self.cache.set_max_size(max_size);
    }

    /// Cache counters, latency statistics and target status.
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let counters = self.cache.metrics();
        let perf = self.samples.stats();
        let targets = self.config.targets;
        let hit_rate = counters.hit_rate();

        MetricsSnapshot {
            cache: CacheSection {
                hits: counters.hits,
                misses: counters.misses,
                hit_rate,
                size: self.cache.len(),
                max_size: self.cache.max_size(),
                evictions: counters.evictions,
                total_requests: counters.total_requests,
                deduplicated: counters.deduplicated,
                bytes: self.cache.bytes(),
            },
            performance: PerformanceSection {
                hash_time_p95: perf.p95_ms,
                average_hash_time: perf.average_ms,
                samples: perf.samples,
                meets_targets: TargetStatus {
                    hit_rate: counters.total_requests > 0 && hit_rate >= targets.hit_rate,
                    hash_time: perf.samples == 0 || perf.p95_ms <= targets.hash_time_p95_ms,
                },
            },
        }
    }

    /// Zero cache counters and drop latency samples.
    pub fn reset_metrics(&self) {
        self.cache.reset_metrics();
        self.samples.clear();
    }

    /// Release the cache and return the final metrics.
    ///
    /// Disk writes are synchronous, so there is nothing to flush.
    pub fn shutdown(self) -> MetricsSnapshot {
        let metrics = self.get_metrics();
        self.cache.clear();
        info!(
            hits = metrics.cache.hits,
            misses = metrics.cache.misses,
            evictions = metrics.cache.evictions,
            "cas engine shut down"
        );
        metrics
    }
}
