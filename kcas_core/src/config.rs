//! Engine configuration.

use crate::content_id::Codec;
use crate::hash::Algorithm;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default cache capacity in entries.
pub const DEFAULT_MAX_SIZE: usize = 1000;

/// Default in-memory byte budget (64 MiB).
pub const DEFAULT_MAX_BYTES: usize = 64 * 1024 * 1024;

/// Default on-disk byte budget for the object tier (256 MiB).
pub const DEFAULT_MAX_DISK_BYTES: u64 = 256 * 1024 * 1024;

/// Default number of hash timings kept for percentile statistics.
pub const DEFAULT_SAMPLE_WINDOW: usize = 1000;

/// Victim selection on cache overflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheStrategy {
    /// Evict exactly the least-recently-accessed entry per overflow.
    #[default]
    Lru,
    /// Evict least-recently-accessed entries in a batch down to 90% of capacity.
    LruAggressive,
}

impl CacheStrategy {
    /// Entry count to trim to once `max_size` is exceeded. Never zero for a
    /// non-zero capacity, so the entry that caused the overflow stays.
    pub fn overflow_target(&self, max_size: usize) -> usize {
        match self {
            CacheStrategy::Lru => max_size,
            CacheStrategy::LruAggressive => (max_size * 9 / 10).max(1).min(max_size),
        }
    }
}

/// How far garbage collection trims when forced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GcPolicy {
    /// Trim to 80% of capacity.
    #[default]
    Auto,
    /// Trim to half of capacity.
    Aggressive,
    /// Trim entries and resident bytes to 70% of their budgets.
    MemoryPressure,
    /// Like `Auto`, and also prune the disk tier down to its byte budget.
    DiskPressure,
}

impl GcPolicy {
    /// Fraction of capacity a forced collection trims towards.
    pub fn low_watermark(&self) -> f64 {
        match self {
            GcPolicy::Auto | GcPolicy::DiskPressure => 0.8,
            GcPolicy::Aggressive => 0.5,
            GcPolicy::MemoryPressure => 0.7,
        }
    }

    /// Whether the byte budget is trimmed along with the entry count.
    pub fn trims_bytes(&self) -> bool {
        matches!(self, GcPolicy::MemoryPressure)
    }

    /// Whether collection also prunes the disk tier.
    pub fn prunes_disk(&self) -> bool {
        matches!(self, GcPolicy::DiskPressure)
    }
}

/// Service-level targets reported by `get_metrics`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Targets {
    /// Minimum acceptable cache hit rate.
    pub hit_rate: f64,
    /// Maximum acceptable p95 hashing latency in milliseconds.
    pub hash_time_p95_ms: f64,
}

impl Default for Targets {
    fn default() -> Self {
        Self {
            hit_rate: 0.80,
            hash_time_p95_ms: 5.0,
        }
    }
}

/// Configuration for [`crate::CasEngine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Default hash algorithm for `generate_cid` and `store`.
    pub algorithm: Algorithm,
    /// Default content codec for generated identifiers.
    pub codec: Codec,
    /// Cache eviction strategy.
    pub cache_strategy: CacheStrategy,
    /// Garbage collection policy.
    pub gc_policy: GcPolicy,
    /// Cache capacity in entries.
    pub max_size: usize,
    /// Resident byte budget, enforced by `memory-pressure` collections.
    pub max_bytes: usize,
    /// Number of recent hash timings kept.
    pub sample_window: usize,
    /// Service-level targets.
    pub targets: Targets,
    /// Directory of the persistent object tier; memory only when unset.
    pub storage_dir: Option<PathBuf>,
    /// Byte budget of the persistent object tier.
    pub max_disk_bytes: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::default(),
            codec: Codec::default(),
            cache_strategy: CacheStrategy::default(),
            gc_policy: GcPolicy::default(),
            max_size: DEFAULT_MAX_SIZE,
            max_bytes: DEFAULT_MAX_BYTES,
            sample_window: DEFAULT_SAMPLE_WINDOW,
            targets: Targets::default(),
            storage_dir: None,
            max_disk_bytes: DEFAULT_MAX_DISK_BYTES,
        }
    }
}

impl EngineConfig {
    /// Config with a different cache capacity.
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Config with a different default algorithm.
    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Config with a persistent object tier rooted at `dir`.
    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = Some(dir.into());
        self
    }

    /// Config with a different eviction strategy.
    pub fn with_strategy(mut self, strategy: CacheStrategy) -> Self {
        self.cache_strategy = strategy;
        self
    }

    /// Config with a different GC policy.
    pub fn with_gc_policy(mut self, policy: GcPolicy) -> Self {
        self.gc_policy = policy;
        self
    }
}
