//! Cache counters, hash latency samples and the metrics payload.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Process-lifetime cache counters, incremented atomically.
#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    pub(crate) hits: AtomicU64,
    pub(crate) misses: AtomicU64,
    pub(crate) evictions: AtomicU64,
    pub(crate) deduplicated: AtomicU64,
}

impl CacheCounters {
    pub(crate) fn snapshot(&self) -> CacheMetrics {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        CacheMetrics {
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
            total_requests: hits + misses,
        }
    }

    pub(crate) fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.deduplicated.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time copy of the cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheMetrics {
    /// `retrieve` calls answered from the cache.
    pub hits: u64,
    /// `retrieve` calls not answered from the cache.
    pub misses: u64,
    /// Entries removed by eviction or collection.
    pub evictions: u64,
    /// `store` calls that found the content already present.
    pub deduplicated: u64,
    /// `hits + misses`.
    pub total_requests: u64,
}

impl CacheMetrics {
    /// Hit rate in `[0, 1]`; zero when nothing was requested.
    pub fn hit_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.hits as f64 / self.total_requests as f64
        }
    }
}

/// Rolling window of hash durations.
#[derive(Debug)]
pub(crate) struct PerformanceSamples {
    window: usize,
    samples: Mutex<VecDeque<Duration>>,
}

impl PerformanceSamples {
    pub(crate) fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            samples: Mutex::new(VecDeque::with_capacity(window)),
        }
    }

    pub(crate) fn record(&self, elapsed: Duration) {
        let mut samples = self.samples.lock();
        if samples.len() == self.window {
            samples.pop_front();
        }
        samples.push_back(elapsed);
    }

    pub(crate) fn clear(&self) {
        self.samples.lock().clear();
    }

    pub(crate) fn stats(&self) -> PerformanceStats {
        let mut sorted: Vec<Duration> = self.samples.lock().iter().copied().collect();
        if sorted.is_empty() {
            return PerformanceStats::default();
        }
        sorted.sort_unstable();

        let total: Duration = sorted.iter().sum();
        let average = total / sorted.len() as u32;
        // Nearest-rank percentile
        let rank = ((sorted.len() as f64) * 0.95).ceil() as usize;
        let p95 = sorted[rank.clamp(1, sorted.len()) - 1];

        PerformanceStats {
            samples: sorted.len(),
            average_ms: as_millis(average),
            p95_ms: as_millis(p95),
        }
    }
}

fn as_millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Summary of the sample window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PerformanceStats {
    /// Number of samples in the window.
    pub samples: usize,
    /// Mean hash duration in milliseconds.
    pub average_ms: f64,
    /// 95th percentile hash duration in milliseconds.
    pub p95_ms: f64,
}

/// Metrics payload returned by `CasEngine::get_metrics`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub cache: CacheSection,
    pub performance: PerformanceSection,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSection {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub size: usize,
    pub max_size: usize,
    pub evictions: u64,
    pub total_requests: u64,
    pub deduplicated: u64,
    pub bytes: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSection {
    /// Milliseconds.
    pub hash_time_p95: f64,
    /// Milliseconds.
    pub average_hash_time: f64,
    pub samples: usize,
    pub meets_targets: TargetStatus,
}

/// Whether each service-level target is currently met.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetStatus {
    pub hit_rate: bool,
    pub hash_time: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate_zero_requests() {
        let counters = CacheCounters::default();
        assert_eq!(counters.snapshot().hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate() {
        let counters = CacheCounters::default();
        counters.hits.store(8, Ordering::Relaxed);
        counters.misses.store(2, Ordering::Relaxed);
        let metrics = counters.snapshot();
        assert_eq!(metrics.total_requests, 10);
        assert!((metrics.hit_rate() - 0.8).abs() < f64::EPSILON);

        counters.reset();
        assert_eq!(counters.snapshot(), CacheMetrics::default());
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let samples = PerformanceSamples::new(100);
        for ms in 1..=100u64 {
            samples.record(Duration::from_millis(ms));
        }
        let stats = samples.stats();
        assert_eq!(stats.samples, 100);
        assert!((stats.p95_ms - 95.0).abs() < 1e-9);
        assert!((stats.average_ms - 50.5).abs() < 1e-9);
    }

    #[test]
    fn test_window_is_bounded() {
        let samples = PerformanceSamples::new(10);
        for ms in 0..50u64 {
            samples.record(Duration::from_millis(ms));
        }
        let stats = samples.stats();
        assert_eq!(stats.samples, 10);
        // Only 40..50 remain
        assert!(stats.average_ms >= 40.0);
    }

    #[test]
    fn test_empty_stats() {
        let samples = PerformanceSamples::new(10);
        assert_eq!(samples.stats(), PerformanceStats::default());
        samples.record(Duration::from_millis(3));
        samples.clear();
        assert_eq!(samples.stats().samples, 0);
    }

    #[test]
    fn test_payload_field_names() {
        let snapshot = MetricsSnapshot {
            cache: CacheSection {
                hits: 1,
                misses: 0,
                hit_rate: 1.0,
                size: 1,
                max_size: 10,
                evictions: 0,
                total_requests: 1,
                deduplicated: 0,
                bytes: 4,
            },
            performance: PerformanceSection {
                hash_time_p95: 0.1,
                average_hash_time: 0.05,
                samples: 1,
                meets_targets: TargetStatus {
                    hit_rate: true,
                    hash_time: true,
                },
            },
        };
        let value = serde_json::to_value(&snapshot).unwrap();
        assert!(value["cache"]["hitRate"].is_number());
        assert!(value["cache"]["maxSize"].is_number());
        assert!(value["performance"]["hashTimeP95"].is_number());
        assert!(value["performance"]["averageHashTime"].is_number());
        assert_eq!(value["performance"]["meetsTargets"]["hashTime"], true);
    }
}
