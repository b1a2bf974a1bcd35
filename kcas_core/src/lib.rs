//! # KCAS Core
//!
//! A content-addressed storage engine with baseline drift detection.
//!
//! Artifacts are identified by the hash of their bytes. The engine hashes,
//! deduplicates and caches content; the lock manager records a baseline of
//! every tracked template, rule and config file; the drift detector compares
//! the project against that baseline and ranks what changed.
//!
//! ## Features
//!
//! - SHA-256 (default), SHA-512, BLAKE2b, BLAKE3 and legacy MD5 digests
//! - Self-describing CIDv1 content identifiers
//! - Concurrent LRU cache with hit-rate and latency metrics
//! - Optional on-disk object tier with zstd compression
//! - Atomic lock file snapshots with dependency maps
//! - Severity-ranked drift reports with RDF structure heuristics
//!
//! ## Example
//!
//! ```no_run
//! use kcas_core::{CasEngine, DriftDetector, EngineConfig, LockManager, ProjectLayout};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = CasEngine::new(EngineConfig::default())?;
//!
//! // Store content by hash
//! let outcome = engine.store(b"hello".to_vec())?;
//! assert!(engine.retrieve(&outcome.cid)?.is_some());
//!
//! // Record a baseline, then check for drift
//! let layout = ProjectLayout::new("./my-project");
//! let manager = LockManager::new(&engine, &layout);
//! manager.update(&manager.generate()?)?;
//!
//! let result = DriftDetector::new(&engine, &layout).detect()?;
//! println!("{}: {}", result.status, result.message);
//! # Ok(())
//! # }
//! ```

mod cache;
mod cancel;
mod config;
mod content_id;
mod drift;
mod engine;
mod error;
mod gc;
mod hash;
mod layout;
mod lock;
mod metrics;
mod object;
mod semantic;
mod store;

pub use cache::{CacheEntryInfo, ContentCache, EvictionStats};
pub use cancel::CancelToken;
pub use config::{CacheStrategy, EngineConfig, GcPolicy, Targets};
pub use content_id::{Codec, ContentId};
pub use drift::{
    DriftDetails, DriftDetector, DriftEntry, DriftOptions, DriftReport, DriftResult, DriftStatus,
    DriftSummary, DriftType, FileAnalysis, FileOutcome, Finding, Severity, generate_report,
};
pub use engine::{CasEngine, Comparison, StoreOutcome};
pub use error::{Error, Result};
pub use gc::GcStats;
pub use hash::{Algorithm, Digest, Hasher, calculate_hash, calculate_hash_named};
pub use layout::{Discovery, DiscoveryFailure, FileKind, ProjectLayout, TrackedFile};
pub use lock::{
    Dependencies, FileEntry, GitDirectory, LOCK_FILE_VERSION, LockFile, LockFileStats,
    LockManager, VcsInfo, VcsProvider,
};
pub use metrics::{
    CacheMetrics, CacheSection, MetricsSnapshot, PerformanceSection, PerformanceStats,
    TargetStatus,
};
pub use object::{CompressionType, ObjectHeader};
pub use semantic::{GraphStructure, RdfParser, StructureDelta, TurtleParser};
pub use store::{DiskUsage, ObjectStore, PruneStats};
