//! Error types for kcas_core.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during engine, lock and drift operations.
///
/// Unknown content and a missing baseline are not errors: `retrieve` returns
/// `None` and drift detection reports `DriftStatus::NoBaseline`.
#[derive(Error, Debug)]
pub enum Error {
    #[error("i/o: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Requested hash algorithm is not implemented.
    #[error("unsupported hash algorithm {algorithm:?}")]
    UnsupportedAlgorithm { algorithm: String },

    /// Content identifier could not be parsed or is not one we produce.
    #[error("invalid CID: {reason}")]
    InvalidCid { reason: String },

    /// Digest bytes or hex of the wrong shape.
    #[error("invalid digest: {reason}")]
    InvalidHash { reason: String },

    /// Persisted baseline exists but cannot be used.
    #[error("lock file {path:?} is unusable: {reason}")]
    CorruptLockFile { path: PathBuf, reason: String },

    /// Object file failed header, length or digest checks.
    #[error("object {path:?} is corrupted: {reason}")]
    CorruptedObject { path: PathBuf, reason: String },

    #[error("{path:?} is not a usable object store: {reason}")]
    InvalidStore { path: PathBuf, reason: String },

    /// A path could not be expressed relative to the project root.
    #[error("bad path {path:?}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },

    /// RDF content could not be parsed.
    #[error("RDF syntax: {reason}")]
    RdfSyntax { reason: String },

    #[error("compression: {reason}")]
    Compression { reason: String },

    /// A built-in pattern failed to compile.
    #[error("pattern: {source}")]
    Pattern {
        #[from]
        source: regex::Error,
    },

    #[error("json: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    /// The operation was cancelled through its cancel token.
    #[error("cancelled")]
    Cancelled,
}

/// Shorthand constructors, one per variant that carries a reason.
impl Error {
    pub fn unsupported_algorithm(algorithm: impl Into<String>) -> Self {
        Error::UnsupportedAlgorithm {
            algorithm: algorithm.into(),
        }
    }

    pub fn invalid_cid(reason: impl Into<String>) -> Self {
        Error::InvalidCid {
            reason: reason.into(),
        }
    }

    pub fn invalid_hash(reason: impl Into<String>) -> Self {
        Error::InvalidHash {
            reason: reason.into(),
        }
    }

    pub fn corrupt_lock_file(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::CorruptLockFile {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn corrupted_object(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::CorruptedObject {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_store(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::InvalidStore {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_path(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn rdf_syntax(reason: impl Into<String>) -> Self {
        Error::RdfSyntax {
            reason: reason.into(),
        }
    }

    pub fn compression_error(reason: impl Into<String>) -> Self {
        Error::Compression {
            reason: reason.into(),
        }
    }
}

impl From<tempfile::PersistError> for Error {
    fn from(err: tempfile::PersistError) -> Self {
        err.error.into()
    }
}

impl From<ignore::Error> for Error {
    fn from(err: ignore::Error) -> Self {
        let kind = err
            .io_error()
            .map_or(std::io::ErrorKind::Other, std::io::Error::kind);
        Error::Io {
            source: std::io::Error::new(kind, err.to_string()),
        }
    }
}

impl From<cid::Error> for Error {
    fn from(err: cid::Error) -> Self {
        Error::invalid_cid(err.to_string())
    }
}
