//! Digest computation over byte content.
//!
//! Every backend is statically linked; the algorithm is selected per call and
//! never substituted. Unknown algorithm names fail with
//! [`Error::UnsupportedAlgorithm`].

use crate::error::{Error, Result};
use blake2::Blake2b512;
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::Digest as _;
use sha2::{Sha256, Sha512};
use std::fmt;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

/// Read buffer size for streaming file hashing.
const READ_BUF_SIZE: usize = 64 * 1024;

/// Digest functions an engine can be configured with.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// SHA-256 (default).
    #[default]
    #[serde(alias = "sha2-256", alias = "sha-256")]
    Sha256,
    /// SHA-512.
    #[serde(alias = "sha2-512", alias = "sha-512")]
    Sha512,
    /// BLAKE2b with 512-bit output.
    #[serde(alias = "blake2b-512")]
    Blake2b,
    /// BLAKE3, 32-byte output.
    #[serde(alias = "blake3-256")]
    Blake3,
    /// MD5. Only for reading baselines written by legacy tooling.
    Md5,
}

impl Algorithm {
    /// All supported algorithms.
    pub const ALL: [Algorithm; 5] = [
        Algorithm::Sha256,
        Algorithm::Sha512,
        Algorithm::Blake2b,
        Algorithm::Blake3,
        Algorithm::Md5,
    ];

    /// Returns the canonical name of the algorithm (for config and lock files).
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha512 => "sha512",
            Algorithm::Blake2b => "blake2b",
            Algorithm::Blake3 => "blake3",
            Algorithm::Md5 => "md5",
        }
    }

    /// Parse algorithm from its name. Accepts the common multihash spellings.
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" | "sha2-256" => Ok(Algorithm::Sha256),
            "sha512" | "sha-512" | "sha2-512" => Ok(Algorithm::Sha512),
            "blake2b" | "blake2b-512" => Ok(Algorithm::Blake2b),
            "blake3" | "blake3-256" => Ok(Algorithm::Blake3),
            "md5" => Ok(Algorithm::Md5),
            _ => Err(Error::unsupported_algorithm(s)),
        }
    }

    /// Byte stored in object headers.
    pub fn id(&self) -> u8 {
        match self {
            Algorithm::Sha256 => 1,
            Algorithm::Sha512 => 2,
            Algorithm::Blake2b => 3,
            Algorithm::Blake3 => 4,
            Algorithm::Md5 => 5,
        }
    }

    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            1 => Ok(Algorithm::Sha256),
            2 => Ok(Algorithm::Sha512),
            3 => Ok(Algorithm::Blake2b),
            4 => Ok(Algorithm::Blake3),
            5 => Ok(Algorithm::Md5),
            _ => Err(Error::unsupported_algorithm(format!("header id {}", id))),
        }
    }

    /// Multicodec code used in the multihash prefix.
    pub fn multihash_code(&self) -> u64 {
        match self {
            Algorithm::Sha256 => 0x12,
            Algorithm::Sha512 => 0x13,
            Algorithm::Blake2b => 0xb240,
            Algorithm::Blake3 => 0x1e,
            Algorithm::Md5 => 0xd5,
        }
    }

    /// Parse algorithm from a multihash code.
    pub fn from_multihash_code(code: u64) -> Result<Self> {
        Algorithm::ALL
            .into_iter()
            .find(|algo| algo.multihash_code() == code)
            .ok_or_else(|| Error::unsupported_algorithm(format!("multihash code {:#x}", code)))
    }

    /// Digest length in bytes.
    pub fn digest_len(&self) -> usize {
        match self {
            Algorithm::Sha256 | Algorithm::Blake3 => 32,
            Algorithm::Sha512 | Algorithm::Blake2b => 64,
            Algorithm::Md5 => 16,
        }
    }

    /// Whether the algorithm is kept only for compatibility.
    pub fn is_legacy(&self) -> bool {
        matches!(self, Algorithm::Md5)
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Algorithm::parse(s)
    }
}

/// Incremental hasher over one of the supported backends.
pub struct Hasher {
    state: HasherState,
}

enum HasherState {
    Sha256(Sha256),
    Sha512(Sha512),
    Blake2b(Blake2b512),
    Blake3(Box<blake3::Hasher>),
    Md5(Md5),
}

impl Hasher {
    /// Create a hasher for the given algorithm.
    pub fn new(algorithm: Algorithm) -> Self {
        let state = match algorithm {
            Algorithm::Sha256 => HasherState::Sha256(Sha256::new()),
            Algorithm::Sha512 => HasherState::Sha512(Sha512::new()),
            Algorithm::Blake2b => HasherState::Blake2b(Blake2b512::new()),
            Algorithm::Blake3 => HasherState::Blake3(Box::new(blake3::Hasher::new())),
            Algorithm::Md5 => HasherState::Md5(Md5::new()),
        };
        Self { state }
    }

    /// Feed more bytes.
    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            HasherState::Sha256(h) => h.update(data),
            HasherState::Sha512(h) => h.update(data),
            HasherState::Blake2b(h) => h.update(data),
            HasherState::Blake3(h) => {
                h.update(data);
            }
            HasherState::Md5(h) => h.update(data),
        }
    }

    /// Consume the hasher and produce the digest.
    pub fn finalize(self) -> Digest {
        let (algorithm, bytes) = match self.state {
            HasherState::Sha256(h) => (Algorithm::Sha256, h.finalize().to_vec()),
            HasherState::Sha512(h) => (Algorithm::Sha512, h.finalize().to_vec()),
            HasherState::Blake2b(h) => (Algorithm::Blake2b, h.finalize().to_vec()),
            HasherState::Blake3(h) => (Algorithm::Blake3, h.finalize().as_bytes().to_vec()),
            HasherState::Md5(h) => (Algorithm::Md5, h.finalize().to_vec()),
        };
        Digest { algorithm, bytes }
    }
}

/// A digest tagged with the algorithm that produced it.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Digest {
    algorithm: Algorithm,
    bytes: Vec<u8>,
}

impl Digest {
    /// Hash raw bytes.
    pub fn compute(data: &[u8], algorithm: Algorithm) -> Self {
        let mut hasher = Hasher::new(algorithm);
        hasher.update(data);
        hasher.finalize()
    }

    /// Hash data from a reader.
    pub fn compute_reader<R: Read>(mut reader: R, algorithm: Algorithm) -> Result<Self> {
        let mut hasher = Hasher::new(algorithm);
        let mut buf = vec![0u8; READ_BUF_SIZE];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize())
    }

    /// Hash a file.
    pub fn compute_file(path: &Path, algorithm: Algorithm) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::compute_reader(file, algorithm)
    }

    /// Create a Digest from raw bytes, validating the length.
    pub fn from_bytes(algorithm: Algorithm, bytes: &[u8]) -> Result<Self> {
        if bytes.len() != algorithm.digest_len() {
            return Err(Error::invalid_hash(format!(
                "Expected {} bytes for {}, got {}",
                algorithm.digest_len(),
                algorithm,
                bytes.len()
            )));
        }
        Ok(Self {
            algorithm,
            bytes: bytes.to_vec(),
        })
    }

    /// Create a Digest from a hex string.
    pub fn from_hex(algorithm: Algorithm, hex_str: &str) -> Result<Self> {
        if hex_str.len() != algorithm.digest_len() * 2 {
            return Err(Error::invalid_hash(format!(
                "{} hex digits expected, found {}",
                algorithm.digest_len() * 2,
                hex_str.len()
            )));
        }

        let bytes =
            hex::decode(hex_str).map_err(|e| Error::invalid_hash(format!("hex: {}", e)))?;
        Self::from_bytes(algorithm, &bytes)
    }

    /// Algorithm that produced this digest.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Digest bytes without the algorithm.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Convert to lowercase hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    /// Shard directory name: the first two hex digits.
    pub fn prefix(&self) -> String {
        hex::encode(&self.bytes[..1])
    }

    /// Get the remaining hex characters (for filename).
    pub fn suffix(&self) -> String {
        hex::encode(&self.bytes[1..])
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({}:{})", self.algorithm, self.to_hex())
    }
}

/// Hash `content` and return the lowercase hex digest.
pub fn calculate_hash(content: &[u8], algorithm: Algorithm) -> String {
    Digest::compute(content, algorithm).to_hex()
}

/// Like [`calculate_hash`], with the algorithm given by name.
pub fn calculate_hash_named(content: &[u8], algorithm: &str) -> Result<String> {
    let algorithm = Algorithm::parse(algorithm)?;
    Ok(calculate_hash(content, algorithm))
}
