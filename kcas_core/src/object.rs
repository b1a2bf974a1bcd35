//! On-disk framing of persisted objects.
//!
//! ```text
//! offset size
//! 0      4    b"KCAS"
//! 4      1    format version (1)
//! 5      1    hash algorithm id
//! 6      1    codec id
//! 7      1    compression (0 none, 1 zstd)
//! 8      8    stored payload length, little endian
//! 16     ..   payload
//! ```

use crate::content_id::Codec;
use crate::error::{Error, Result};
use crate::hash::Algorithm;

const MAGIC: [u8; 4] = *b"KCAS";
const FORMAT_VERSION: u8 = 1;

/// Bytes preceding the payload in every object file.
pub const HEADER_SIZE: usize = 16;

/// How the payload bytes are encoded on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    None,
    Zstd,
}

impl CompressionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionType::None => "none",
            CompressionType::Zstd => "zstd",
        }
    }

    fn id(self) -> u8 {
        match self {
            CompressionType::None => 0,
            CompressionType::Zstd => 1,
        }
    }
}

impl TryFrom<u8> for CompressionType {
    type Error = Error;

    fn try_from(id: u8) -> Result<Self> {
        match id {
            0 => Ok(CompressionType::None),
            1 => Ok(CompressionType::Zstd),
            other => Err(Error::compression_error(format!(
                "unknown compression id {}",
                other
            ))),
        }
    }
}

/// Decoded object header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHeader {
    pub algorithm: Algorithm,
    pub codec: Codec,
    pub compression: CompressionType,
    /// Length of the payload as stored, after compression.
    pub payload_len: u64,
}

impl ObjectHeader {
    pub fn new(
        algorithm: Algorithm,
        codec: Codec,
        compression: CompressionType,
        payload_len: u64,
    ) -> Self {
        Self {
            algorithm,
            codec,
            compression,
            payload_len,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        let (prefix, len) = out.split_at_mut(8);
        prefix.copy_from_slice(&[
            MAGIC[0],
            MAGIC[1],
            MAGIC[2],
            MAGIC[3],
            FORMAT_VERSION,
            self.algorithm.id(),
            self.codec.id(),
            self.compression.id(),
        ]);
        len.copy_from_slice(&self.payload_len.to_le_bytes());
        out
    }

    /// Parse the header at the start of `bytes`. Trailing bytes are ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let Some((header, _)) = bytes.split_first_chunk::<HEADER_SIZE>() else {
            return Err(malformed(format!(
                "{} bytes is shorter than the {}-byte header",
                bytes.len(),
                HEADER_SIZE
            )));
        };

        let [m0, m1, m2, m3, version, algorithm, codec, compression, len @ ..] = *header;
        if [m0, m1, m2, m3] != MAGIC {
            return Err(malformed("not a KCAS object"));
        }
        if version != FORMAT_VERSION {
            return Err(malformed(format!("format version {} is not supported", version)));
        }

        Ok(Self {
            algorithm: Algorithm::from_id(algorithm)?,
            codec: Codec::from_id(codec)?,
            compression: CompressionType::try_from(compression)?,
            payload_len: u64::from_le_bytes(len),
        })
    }
}

fn malformed(reason: impl Into<String>) -> Error {
    Error::invalid_hash(format!("object header: {}", reason.into()))
}
