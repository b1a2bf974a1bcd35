//! Self-describing content identifiers.
//!
//! A [`ContentId`] is a CIDv1: version, content codec and a multihash
//! (algorithm code + digest). The string form is the multibase (base32)
//! encoding and round-trips through [`ContentId::parse`].

use crate::error::{Error, Result};
use crate::hash::{Algorithm, Digest};
use ::cid::Cid;
use ::cid::multihash::Multihash;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Content-type tag carried in the CID.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    /// Opaque bytes.
    #[default]
    Raw,
    /// JSON documents.
    Json,
}

impl Codec {
    /// Multicodec code.
    pub fn code(&self) -> u64 {
        match self {
            Codec::Raw => 0x55,
            Codec::Json => 0x0200,
        }
    }

    /// Parse from a multicodec code.
    pub fn from_code(code: u64) -> Result<Self> {
        match code {
            0x55 => Ok(Codec::Raw),
            0x0200 => Ok(Codec::Json),
            _ => Err(Error::invalid_cid(format!("unknown codec {:#x}", code))),
        }
    }

    /// Returns the codec ID byte (for object headers).
    pub fn id(&self) -> u8 {
        match self {
            Codec::Raw => 0,
            Codec::Json => 1,
        }
    }

    /// Parse codec from ID byte.
    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            0 => Ok(Codec::Raw),
            1 => Ok(Codec::Json),
            _ => Err(Error::invalid_cid(format!("unknown codec ID {}", id))),
        }
    }

    /// Returns the codec name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Codec::Raw => "raw",
            Codec::Json => "json",
        }
    }
}

impl FromStr for Codec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "raw" => Ok(Codec::Raw),
            "json" => Ok(Codec::Json),
            _ => Err(Error::invalid_cid(format!("unknown codec {}", s))),
        }
    }
}

/// Content identifier for a byte sequence.
///
/// Equal identifiers imply equal codec, algorithm and digest.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId {
    cid: Cid,
    codec: Codec,
    digest: Digest,
}

impl ContentId {
    /// Hash `content` and wrap the digest.
    pub fn generate(content: &[u8], algorithm: Algorithm, codec: Codec) -> Result<Self> {
        Self::from_digest(Digest::compute(content, algorithm), codec)
    }

    /// Wrap an already computed digest.
    pub(crate) fn from_digest(digest: Digest, codec: Codec) -> Result<Self> {
        let code = digest.algorithm().multihash_code();
        let multihash = Multihash::<64>::wrap(code, digest.as_bytes())
            .map_err(|e| Error::invalid_cid(format!("multihash: {}", e)))?;
        Ok(Self {
            cid: Cid::new_v1(codec.code(), multihash),
            codec,
            digest,
        })
    }

    /// Parse the string form produced by `Display`.
    pub fn parse(s: &str) -> Result<Self> {
        let cid = Cid::try_from(s)?;
        Self::from_cid(cid)
    }

    fn from_cid(cid: Cid) -> Result<Self> {
        if cid.version() != ::cid::Version::V1 {
            return Err(Error::invalid_cid("only CIDv1 is supported"));
        }
        let codec = Codec::from_code(cid.codec())?;
        let algorithm = Algorithm::from_multihash_code(cid.hash().code())?;
        let digest = Digest::from_bytes(algorithm, cid.hash().digest())
            .map_err(|e| Error::invalid_cid(e.to_string()))?;
        Ok(Self { cid, codec, digest })
    }

    /// CID version number.
    pub fn version(&self) -> u8 {
        1
    }

    /// Content codec.
    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Hash algorithm.
    pub fn algorithm(&self) -> Algorithm {
        self.digest.algorithm()
    }

    /// The wrapped digest.
    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    /// Hex form of the digest (as written to lock files).
    pub fn digest_hex(&self) -> String {
        self.digest.to_hex()
    }

    /// Binary CID encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.cid.to_bytes()
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cid)
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({})", self.cid)
    }
}

impl FromStr for ContentId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ContentId::parse(s)
    }
}

impl Serialize for ContentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ContentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ContentId::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_deterministic() {
        let a = ContentId::generate(b"same", Algorithm::Sha256, Codec::Raw).unwrap();
        let b = ContentId::generate(b"same", Algorithm::Sha256, Codec::Raw).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn test_different_content_different_cid() {
        let a = ContentId::generate(b"one", Algorithm::Sha256, Codec::Raw).unwrap();
        let b = ContentId::generate(b"two", Algorithm::Sha256, Codec::Raw).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_codec_and_algorithm_participate_in_equality() {
        let raw = ContentId::generate(b"x", Algorithm::Sha256, Codec::Raw).unwrap();
        let json = ContentId::generate(b"x", Algorithm::Sha256, Codec::Json).unwrap();
        let blake = ContentId::generate(b"x", Algorithm::Blake3, Codec::Raw).unwrap();
        assert_ne!(raw, json);
        assert_ne!(raw, blake);
    }

    #[test]
    fn test_string_is_multibase_base32() {
        let cid = ContentId::generate(b"Hello, KGEN!", Algorithm::Sha256, Codec::Raw).unwrap();
        let s = cid.to_string();
        assert!(s.starts_with('b'), "CIDv1 default multibase is base32: {}", s);
        assert!(s.starts_with("bafkrei"), "raw + sha2-256 prefix: {}", s);
    }

    #[test]
    fn test_parse_roundtrip_all_algorithms() {
        for algo in Algorithm::ALL {
            let cid = ContentId::generate(b"payload", algo, Codec::Raw).unwrap();
            let parsed = ContentId::parse(&cid.to_string()).unwrap();
            assert_eq!(parsed, cid);
            assert_eq!(parsed.algorithm(), algo);
            assert_eq!(parsed.digest_hex(), crate::hash::calculate_hash(b"payload", algo));
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(ContentId::parse("not-a-cid").is_err());
        assert!(ContentId::parse("").is_err());
    }

    #[test]
    fn test_parse_rejects_unknown_codec() {
        let mh = Multihash::<64>::wrap(0x12, &[0u8; 32]).unwrap();
        let foreign = Cid::new_v1(0x70, mh).to_string();
        assert!(matches!(
            ContentId::parse(&foreign),
            Err(Error::InvalidCid { .. })
        ));
    }

    #[test]
    fn test_serde_as_string() {
        let cid = ContentId::generate(b"serde", Algorithm::Blake3, Codec::Json).unwrap();
        let json = serde_json::to_string(&cid).unwrap();
        assert_eq!(json, format!("\"{}\"", cid));
        let back: ContentId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cid);
    }

    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// parse(to_string(cid)) == cid
        #[test]
        fn prop_cid_string_roundtrip(data: Vec<u8>, json: bool) {
            let codec = if json { Codec::Json } else { Codec::Raw };
            let cid = ContentId::generate(&data, Algorithm::Sha256, codec)?;
            prop_assert_eq!(ContentId::parse(&cid.to_string())?, cid);
        }
    }
}
