//! Persistent object tier.
//!
//! Layout under the storage root:
//! - `config` with format version and default algorithm
//! - `objects/{algorithm}/{prefix}/{suffix}` one file per object
//!
//! Writes go through a temporary file in the shard directory and are renamed
//! into place, so readers only ever see complete objects.

use crate::cancel::CancelToken;
use crate::content_id::ContentId;
use crate::error::{Error, Result};
use crate::hash::{Algorithm, Digest};
use crate::object::{CompressionType, HEADER_SIZE, ObjectHeader};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

const CONFIG_FILE: &str = "config";
const OBJECTS_DIR: &str = "objects";

/// Payloads of at least this many bytes are stored zstd-compressed.
const COMPRESS_MIN_BYTES: usize = 4096;
const ZSTD_LEVEL: i32 = 3;

/// Statistics from pruning the object tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneStats {
    /// Number of objects deleted.
    pub objects_deleted: usize,
    /// Bytes freed.
    pub bytes_freed: u64,
}

/// Object count and on-disk size of the tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskUsage {
    pub objects: usize,
    pub bytes: u64,
}

/// Contents of the `config` file at the store root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StoreConfig {
    algorithm: Algorithm,
}

impl StoreConfig {
    const FORMAT: &'static str = "1";

    fn render(&self) -> String {
        format!("version={}\nalgo={}\n", Self::FORMAT, self.algorithm)
    }

    /// `key=value` lines; blank lines and `#` comments are skipped.
    fn parse(root: &Path, text: &str) -> Result<Self> {
        let fields: HashMap<&str, &str> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split_once('='))
            .map(|(key, value)| (key.trim(), value.trim()))
            .collect();

        let version = fields.get("version").copied();
        if version != Some(Self::FORMAT) {
            return Err(Error::invalid_store(
                root,
                format!("unsupported store version {:?}", version),
            ));
        }
        let algo = fields
            .get("algo")
            .ok_or_else(|| Error::invalid_store(root, "config has no algo"))?;
        Ok(Self {
            algorithm: Algorithm::parse(algo)?,
        })
    }
}

/// An on-disk content-addressed object store.
#[derive(Debug)]
pub struct ObjectStore {
    root: PathBuf,
    algorithm: Algorithm,
}

impl ObjectStore {
    /// Create the directory layout and config file at `root`.
    pub fn init<P: AsRef<Path>>(root: P, algorithm: Algorithm) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(OBJECTS_DIR).join(algorithm.as_str()))?;
        fs::write(root.join(CONFIG_FILE), StoreConfig { algorithm }.render())?;

        debug!(root = %root.display(), %algorithm, "initialized object store");
        Ok(Self { root, algorithm })
    }

    /// Open a store created by [`ObjectStore::init`].
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let text = match fs::read_to_string(root.join(CONFIG_FILE)) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::invalid_store(&root, "not an object store"));
            }
            Err(e) => return Err(e.into()),
        };
        let config = StoreConfig::parse(&root, &text)?;
        if !root.join(OBJECTS_DIR).is_dir() {
            return Err(Error::invalid_store(&root, "objects directory missing"));
        }

        Ok(Self {
            root,
            algorithm: config.algorithm,
        })
    }

    /// Open the store at `root`, initializing it on first use.
    pub fn open_or_init<P: AsRef<Path>>(root: P, algorithm: Algorithm) -> Result<Self> {
        if root.as_ref().join(CONFIG_FILE).is_file() {
            Self::open(root)
        } else {
            Self::init(root, algorithm)
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Default algorithm recorded at init.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Path of an object file: `objects/{algorithm}/{prefix}/{suffix}`.
    ///
    /// The codec is not part of the path; identical bytes share one file.
    pub fn object_path(&self, cid: &ContentId) -> PathBuf {
        let digest = cid.digest();
        self.root
            .join(OBJECTS_DIR)
            .join(digest.algorithm().as_str())
            .join(digest.prefix())
            .join(digest.suffix())
    }

    /// Whether an object file exists for `cid`.
    pub fn contains(&self, cid: &ContentId) -> bool {
        self.object_path(cid).exists()
    }

    /// Write `payload` under `cid`. Returns `false` if the object already existed.
    pub fn put(&self, cid: &ContentId, payload: &[u8]) -> Result<bool> {
        let obj_path = self.object_path(cid);
        if obj_path.exists() {
            return Ok(false);
        }

        let (stored, compression) = if payload.len() >= COMPRESS_MIN_BYTES {
            let packed = zstd::encode_all(payload, ZSTD_LEVEL)
                .map_err(|e| Error::compression_error(format!("zstd encode: {}", e)))?;
            (packed, CompressionType::Zstd)
        } else {
            (payload.to_vec(), CompressionType::None)
        };

        let header = ObjectHeader::new(
            cid.algorithm(),
            cid.codec(),
            compression,
            stored.len() as u64,
        );
        self.write_object_atomic(&obj_path, &header, &stored)?;
        debug!(%cid, bytes = payload.len(), compression = compression.as_str(), "object written");
        Ok(true)
    }

    /// Read the payload of `cid`, verifying it against the digest.
    pub fn get(&self, cid: &ContentId) -> Result<Option<Vec<u8>>> {
        let obj_path = self.object_path(cid);
        let raw = match fs::read(&obj_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let header = ObjectHeader::decode(&raw)
            .map_err(|e| Error::corrupted_object(&obj_path, e.to_string()))?;
        let stored = &raw[HEADER_SIZE..];
        if stored.len() as u64 != header.payload_len {
            return Err(Error::corrupted_object(
                &obj_path,
                format!(
                    "header says {} stored bytes, file has {}",
                    header.payload_len,
                    stored.len()
                ),
            ));
        }

        let payload = match header.compression {
            CompressionType::None => stored.to_vec(),
            CompressionType::Zstd => zstd::decode_all(stored)
                .map_err(|e| Error::corrupted_object(&obj_path, format!("zstd decode: {}", e)))?,
        };

        let computed = Digest::compute(&payload, cid.algorithm());
        if &computed != cid.digest() {
            warn!(%cid, path = %obj_path.display(), "object digest mismatch");
            return Err(Error::corrupted_object(
                &obj_path,
                format!(
                    "content hashes to {}, not {}",
                    computed.to_hex(),
                    cid.digest_hex()
                ),
            ));
        }

        Ok(Some(payload))
    }

    /// Object count and total on-disk size.
    pub fn usage(&self) -> Result<DiskUsage> {
        let objects = self.list_objects()?;
        Ok(DiskUsage {
            objects: objects.len(),
            bytes: objects.iter().map(|o| o.len).sum(),
        })
    }

    /// Delete the oldest objects (by modification time) until the tier
    /// occupies at most `max_bytes`.
    pub fn prune_to(&self, max_bytes: u64, cancel: Option<&CancelToken>) -> Result<PruneStats> {
        let mut stats = PruneStats::default();
        let mut objects = self.list_objects()?;
        let mut total: u64 = objects.iter().map(|o| o.len).sum();
        if total <= max_bytes {
            return Ok(stats);
        }

        objects.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));

        for object in objects {
            if total <= max_bytes {
                break;
            }
            if let Some(token) = cancel {
                token.check()?;
            }
            fs::remove_file(&object.path)?;
            total -= object.len;
            stats.objects_deleted += 1;
            stats.bytes_freed += object.len;

            // Remove empty shard directories
            if let Some(shard) = object.path.parent()
                && let Ok(mut entries) = fs::read_dir(shard)
                && entries.next().is_none()
            {
                let _ = fs::remove_dir(shard);
            }
        }

        debug!(
            deleted = stats.objects_deleted,
            freed = stats.bytes_freed,
            "pruned object store"
        );
        Ok(stats)
    }

    fn list_objects(&self) -> Result<Vec<StoredObject>> {
        let mut objects = Vec::new();
        let objects_dir = self.root.join(OBJECTS_DIR);
        if !objects_dir.exists() {
            return Ok(objects);
        }

        for algo_entry in fs::read_dir(&objects_dir)? {
            let algo_path = algo_entry?.path();
            if !algo_path.is_dir() {
                continue;
            }
            for shard_entry in fs::read_dir(&algo_path)? {
                let shard_path = shard_entry?.path();
                if !shard_path.is_dir() {
                    continue;
                }
                for obj_entry in fs::read_dir(&shard_path)? {
                    let obj_entry = obj_entry?;
                    let metadata = obj_entry.metadata()?;
                    if !metadata.is_file() {
                        continue;
                    }
                    objects.push(StoredObject {
                        path: obj_entry.path(),
                        len: metadata.len(),
                        modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                    });
                }
            }
        }

        Ok(objects)
    }

    /// Write an object atomically using tempfile.
    fn write_object_atomic(
        &self,
        obj_path: &Path,
        header: &ObjectHeader,
        payload: &[u8],
    ) -> Result<()> {
        let parent = obj_path
            .parent()
            .ok_or_else(|| Error::invalid_path(obj_path, "object path has no parent"))?;
        fs::create_dir_all(parent)?;

        let mut temp_file = tempfile::NamedTempFile::new_in(parent)?;
        temp_file.write_all(&header.encode())?;
        temp_file.write_all(payload)?;
        temp_file.flush()?;

        // A concurrent writer of the same content may win the rename; both
        // files hold identical bytes.
        temp_file.persist(obj_path)?;
        Ok(())
    }
}

#[derive(Debug)]
struct StoredObject {
    path: PathBuf,
    len: u64,
    modified: SystemTime,
}
