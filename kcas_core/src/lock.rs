//! Baseline snapshots of tracked files.
//!
//! A [`LockFile`] maps every tracked path to its content hash, plus VCS
//! metadata and reverse-dependency maps. It is a value: [`LockManager::update`]
//! replaces the persisted file atomically and never edits it in place.

use crate::content_id::ContentId;
use crate::engine::CasEngine;
use crate::error::{Error, Result};
use crate::hash::Algorithm;
use crate::layout::{FileKind, ProjectLayout, TrackedFile};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Current lock file format version.
pub const LOCK_FILE_VERSION: u32 = 1;

/// Persisted baseline snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockFile {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub vcs: VcsInfo,
    pub files: BTreeMap<String, FileEntry>,
    #[serde(default)]
    pub dependencies: Dependencies,
}

impl LockFile {
    /// Recorded dependents of `path`, empty when there are none.
    pub fn dependents_of(&self, path: &str) -> &[String] {
        self.dependencies
            .templates
            .get(path)
            .or_else(|| self.dependencies.rules.get(path))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Version control state at snapshot time. Unknown fields are `null`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VcsInfo {
    pub commit: Option<String>,
    pub branch: Option<String>,
    pub dirty: Option<bool>,
}

/// Hash record of one tracked file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    /// Hex digest.
    pub hash: String,
    pub algorithm: Algorithm,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<ContentId>,
}

/// Reverse dependencies: file to the tracked files that depend on it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependencies {
    #[serde(default)]
    pub templates: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub rules: BTreeMap<String, Vec<String>>,
}

/// Size and modification time of a persisted lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockFileStats {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: DateTime<Utc>,
}

/// Source of VCS metadata. Implementations degrade to `null` fields rather
/// than fail.
pub trait VcsProvider: Send + Sync {
    fn info(&self, root: &Path) -> VcsInfo;
}

/// Reads commit and branch straight from a `.git` directory.
///
/// `dirty` is always `None`: answering it requires walking the index.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitDirectory;

impl VcsProvider for GitDirectory {
    fn info(&self, root: &Path) -> VcsInfo {
        let Some(git_dir) = root
            .ancestors()
            .map(|dir| dir.join(".git"))
            .find(|dir| dir.is_dir())
        else {
            debug!(root = %root.display(), "no git directory");
            return VcsInfo::default();
        };

        let head = match fs::read_to_string(git_dir.join("HEAD")) {
            Ok(head) => head,
            Err(e) => {
                warn!(error = %e, "unreadable git HEAD");
                return VcsInfo::default();
            }
        };

        match head.trim().strip_prefix("ref:") {
            Some(reference) => {
                let reference = reference.trim();
                VcsInfo {
                    commit: resolve_ref(&git_dir, reference),
                    branch: Some(
                        reference
                            .strip_prefix("refs/heads/")
                            .unwrap_or(reference)
                            .to_string(),
                    ),
                    dirty: None,
                }
            }
            // Detached HEAD
            None => VcsInfo {
                commit: Some(head.trim().to_string()),
                branch: None,
                dirty: None,
            },
        }
    }
}

fn resolve_ref(git_dir: &Path, reference: &str) -> Option<String> {
    if let Ok(commit) = fs::read_to_string(git_dir.join(reference)) {
        return Some(commit.trim().to_string());
    }

    let packed = fs::read_to_string(git_dir.join("packed-refs")).ok()?;
    packed
        .lines()
        .filter(|line| !line.starts_with('#') && !line.starts_with('^'))
        .find_map(|line| {
            let (commit, name) = line.split_once(' ')?;
            (name.trim() == reference).then(|| commit.to_string())
        })
}

/// Generates, persists and loads lock files for a project.
pub struct LockManager<'a> {
    engine: &'a CasEngine,
    layout: &'a ProjectLayout,
    vcs: Box<dyn VcsProvider>,
}

impl<'a> LockManager<'a> {
    /// Manager reading VCS metadata from `.git`.
    pub fn new(engine: &'a CasEngine, layout: &'a ProjectLayout) -> Self {
        Self {
            engine,
            layout,
            vcs: Box::new(GitDirectory),
        }
    }

    /// Replace the VCS metadata source.
    pub fn with_vcs(mut self, vcs: impl VcsProvider + 'static) -> Self {
        self.vcs = Box::new(vcs);
        self
    }

    pub fn layout(&self) -> &ProjectLayout {
        self.layout
    }

    /// Snapshot every tracked file.
    ///
    /// Each file's content is also stored in the engine, so with a
    /// persistent tier the baseline bytes stay retrievable by CID. Paths
    /// that cannot be tracked are left out with a warning.
    pub fn generate(&self) -> Result<LockFile> {
        let discovery = self.layout.tracked_files()?;
        for failure in &discovery.failures {
            warn!(path = %failure.path, reason = %failure.reason, "not recorded in baseline");
        }
        let tracked = discovery.files;
        let mut files = BTreeMap::new();
        let mut texts = Vec::with_capacity(tracked.len());

        for file in &tracked {
            let content = Bytes::from(fs::read(&file.absolute)?);
            let outcome = self.engine.store(content.clone())?;
            files.insert(
                file.path.clone(),
                FileEntry {
                    hash: outcome.cid.digest_hex(),
                    algorithm: outcome.cid.algorithm(),
                    size_bytes: content.len() as u64,
                    cid: Some(outcome.cid),
                },
            );
            texts.push(String::from_utf8_lossy(&content).into_owned());
        }

        let dependencies = extract_dependencies(self.layout, &tracked, &texts)?;
        let lock = LockFile {
            version: LOCK_FILE_VERSION,
            created_at: Utc::now(),
            vcs: self.vcs.info(&self.layout.root),
            files,
            dependencies,
        };

        info!(
            files = lock.files.len(),
            commit = lock.vcs.commit.as_deref().unwrap_or("-"),
            "lock file generated"
        );
        Ok(lock)
    }

    /// Persist `lock`, atomically replacing any previous lock file.
    pub fn update(&self, lock: &LockFile) -> Result<PathBuf> {
        let path = self.layout.lock_path();
        let parent = path
            .parent()
            .ok_or_else(|| Error::invalid_path(&path, "lock file path has no parent"))?;
        fs::create_dir_all(parent)?;

        let mut json = serde_json::to_vec_pretty(lock)?;
        json.push(b'\n');

        let mut temp_file = tempfile::NamedTempFile::new_in(parent)?;
        temp_file.write_all(&json)?;
        temp_file.as_file().sync_all()?;
        temp_file.persist(&path)?;

        info!(path = %path.display(), files = lock.files.len(), "lock file written");
        Ok(path)
    }

    /// Load the persisted lock file. `None` when there is none.
    pub fn load(&self) -> Result<Option<LockFile>> {
        let path = self.layout.lock_path();
        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let lock: LockFile = serde_json::from_slice(&content)
            .map_err(|e| Error::corrupt_lock_file(&path, e.to_string()))?;
        if lock.version != LOCK_FILE_VERSION {
            return Err(Error::corrupt_lock_file(
                &path,
                format!("unsupported version {}", lock.version),
            ));
        }
        Ok(Some(lock))
    }

    /// Stats of this project's lock file.
    pub fn stats(&self) -> Result<Option<LockFileStats>> {
        Self::get_config_stats(&self.layout.lock_path())
    }

    /// Size and modification time of the lock file at `path`, or `None`
    /// if it does not exist.
    pub fn get_config_stats(path: &Path) -> Result<Option<LockFileStats>> {
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Ok(Some(LockFileStats {
            path: path.to_path_buf(),
            size_bytes: metadata.len(),
            modified: DateTime::<Utc>::from(metadata.modified()?),
        }))
    }
}

/// `{% include "x" %}` and friends; group 1 is the referenced template.
const INCLUDE_PATTERN: &str = r#"\{%-?\s*(?:include|extends|import|from)\s+["']([^"']+)["']"#;

fn include_regex() -> Result<&'static Regex> {
    static INCLUDE_RE: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    INCLUDE_RE
        .get_or_init(|| Regex::new(INCLUDE_PATTERN))
        .as_ref()
        .map_err(|e| e.clone().into())
}

/// Build reverse-dependency maps.
///
/// Templates depend on the templates they include, extend or import. Any
/// tracked file that mentions a rule's file name depends on that rule.
fn extract_dependencies(
    layout: &ProjectLayout,
    tracked: &[TrackedFile],
    texts: &[String],
) -> Result<Dependencies> {
    let include = include_regex()?;
    let templates: Vec<&str> = tracked
        .iter()
        .filter(|f| f.kind == FileKind::Template)
        .map(|f| f.path.as_str())
        .collect();

    let mut template_deps: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut rule_deps: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for (file, text) in tracked.iter().zip(texts) {
        if file.kind == FileKind::Template {
            for capture in include.captures_iter(text) {
                let reference = &capture[1];
                if let Some(target) = resolve_template(layout, &templates, &file.path, reference)
                    && target != file.path
                {
                    template_deps
                        .entry(target)
                        .or_default()
                        .insert(file.path.clone());
                }
            }
        }
    }

    for rule in tracked.iter().filter(|f| f.kind == FileKind::Rule) {
        let Some(name) = rule.path.rsplit('/').next() else {
            continue;
        };
        for (file, text) in tracked.iter().zip(texts) {
            if file.path != rule.path && text.contains(name) {
                rule_deps
                    .entry(rule.path.clone())
                    .or_default()
                    .insert(file.path.clone());
            }
        }
    }

    Ok(Dependencies {
        templates: into_lists(template_deps),
        rules: into_lists(rule_deps),
    })
}

fn resolve_template(
    layout: &ProjectLayout,
    templates: &[&str],
    including: &str,
    reference: &str,
) -> Option<String> {
    let templates_dir = layout.templates_dir.to_string_lossy().replace('\\', "/");
    let sibling = match including.rsplit_once('/') {
        Some((dir, _)) => format!("{}/{}", dir, reference),
        None => reference.to_string(),
    };
    let candidates = [format!("{}/{}", templates_dir, reference), sibling];

    candidates
        .iter()
        .find(|c| templates.contains(&c.as_str()))
        .cloned()
        .or_else(|| {
            let suffix = format!("/{}", reference);
            templates
                .iter()
                .find(|t| **t == reference || t.ends_with(&suffix))
                .map(|t| t.to_string())
        })
}

fn into_lists(map: BTreeMap<String, BTreeSet<String>>) -> BTreeMap<String, Vec<String>> {
    map.into_iter()
        .filter(|(_, dependents)| !dependents.is_empty())
        .map(|(path, dependents)| (path, dependents.into_iter().collect()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn project() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(root, "templates/base.njk", "<html>{% block body %}{% endblock %}</html>");
        write(
            root,
            "templates/page.njk",
            "{% extends \"base.njk\" %}{% include 'partials/nav.njk' %}",
        );
        write(root, "templates/partials/nav.njk", "<nav/>");
        write(root, "rules/shapes.ttl", "@prefix ex: <http://example.org/> .");
        write(root, "kgen.config.json", r#"{"rules": "rules/shapes.ttl"}"#);
        temp_dir
    }

    #[test]
    fn test_generate() {
        let temp_dir = project();
        let engine = CasEngine::new(EngineConfig::default()).unwrap();
        let layout = ProjectLayout::new(temp_dir.path());
        let lock = LockManager::new(&engine, &layout).generate().unwrap();

        assert_eq!(lock.version, LOCK_FILE_VERSION);
        assert_eq!(lock.files.len(), 5);
        let entry = &lock.files["templates/partials/nav.njk"];
        assert_eq!(entry.algorithm, Algorithm::Sha256);
        assert_eq!(entry.size_bytes, 6);
        assert_eq!(entry.hash, engine.calculate_hash(b"<nav/>", Algorithm::Sha256));
        assert_eq!(engine.len(), 5);

        assert_eq!(lock.dependents_of("templates/base.njk"), ["templates/page.njk"]);
        assert_eq!(
            lock.dependents_of("templates/partials/nav.njk"),
            ["templates/page.njk"]
        );
        assert_eq!(lock.dependents_of("rules/shapes.ttl"), ["kgen.config.json"]);
        assert!(lock.dependents_of("templates/page.njk").is_empty());
    }

    #[test]
    fn test_include_pattern() {
        let include = include_regex().unwrap();
        let text = r#"{% extends "base.njk" %}{%- include 'partials/nav.njk' %}{{ x }}"#;
        let found: Vec<&str> = include
            .captures_iter(text)
            .map(|c| c.get(1).unwrap().as_str())
            .collect();
        assert_eq!(found, vec!["base.njk", "partials/nav.njk"]);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_untrackable_path_left_out() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let root = project();
        fs::write(
            root.path().join("templates").join(OsStr::from_bytes(b"bad\xff.njk")),
            "bad",
        )
        .unwrap();

        let engine = CasEngine::new(EngineConfig::default()).unwrap();
        let layout = ProjectLayout::new(root.path());
        let lock = LockManager::new(&engine, &layout).generate().unwrap();
        assert!(lock.files.contains_key("templates/page.njk"));
        assert!(!lock.files.keys().any(|path| path.contains("bad")));
    }

    #[test]
    fn test_vcs_absent_is_null() {
        let temp_dir = project();
        let info = GitDirectory.info(temp_dir.path());
        assert_eq!(info, VcsInfo::default());
    }

    #[test]
    fn test_git_directory() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(root, ".git/HEAD", "ref: refs/heads/main\n");
        write(root, ".git/refs/heads/main", "abc123\n");
        let info = GitDirectory.info(root);
        assert_eq!(info.branch.as_deref(), Some("main"));
        assert_eq!(info.commit.as_deref(), Some("abc123"));
        assert_eq!(info.dirty, None);

        fs::remove_file(root.join(".git/refs/heads/main")).unwrap();
        write(root, ".git/packed-refs", "# pack-refs\ndef456 refs/heads/main\n");
        assert_eq!(GitDirectory.info(root).commit.as_deref(), Some("def456"));

        write(root, ".git/HEAD", "0123abcd\n");
        let detached = GitDirectory.info(root);
        assert_eq!(detached.commit.as_deref(), Some("0123abcd"));
        assert!(detached.branch.is_none());
    }

    #[test]
    fn test_update_and_load() {
        let temp_dir = project();
        let engine = CasEngine::new(EngineConfig::default()).unwrap();
        let layout = ProjectLayout::new(temp_dir.path());
        let manager = LockManager::new(&engine, &layout);

        assert!(manager.load().unwrap().is_none());
        assert!(manager.stats().unwrap().is_none());

        let lock = manager.generate().unwrap();
        let path = manager.update(&lock).unwrap();
        assert_eq!(path, layout.lock_path());
        assert_eq!(manager.load().unwrap(), Some(lock.clone()));

        let stats = manager.stats().unwrap().unwrap();
        assert_eq!(stats.size_bytes, fs::metadata(&path).unwrap().len());

        let json: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(json["version"], 1);
        assert!(json["createdAt"].is_string());
        assert!(json["vcs"]["commit"].is_null());
        assert_eq!(json["files"]["rules/shapes.ttl"]["algorithm"], "sha256");
        assert!(json["files"]["rules/shapes.ttl"]["sizeBytes"].is_number());
        assert!(json["dependencies"]["templates"].is_object());

        // No temp files left behind
        let leftovers = fs::read_dir(temp_dir.path())
            .unwrap()
            .filter(|e| {
                let name = e.as_ref().unwrap().file_name();
                name.to_string_lossy().starts_with(".tmp")
            })
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_update_replaces_previous() {
        let temp_dir = project();
        let engine = CasEngine::new(EngineConfig::default()).unwrap();
        let layout = ProjectLayout::new(temp_dir.path());
        let manager = LockManager::new(&engine, &layout);

        let first = manager.generate().unwrap();
        manager.update(&first).unwrap();
        write(temp_dir.path(), "templates/new.njk", "new");
        let second = manager.generate().unwrap();
        manager.update(&second).unwrap();

        let loaded = manager.load().unwrap().unwrap();
        assert_eq!(loaded.files.len(), 6);
        assert_eq!(first.files.len(), 5);
    }

    #[test]
    fn test_corrupt_lock_file() {
        let temp_dir = TempDir::new().unwrap();
        let engine = CasEngine::new(EngineConfig::default()).unwrap();
        let layout = ProjectLayout::new(temp_dir.path());
        let manager = LockManager::new(&engine, &layout);

        fs::write(layout.lock_path(), "{ not json").unwrap();
        assert!(matches!(manager.load(), Err(Error::CorruptLockFile { .. })));

        fs::write(
            layout.lock_path(),
            r#"{"version":7,"createdAt":"2024-01-01T00:00:00Z","vcs":{"commit":null,"branch":null,"dirty":null},"files":{}}"#,
        )
        .unwrap();
        assert!(matches!(manager.load(), Err(Error::CorruptLockFile { .. })));
    }

    #[test]
    fn test_custom_vcs_provider() {
        struct Fixed;
        impl VcsProvider for Fixed {
            fn info(&self, _root: &Path) -> VcsInfo {
                VcsInfo {
                    commit: Some("feedface".to_string()),
                    branch: Some("release".to_string()),
                    dirty: Some(true),
                }
            }
        }

        let temp_dir = project();
        let engine = CasEngine::new(EngineConfig::default()).unwrap();
        let layout = ProjectLayout::new(temp_dir.path());
        let lock = LockManager::new(&engine, &layout)
            .with_vcs(Fixed)
            .generate()
            .unwrap();
        assert_eq!(lock.vcs.dirty, Some(true));
        assert_eq!(lock.vcs.branch.as_deref(), Some("release"));
    }
}
