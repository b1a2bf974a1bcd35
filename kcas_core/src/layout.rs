//! Project layout: which files are tracked and how they are classified.

use crate::error::{Error, Result};
use crate::semantic::is_rdf_path;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::warn;

/// File extensions recognized as templates outside the templates directory.
pub const TEMPLATE_EXTENSIONS: &[&str] = &["njk", "j2", "jinja", "tera", "hbs"];

/// Role of a tracked file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Template,
    Rule,
    Config,
}

/// A file discovered by [`ProjectLayout::tracked_files`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedFile {
    /// Path relative to the project root, `/`-separated.
    pub path: String,
    pub absolute: PathBuf,
    pub kind: FileKind,
}

/// A path seen during discovery that cannot be tracked, such as a name that
/// is not valid UTF-8 or a directory that cannot be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryFailure {
    /// Root-relative path, lossily converted for display.
    pub path: String,
    pub absolute: PathBuf,
    /// Kind implied by where the path was found.
    pub kind: FileKind,
    pub reason: String,
}

/// Outcome of [`ProjectLayout::tracked_files`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovery {
    /// Trackable files, sorted by path.
    pub files: Vec<TrackedFile>,
    pub failures: Vec<DiscoveryFailure>,
}

/// Locations of templates, rules, configuration, generated output and the
/// lock file, relative to `root`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectLayout {
    pub root: PathBuf,
    pub templates_dir: PathBuf,
    pub rules_dir: PathBuf,
    pub output_dir: PathBuf,
    pub config_files: Vec<String>,
    pub lock_file: PathBuf,
}

impl Default for ProjectLayout {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            templates_dir: PathBuf::from("templates"),
            rules_dir: PathBuf::from("rules"),
            output_dir: PathBuf::from("generated"),
            config_files: vec![
                "kgen.config.json".to_string(),
                "kgen.config.toml".to_string(),
                "kgen.config.js".to_string(),
            ],
            lock_file: PathBuf::from("kgen.lock.json"),
        }
    }
}

impl ProjectLayout {
    /// Default layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Absolute location of the lock file.
    pub fn lock_path(&self) -> PathBuf {
        self.root.join(&self.lock_file)
    }

    /// Absolute location of the output directory.
    pub fn output_path(&self) -> PathBuf {
        self.root.join(&self.output_dir)
    }

    /// Absolute location of a root-relative `/`-separated path.
    pub fn absolute(&self, relative: &str) -> PathBuf {
        relative
            .split('/')
            .fold(self.root.clone(), |path, part| path.join(part))
    }

    /// Root-relative, `/`-separated form of `path`.
    pub fn relative(&self, path: &Path) -> Result<String> {
        let stripped = path
            .strip_prefix(&self.root)
            .map_err(|_| Error::invalid_path(path, "outside of project root"))?;
        to_slash(stripped)
    }

    /// Classify a root-relative path.
    ///
    /// Named config files first, then the templates and rules directories,
    /// then template and RDF extensions. Anything else is configuration.
    /// The same path always gets the same kind, whether it was added,
    /// modified or removed.
    pub fn classify(&self, relative: &str) -> FileKind {
        let path = Path::new(relative);
        if self.config_files.iter().any(|name| Path::new(name) == path) {
            FileKind::Config
        } else if path.starts_with(&self.templates_dir) {
            FileKind::Template
        } else if path.starts_with(&self.rules_dir) {
            FileKind::Rule
        } else if has_extension(path, TEMPLATE_EXTENSIONS) {
            FileKind::Template
        } else if is_rdf_path(path) {
            FileKind::Rule
        } else {
            FileKind::Config
        }
    }

    /// Every tracked file, sorted by path, plus the paths that could not be
    /// tracked.
    ///
    /// Walks the templates and rules directories (honoring `.gitignore`),
    /// the named config files and root-level RDF graphs. Missing
    /// directories contribute nothing. Only an unreadable project root is
    /// an error.
    pub fn tracked_files(&self) -> Result<Discovery> {
        let mut discovery = Discovery::default();
        let mut found: BTreeMap<String, TrackedFile> = BTreeMap::new();

        for (dir, kind) in [
            (&self.templates_dir, FileKind::Template),
            (&self.rules_dir, FileKind::Rule),
        ] {
            let walk = walk_files(&self.root.join(dir));
            for absolute in walk.files {
                self.track(absolute, kind, &mut found, &mut discovery);
            }
            for (absolute, e) in walk.failures {
                discovery.failures.push(self.failure(absolute, kind, &e));
            }
        }

        for name in &self.config_files {
            let absolute = self.root.join(name);
            if absolute.is_file() {
                self.track(absolute, FileKind::Config, &mut found, &mut discovery);
            }
        }

        if self.root.is_dir() {
            for entry in fs::read_dir(&self.root)? {
                match entry {
                    Ok(entry) => {
                        let absolute = entry.path();
                        if absolute.is_file() && is_rdf_path(&absolute) {
                            self.track(absolute, FileKind::Rule, &mut found, &mut discovery);
                        }
                    }
                    Err(e) => {
                        let failure = self.failure(self.root.clone(), FileKind::Rule, &e.into());
                        discovery.failures.push(failure);
                    }
                }
            }
        }

        discovery.files = found.into_values().collect();
        discovery.failures.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(discovery)
    }

    /// First sighting of a path wins.
    fn track(
        &self,
        absolute: PathBuf,
        found_in: FileKind,
        found: &mut BTreeMap<String, TrackedFile>,
        discovery: &mut Discovery,
    ) {
        match self.relative(&absolute) {
            Ok(path) => {
                found.entry(path.clone()).or_insert(TrackedFile {
                    kind: self.classify(&path),
                    path,
                    absolute,
                });
            }
            Err(e) => discovery.failures.push(self.failure(absolute, found_in, &e)),
        }
    }

    fn failure(&self, absolute: PathBuf, kind: FileKind, error: &Error) -> DiscoveryFailure {
        let path = absolute
            .strip_prefix(&self.root)
            .unwrap_or(&absolute)
            .to_string_lossy()
            .replace('\\', "/");
        DiscoveryFailure {
            path,
            absolute,
            kind,
            reason: error.to_string(),
        }
    }

    /// Files under the output directory, relative to it. A missing output
    /// directory yields an empty list; unrepresentable paths are skipped.
    pub fn output_files(&self) -> Result<Vec<String>> {
        let output = self.output_path();
        let walk = walk_files(&output);
        for (path, e) in &walk.failures {
            warn!(path = %path.display(), error = %e, "skipping output path");
        }

        let mut files = Vec::with_capacity(walk.files.len());
        for path in walk.files {
            let stripped = path
                .strip_prefix(&output)
                .map_err(|_| Error::invalid_path(&path, "outside of output directory"))?;
            match to_slash(stripped) {
                Ok(relative) => files.push(relative),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping output path"),
            }
        }
        files.sort();
        Ok(files)
    }
}

#[derive(Debug, Default)]
struct Walk {
    files: Vec<PathBuf>,
    failures: Vec<(PathBuf, Error)>,
}

/// Regular files under `dir`, recursively, respecting `.gitignore`.
///
/// Dotfiles are skipped unless they carry a template or RDF extension.
/// Entries the walker cannot read are returned as failures next to `dir`'s
/// readable files.
fn walk_files(dir: &Path) -> Walk {
    let mut walk = Walk::default();
    if !dir.is_dir() {
        return walk;
    }

    let walker = ignore::WalkBuilder::new(dir)
        .hidden(false)
        .git_ignore(true)
        .require_git(false)
        .build();

    for entry in walker {
        match entry {
            Ok(entry) => {
                if entry.file_type().is_some_and(|t| t.is_file()) && !is_ignored_dotfile(entry.path())
                {
                    walk.files.push(entry.into_path());
                }
            }
            Err(e) => {
                let path = walk_error_path(&e).unwrap_or(dir).to_path_buf();
                walk.failures.push((path, e.into()));
            }
        }
    }
    walk
}

fn is_ignored_dotfile(path: &Path) -> bool {
    let dotted = path
        .file_name()
        .is_some_and(|name| name.as_encoded_bytes().starts_with(b"."));
    dotted && !has_extension(path, TEMPLATE_EXTENSIONS) && !is_rdf_path(path)
}

fn walk_error_path(error: &ignore::Error) -> Option<&Path> {
    match error {
        ignore::Error::WithPath { path, .. } => Some(path.as_path()),
        ignore::Error::WithDepth { err, .. } | ignore::Error::WithLineNumber { err, .. } => {
            walk_error_path(err)
        }
        ignore::Error::Loop { child, .. } => Some(child.as_path()),
        _ => None,
    }
}

fn to_slash(path: &Path) -> Result<String> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(
                part.to_str()
                    .ok_or_else(|| Error::invalid_path(path, "path is not valid UTF-8"))?,
            ),
            Component::CurDir => {}
            _ => return Err(Error::invalid_path(path, "unexpected path component")),
        }
    }
    Ok(parts.join("/"))
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_classify() {
        let layout = ProjectLayout::default();
        assert_eq!(layout.classify("templates/page.njk"), FileKind::Template);
        assert_eq!(layout.classify("templates/readme.md"), FileKind::Template);
        assert_eq!(layout.classify("other/x.j2"), FileKind::Template);
        assert_eq!(layout.classify("rules/shapes.ttl"), FileKind::Rule);
        assert_eq!(layout.classify("data.ttl"), FileKind::Rule);
        assert_eq!(layout.classify("kgen.config.json"), FileKind::Config);
        // Directory beats extension
        assert_eq!(layout.classify("rules/x.njk"), FileKind::Rule);
        assert_eq!(layout.classify("templates/x.ttl"), FileKind::Template);
    }

    #[test]
    fn test_tracked_files() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(root, "templates/base.njk", "base");
        write(root, "templates/partials/header.njk", "header");
        write(root, "rules/ontology.ttl", "@prefix ex: <http://example.org/> .");
        write(root, "kgen.config.json", "{}");
        write(root, "data.ttl", "original content");
        write(root, "notes.txt", "untracked");
        write(root, "generated/out.html", "output");

        let layout = ProjectLayout::new(root);
        let discovery = layout.tracked_files().unwrap();
        assert!(discovery.failures.is_empty());
        let tracked = discovery.files;
        let paths: Vec<&str> = tracked.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "data.ttl",
                "kgen.config.json",
                "rules/ontology.ttl",
                "templates/base.njk",
                "templates/partials/header.njk",
            ]
        );
        assert_eq!(tracked[0].kind, FileKind::Rule);
        assert_eq!(tracked[1].kind, FileKind::Config);
        assert_eq!(tracked[3].kind, FileKind::Template);
        assert_eq!(tracked[4].absolute, layout.absolute("templates/partials/header.njk"));
    }

    #[test]
    fn test_gitignore_respected() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(root, "templates/.gitignore", "*.bak\n");
        write(root, "templates/page.njk", "page");
        write(root, "templates/page.njk.bak", "old");

        let tracked = ProjectLayout::new(root).tracked_files().unwrap().files;
        assert!(tracked.iter().any(|f| f.path == "templates/page.njk"));
        assert!(!tracked.iter().any(|f| f.path.ends_with(".bak")));
    }

    #[test]
    fn test_dotfiles_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(root, "templates/.gitignore", "");
        write(root, "templates/.DS_Store", "");
        write(root, "templates/.hidden.njk", "kept");
        write(root, "rules/.shapes.ttl", "kept");

        let tracked = ProjectLayout::new(root).tracked_files().unwrap().files;
        let paths: Vec<&str> = tracked.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["rules/.shapes.ttl", "templates/.hidden.njk"]);
    }

    #[test]
    fn test_rule_directory_kind_wins() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "rules/x.njk", "x");
        let tracked = ProjectLayout::new(temp_dir.path()).tracked_files().unwrap().files;
        assert_eq!(tracked[0].kind, FileKind::Rule);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_non_utf8_name_is_a_failure() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(root, "templates/good.njk", "good");
        fs::write(
            root.join("templates").join(OsStr::from_bytes(b"bad\xff.njk")),
            "bad",
        )
        .unwrap();

        let discovery = ProjectLayout::new(root).tracked_files().unwrap();
        assert_eq!(discovery.files.len(), 1);
        assert_eq!(discovery.files[0].path, "templates/good.njk");
        assert_eq!(discovery.failures.len(), 1);
        let failure = &discovery.failures[0];
        assert_eq!(failure.kind, FileKind::Template);
        assert!(failure.path.starts_with("templates/bad"));
        assert!(failure.reason.contains("UTF-8"));
    }

    #[test]
    fn test_missing_directories() {
        let temp_dir = TempDir::new().unwrap();
        let layout = ProjectLayout::new(temp_dir.path());
        assert_eq!(layout.tracked_files().unwrap(), Discovery::default());
        assert!(layout.output_files().unwrap().is_empty());
    }

    #[test]
    fn test_output_files() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(root, "generated/a.html", "a");
        write(root, "generated/nested/b.ts", "b");
        let files = ProjectLayout::new(root).output_files().unwrap();
        assert_eq!(files, vec!["a.html", "nested/b.ts"]);
    }
}
