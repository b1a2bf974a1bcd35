//! Drift detection against a lock file baseline.
//!
//! One [`DriftDetector::detect`] call loads the baseline, re-hashes every
//! tracked file, classifies each difference and ranks it by severity. A
//! failure on one file becomes a `critical` entry for that file; the rest of
//! the scan continues.

use crate::cancel::CancelToken;
use crate::engine::CasEngine;
use crate::error::{Error, Result};
use crate::layout::{FileKind, ProjectLayout, TrackedFile};
use crate::lock::{FileEntry, LockFile, LockManager};
use crate::semantic::{RdfParser, StructureDelta, TurtleParser, is_rdf_path, looks_like_rdf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Classification of a single divergence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DriftType {
    TemplateAdded,
    TemplateRemoved,
    TemplateModified,
    RuleAdded,
    RuleRemoved,
    RuleModified,
    ConfigChanged,
    ArtifactOrphaned,
    SemanticInconsistency,
}

impl DriftType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriftType::TemplateAdded => "template-added",
            DriftType::TemplateRemoved => "template-removed",
            DriftType::TemplateModified => "template-modified",
            DriftType::RuleAdded => "rule-added",
            DriftType::RuleRemoved => "rule-removed",
            DriftType::RuleModified => "rule-modified",
            DriftType::ConfigChanged => "config-changed",
            DriftType::ArtifactOrphaned => "artifact-orphaned",
            DriftType::SemanticInconsistency => "semantic-inconsistency",
        }
    }

    fn for_change(kind: FileKind, change: FileOutcome) -> Self {
        match (kind, change) {
            (FileKind::Template, FileOutcome::Added) => DriftType::TemplateAdded,
            (FileKind::Template, FileOutcome::Removed) => DriftType::TemplateRemoved,
            (FileKind::Template, _) => DriftType::TemplateModified,
            (FileKind::Rule, FileOutcome::Added) => DriftType::RuleAdded,
            (FileKind::Rule, FileOutcome::Removed) => DriftType::RuleRemoved,
            (FileKind::Rule, _) => DriftType::RuleModified,
            (FileKind::Config, _) => DriftType::ConfigChanged,
        }
    }
}

impl fmt::Display for DriftType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity, ordered `info < warning < error < critical`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall outcome of a detection pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DriftStatus {
    NoBaseline,
    Clean,
    Drift,
}

impl DriftStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriftStatus::NoBaseline => "no-baseline",
            DriftStatus::Clean => "clean",
            DriftStatus::Drift => "drift",
        }
    }
}

impl fmt::Display for DriftStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supporting data for a [`DriftEntry`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_hash: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dependents: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic: Option<StructureDelta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

/// One classified divergence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriftEntry {
    #[serde(rename = "type")]
    pub drift_type: DriftType,
    pub file: String,
    pub severity: Severity,
    pub description: String,
    pub impact: String,
    pub details: DriftDetails,
}

/// Entry counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftSummary {
    pub total_changes: usize,
    pub by_type: BTreeMap<DriftType, usize>,
    pub by_severity: BTreeMap<Severity, usize>,
}

impl DriftSummary {
    fn of(entries: &[DriftEntry]) -> Self {
        let mut summary = DriftSummary {
            total_changes: entries.len(),
            ..Default::default()
        };
        for entry in entries {
            *summary.by_type.entry(entry.drift_type).or_default() += 1;
            *summary.by_severity.entry(entry.severity).or_default() += 1;
        }
        summary
    }
}

/// What happened to one file during a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileOutcome {
    Unchanged,
    Added,
    Removed,
    Modified,
    Failed,
}

/// Per-file scan record, shown in verbose reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAnalysis {
    pub path: String,
    pub kind: FileKind,
    pub baseline_hash: Option<String>,
    pub current_hash: Option<String>,
    pub outcome: FileOutcome,
}

/// Result of one detection pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftResult {
    pub status: DriftStatus,
    pub severity: Severity,
    pub message: String,
    pub drift: Vec<DriftEntry>,
    pub recommendations: Vec<String>,
    /// Creation time of the baseline lock file.
    pub baseline: Option<DateTime<Utc>>,
    pub last_check: DateTime<Utc>,
    pub summary: DriftSummary,
    #[serde(skip)]
    pub analysis: Vec<FileAnalysis>,
}

/// Tuning for [`DriftDetector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftOptions {
    /// Triple count change above which a rule edit is high impact.
    pub triple_delta_threshold: usize,
    /// Run RDF structure comparison on rule files.
    pub semantic: bool,
    /// Flag output files without a template.
    pub detect_orphans: bool,
}

impl Default for DriftOptions {
    fn default() -> Self {
        Self {
            triple_delta_threshold: 100,
            semantic: true,
            detect_orphans: true,
        }
    }
}

/// Compares the current project state against its lock file.
pub struct DriftDetector<'a> {
    engine: &'a CasEngine,
    layout: &'a ProjectLayout,
    options: DriftOptions,
    parser: Option<Box<dyn RdfParser>>,
}

#[derive(Default)]
struct Scan {
    entries: Vec<DriftEntry>,
    analysis: Vec<FileAnalysis>,
}

impl<'a> DriftDetector<'a> {
    /// Detector with default options and the built-in Turtle parser.
    pub fn new(engine: &'a CasEngine, layout: &'a ProjectLayout) -> Self {
        Self {
            engine,
            layout,
            options: DriftOptions::default(),
            parser: Some(Box::new(TurtleParser)),
        }
    }

    pub fn with_options(mut self, options: DriftOptions) -> Self {
        self.options = options;
        self
    }

    /// Use a different RDF parser for semantic comparison.
    pub fn with_rdf_parser(mut self, parser: impl RdfParser + 'static) -> Self {
        self.parser = Some(Box::new(parser));
        self
    }

    /// Compare by hash only.
    pub fn without_semantics(mut self) -> Self {
        self.parser = None;
        self
    }

    /// Run a detection pass.
    pub fn detect(&self) -> Result<DriftResult> {
        self.run(None)
    }

    /// Run a detection pass, checking `cancel` between files.
    pub fn detect_with_cancel(&self, cancel: &CancelToken) -> Result<DriftResult> {
        self.run(Some(cancel))
    }

    fn run(&self, cancel: Option<&CancelToken>) -> Result<DriftResult> {
        let Some(baseline) = LockManager::new(self.engine, self.layout).load()? else {
            info!(lock = %self.layout.lock_path().display(), "no baseline lock file");
            return Ok(no_baseline());
        };

        let discovery = self.layout.tracked_files()?;
        let tracked = &discovery.files;
        let current: BTreeSet<&str> = tracked
            .iter()
            .map(|f| f.path.as_str())
            .chain(discovery.failures.iter().map(|f| f.path.as_str()))
            .collect();
        let mut scan = Scan::default();

        for file in tracked {
            check(cancel)?;
            match baseline.files.get(&file.path) {
                Some(entry) => self.examine_modified(file, entry, &baseline, &mut scan),
                None => self.examine_added(file, &mut scan),
            }
        }

        for failure in &discovery.failures {
            check(cancel)?;
            let file = TrackedFile {
                path: failure.path.clone(),
                absolute: failure.absolute.clone(),
                kind: failure.kind,
            };
            let entry = baseline.files.get(&failure.path);
            self.record_failure(&file, entry, &failure.reason, &mut scan);
        }

        let mut removed_templates = BTreeSet::new();
        for (path, entry) in &baseline.files {
            if current.contains(path.as_str()) {
                continue;
            }
            check(cancel)?;
            let kind = self.layout.classify(path);
            if kind == FileKind::Template {
                removed_templates.insert(stem(path).to_string());
            }
            self.record_removed(path, kind, entry, &baseline, &mut scan);
        }

        if self.options.detect_orphans {
            check(cancel)?;
            self.detect_orphans(tracked, &removed_templates, &mut scan);
        }

        Ok(finish(scan, &baseline))
    }

    fn examine_modified(
        &self,
        file: &TrackedFile,
        entry: &FileEntry,
        baseline: &LockFile,
        scan: &mut Scan,
    ) {
        let content = match fs::read(&file.absolute) {
            Ok(content) => content,
            Err(e) => return self.record_failure(file, Some(entry), &e.to_string(), scan),
        };

        let current_hash = self.engine.digest(&content, entry.algorithm).to_hex();
        let unchanged = current_hash.eq_ignore_ascii_case(&entry.hash);
        scan.analysis.push(FileAnalysis {
            path: file.path.clone(),
            kind: file.kind,
            baseline_hash: Some(entry.hash.clone()),
            current_hash: Some(current_hash.clone()),
            outcome: if unchanged {
                FileOutcome::Unchanged
            } else {
                FileOutcome::Modified
            },
        });
        if unchanged {
            return;
        }

        let dependents = baseline.dependents_of(&file.path).to_vec();
        let mut drift = DriftEntry {
            drift_type: DriftType::for_change(file.kind, FileOutcome::Modified),
            file: file.path.clone(),
            severity: Severity::Warning,
            description: format!("{} content changed since baseline", describe(file.kind)),
            impact: impact_of(&dependents),
            details: DriftDetails {
                baseline_hash: Some(entry.hash.clone()),
                current_hash: Some(current_hash),
                dependents,
                ..Default::default()
            },
        };

        if file.kind == FileKind::Rule
            && let Some(text) = self.semantic_candidate(&file.absolute, &content)
        {
            self.compare_semantics(text, entry, &mut drift, scan);
        }

        debug!(file = %drift.file, severity = %drift.severity, "modified");
        scan.entries.push(drift);
    }

    fn examine_added(&self, file: &TrackedFile, scan: &mut Scan) {
        let content = match fs::read(&file.absolute) {
            Ok(content) => content,
            Err(e) => return self.record_failure(file, None, &e.to_string(), scan),
        };

        let current_hash = self
            .engine
            .digest(&content, self.engine.config().algorithm)
            .to_hex();
        scan.analysis.push(FileAnalysis {
            path: file.path.clone(),
            kind: file.kind,
            baseline_hash: None,
            current_hash: Some(current_hash.clone()),
            outcome: FileOutcome::Added,
        });

        scan.entries.push(DriftEntry {
            drift_type: DriftType::for_change(file.kind, FileOutcome::Added),
            file: file.path.clone(),
            severity: Severity::Info,
            description: format!("{} added since baseline", describe(file.kind)),
            impact: "New file not present in baseline".to_string(),
            details: DriftDetails {
                current_hash: Some(current_hash),
                ..Default::default()
            },
        });

        if file.kind == FileKind::Rule
            && let Some(text) = self.semantic_candidate(&file.absolute, &content)
            && let Some(parser) = &self.parser
            && let Err(e) = parser.parse(text)
        {
            scan.entries.push(inconsistency(&file.path, &e));
        }
    }

    fn record_removed(
        &self,
        path: &str,
        kind: FileKind,
        entry: &FileEntry,
        baseline: &LockFile,
        scan: &mut Scan,
    ) {
        let dependents = baseline.dependents_of(path).to_vec();
        let severity = match kind {
            FileKind::Config => Severity::Error,
            _ if dependents.is_empty() => Severity::Warning,
            _ => Severity::Error,
        };

        scan.analysis.push(FileAnalysis {
            path: path.to_string(),
            kind,
            baseline_hash: Some(entry.hash.clone()),
            current_hash: None,
            outcome: FileOutcome::Removed,
        });
        scan.entries.push(DriftEntry {
            drift_type: DriftType::for_change(kind, FileOutcome::Removed),
            file: path.to_string(),
            severity,
            description: format!("{} removed since baseline", describe(kind)),
            impact: impact_of(&dependents),
            details: DriftDetails {
                baseline_hash: Some(entry.hash.clone()),
                dependents,
                ..Default::default()
            },
        });
    }

    fn record_failure(
        &self,
        file: &TrackedFile,
        entry: Option<&FileEntry>,
        error: &str,
        scan: &mut Scan,
    ) {
        warn!(file = %file.path, error, "failed to scan file");
        let change = if entry.is_some() {
            FileOutcome::Modified
        } else {
            FileOutcome::Added
        };

        scan.analysis.push(FileAnalysis {
            path: file.path.clone(),
            kind: file.kind,
            baseline_hash: entry.map(|e| e.hash.clone()),
            current_hash: None,
            outcome: FileOutcome::Failed,
        });
        scan.entries.push(DriftEntry {
            drift_type: DriftType::for_change(file.kind, change),
            file: file.path.clone(),
            severity: Severity::Critical,
            description: format!("Failed to read {}: {}", describe(file.kind).to_lowercase(), error),
            impact: "File state unknown; drift could not be assessed".to_string(),
            details: DriftDetails {
                baseline_hash: entry.map(|e| e.hash.clone()),
                error: Some(error.to_string()),
                ..Default::default()
            },
        });
    }

    /// UTF-8 text of an RDF file whose content looks like Turtle, when
    /// semantic analysis is enabled.
    fn semantic_candidate<'c>(&self, path: &Path, content: &'c [u8]) -> Option<&'c str> {
        if !self.options.semantic || self.parser.is_none() || !is_rdf_path(path) {
            return None;
        }
        std::str::from_utf8(content)
            .ok()
            .filter(|text| looks_like_rdf(text))
    }

    fn compare_semantics(
        &self,
        text: &str,
        entry: &FileEntry,
        drift: &mut DriftEntry,
        scan: &mut Scan,
    ) {
        let Some(parser) = &self.parser else {
            return;
        };

        let after = match parser.parse(text) {
            Ok(graph) => graph,
            Err(e) => {
                scan.entries.push(inconsistency(&drift.file, &e));
                return;
            }
        };

        let Some(before_text) = self.baseline_text(entry) else {
            drift
                .details
                .notes
                .push("Baseline content unavailable; semantic comparison skipped".to_string());
            return;
        };
        let before = match parser.parse(&before_text) {
            Ok(graph) => graph,
            Err(e) => {
                debug!(file = %drift.file, error = %e, "baseline does not parse as RDF");
                drift
                    .details
                    .notes
                    .push("Baseline content is not valid RDF; semantic comparison skipped".to_string());
                return;
            }
        };

        let threshold = self.options.triple_delta_threshold;
        let delta = StructureDelta::between(&before, &after);
        let notes = delta.notes(threshold);
        if delta.is_high_impact(threshold) {
            drift.severity = drift.severity.max(Severity::Error);
        }
        if !notes.is_empty() {
            drift.impact = format!("{}; {}", drift.impact, notes.join("; "));
        }
        drift.details.notes.extend(notes);
        drift.details.semantic = Some(delta);
    }

    fn baseline_text(&self, entry: &FileEntry) -> Option<String> {
        let cid = entry.cid.as_ref()?;
        match self.engine.peek(cid) {
            Ok(Some(bytes)) => String::from_utf8(bytes.to_vec()).ok(),
            Ok(None) => None,
            Err(e) => {
                warn!(%cid, error = %e, "baseline content unreadable");
                None
            }
        }
    }

    fn detect_orphans(
        &self,
        tracked: &[TrackedFile],
        removed_templates: &BTreeSet<String>,
        scan: &mut Scan,
    ) {
        let outputs = match self.layout.output_files() {
            Ok(outputs) => outputs,
            Err(e) => {
                warn!(error = %e, "output directory unreadable");
                return;
            }
        };

        let templates: BTreeSet<&str> = tracked
            .iter()
            .filter(|f| f.kind == FileKind::Template)
            .map(|f| stem(&f.path))
            .collect();

        let output_dir = self.layout.output_dir.to_string_lossy().replace('\\', "/");
        for output in outputs {
            let name = stem(&output);
            if templates.contains(name) {
                continue;
            }
            let (severity, impact) = if removed_templates.contains(name) {
                (
                    Severity::Warning,
                    "Generated from a template removed since baseline".to_string(),
                )
            } else {
                (
                    Severity::Info,
                    "No current template produces this artifact".to_string(),
                )
            };
            scan.entries.push(DriftEntry {
                drift_type: DriftType::ArtifactOrphaned,
                file: format!("{}/{}", output_dir, output),
                severity,
                description: "Generated artifact has no corresponding template".to_string(),
                impact,
                details: DriftDetails::default(),
            });
        }
    }
}

fn check(cancel: Option<&CancelToken>) -> Result<()> {
    match cancel {
        Some(token) => token.check(),
        None => Ok(()),
    }
}

/// First dot-separated segment of the file name.
fn stem(path: &str) -> &str {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.split('.').next().unwrap_or(name)
}

fn describe(kind: FileKind) -> &'static str {
    match kind {
        FileKind::Template => "Template",
        FileKind::Rule => "Rule",
        FileKind::Config => "Configuration",
    }
}

fn impact_of(dependents: &[String]) -> String {
    if dependents.is_empty() {
        "No dependent files recorded".to_string()
    } else {
        format!(
            "{} dependent file(s) may be affected: {}",
            dependents.len(),
            dependents.join(", ")
        )
    }
}

fn inconsistency(path: &str, error: &Error) -> DriftEntry {
    DriftEntry {
        drift_type: DriftType::SemanticInconsistency,
        file: path.to_string(),
        severity: Severity::Error,
        description: "Content no longer parses as RDF".to_string(),
        impact: "Semantic structure cannot be verified".to_string(),
        details: DriftDetails {
            error: Some(error.to_string()),
            ..Default::default()
        },
    }
}

fn no_baseline() -> DriftResult {
    DriftResult {
        status: DriftStatus::NoBaseline,
        severity: Severity::Warning,
        message: "No baseline lock file found".to_string(),
        drift: Vec::new(),
        recommendations: vec!["Generate a baseline lock file before checking for drift".to_string()],
        baseline: None,
        last_check: Utc::now(),
        summary: DriftSummary::default(),
        analysis: Vec::new(),
    }
}

fn finish(scan: Scan, baseline: &LockFile) -> DriftResult {
    let Scan { entries, analysis } = scan;
    let summary = DriftSummary::of(&entries);
    let severity = entries
        .iter()
        .map(|e| e.severity)
        .max()
        .unwrap_or(Severity::Info);

    let (status, message) = if entries.is_empty() {
        (DriftStatus::Clean, "No drift detected".to_string())
    } else {
        (
            DriftStatus::Drift,
            format!("Detected {} drift issue(s)", entries.len()),
        )
    };

    info!(%status, %severity, changes = entries.len(), "drift detection complete");

    DriftResult {
        status,
        severity,
        message,
        recommendations: recommendations(&summary),
        drift: entries,
        baseline: Some(baseline.created_at),
        last_check: Utc::now(),
        summary,
        analysis,
    }
}

fn recommendations(summary: &DriftSummary) -> Vec<String> {
    let has = |types: &[DriftType]| types.iter().any(|t| summary.by_type.contains_key(t));
    let mut recs = Vec::new();

    if summary.by_severity.contains_key(&Severity::Critical) {
        recs.push("Resolve file access errors and re-run drift detection".to_string());
    }
    if has(&[DriftType::SemanticInconsistency]) {
        recs.push("Fix RDF syntax errors before regenerating".to_string());
    }
    if has(&[
        DriftType::TemplateAdded,
        DriftType::TemplateRemoved,
        DriftType::TemplateModified,
    ]) {
        recs.push("Review template changes and regenerate affected artifacts".to_string());
    }
    if has(&[DriftType::RuleAdded, DriftType::RuleRemoved, DriftType::RuleModified]) {
        recs.push("Validate rule changes against dependent templates".to_string());
    }
    if has(&[DriftType::ConfigChanged]) {
        recs.push("Confirm configuration changes are intentional".to_string());
    }
    if has(&[DriftType::ArtifactOrphaned]) {
        recs.push("Remove orphaned artifacts or restore their templates".to_string());
    }
    if summary.total_changes > 0 {
        recs.push("Update the lock file once changes are accepted".to_string());
    }
    recs
}

/// One report line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    #[serde(rename = "type")]
    pub drift_type: DriftType,
    pub file: String,
    pub severity: Severity,
    pub description: String,
    pub impact: String,
}

/// Rendered drift report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftReport {
    pub title: String,
    pub status: DriftStatus,
    pub severity: Severity,
    pub summary: DriftSummary,
    pub findings: Vec<Finding>,
    pub recommendations: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<Vec<FileAnalysis>>,
}

/// Render `result`. Findings are ordered by descending severity, then path.
/// `verbose` adds the per-file analysis.
pub fn generate_report(result: &DriftResult, verbose: bool) -> DriftReport {
    let mut findings: Vec<Finding> = result
        .drift
        .iter()
        .map(|entry| Finding {
            drift_type: entry.drift_type,
            file: entry.file.clone(),
            severity: entry.severity,
            description: entry.description.clone(),
            impact: entry.impact.clone(),
        })
        .collect();
    findings.sort_by(|a, b| b.severity.cmp(&a.severity).then_with(|| a.file.cmp(&b.file)));

    DriftReport {
        title: "Drift Detection Report".to_string(),
        status: result.status,
        severity: result.severity,
        summary: result.summary.clone(),
        findings,
        recommendations: result.recommendations.clone(),
        analysis: verbose.then(|| result.analysis.clone()),
    }
}
