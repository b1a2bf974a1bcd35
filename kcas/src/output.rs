//! Output formatting for CLI commands.
//!
//! Every command produces a serializable output struct. In JSON mode it is
//! printed as-is; in text mode a closure renders the human-readable form.

use anyhow::Result;
use kcas_core::{Algorithm, ContentId, DriftReport, GcStats, LockFileStats, Severity};
use serde::Serialize;
use std::io::{self, Write};

/// Prints command results to stdout and failures to stderr.
#[derive(Debug, Clone, Copy)]
pub struct OutputWriter {
    json: bool,
}

impl OutputWriter {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    /// JSON mode serializes `data`; text mode prints whatever `render` returns.
    pub fn write<T: Serialize>(&self, data: &T, render: impl FnOnce() -> String) -> Result<()> {
        let mut stdout = io::stdout().lock();
        if self.json {
            serde_json::to_writer_pretty(&mut stdout, data)?;
            stdout.write_all(b"\n")?;
        } else {
            stdout.write_all(render().as_bytes())?;
        }
        stdout.flush()?;
        Ok(())
    }

    pub fn write_error(&self, error: &anyhow::Error, result_code: u8) {
        let mut stderr = io::stderr().lock();
        let _ = if self.json {
            let failure = ErrorOutput {
                success: false,
                result_code,
                error: format!("{:#}", error),
            };
            serde_json::to_writer_pretty(&mut stderr, &failure)
                .map_err(io::Error::from)
                .and_then(|()| stderr.write_all(b"\n"))
        } else {
            writeln!(stderr, "error: {:#}", error)
        };
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorOutput {
    pub success: bool,
    pub result_code: u8,
    pub error: String,
}

/// `kcas hash`
#[derive(Debug, Serialize)]
pub struct HashOutput {
    pub success: bool,
    pub result_code: u8,
    pub path: String,
    pub algorithm: Algorithm,
    pub hash: String,
}

/// `kcas cid`
#[derive(Debug, Serialize)]
pub struct CidOutput {
    pub success: bool,
    pub result_code: u8,
    pub path: String,
    pub cid: ContentId,
    pub codec: String,
    pub algorithm: Algorithm,
    pub digest: String,
}

#[derive(Debug, Serialize)]
pub struct CompareOutput {
    pub success: bool,
    pub result_code: u8,
    pub identical: bool,
    pub drift: bool,
    pub cid1: ContentId,
    pub cid2: ContentId,
}

/// `kcas lock`; `path` is where the lock file was or would be written.
#[derive(Debug, Serialize)]
pub struct LockOutput {
    pub success: bool,
    pub result_code: u8,
    pub dry_run: bool,
    pub path: String,
    pub files: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DriftOutput {
    pub success: bool,
    pub result_code: u8,
    pub message: String,
    #[serde(flatten)]
    pub report: DriftReport,
}

/// `kcas gc`, with disk usage after collection.
#[derive(Debug, Serialize)]
pub struct GcOutput {
    pub success: bool,
    pub result_code: u8,
    pub force: bool,
    #[serde(flatten)]
    pub stats: GcStats,
    pub disk_objects: usize,
    pub disk_bytes: u64,
}

#[derive(Debug, Serialize)]
pub struct StatsOutput {
    pub success: bool,
    pub result_code: u8,
    pub lock_file: Option<LockFileStats>,
    pub store_objects: usize,
    pub store_bytes: u64,
}

/// Render a drift report for the terminal.
pub fn render_report(report: &DriftReport, message: &str) -> String {
    let mut out = format!(
        "{}\nStatus: {}  Severity: {}\n{}\n",
        report.title, report.status, report.severity, message
    );

    if !report.findings.is_empty() {
        out.push('\n');
        for finding in &report.findings {
            out.push_str(&format!(
                "  [{}] {} {}\n      {}\n      impact: {}\n",
                severity_label(finding.severity),
                finding.drift_type,
                finding.file,
                finding.description,
                finding.impact
            ));
        }
    }

    if let Some(analysis) = &report.analysis {
        out.push_str("\nFiles:\n");
        for file in analysis {
            out.push_str(&format!(
                "  {:<10} {} {}\n",
                format!("{:?}", file.outcome).to_lowercase(),
                file.current_hash
                    .as_deref()
                    .or(file.baseline_hash.as_deref())
                    .map(|h| &h[..h.len().min(12)])
                    .unwrap_or("-"),
                file.path
            ));
        }
    }

    if !report.recommendations.is_empty() {
        out.push_str("\nRecommendations:\n");
        for rec in &report.recommendations {
            out.push_str(&format!("  - {}\n", rec));
        }
    }
    out
}

fn severity_label(severity: Severity) -> &'static str {
    match severity {
        Severity::Info => "INFO",
        Severity::Warning => "WARN",
        Severity::Error => "ERROR",
        Severity::Critical => "CRIT",
    }
}
