mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use kcas_core::{
    Algorithm, CasEngine, Codec, DriftDetector, DriftOptions, EngineConfig, GcPolicy, LockManager,
    ProjectLayout, Severity, generate_report,
};
use output::{
    CidOutput, CompareOutput, DriftOutput, GcOutput, HashOutput, LockOutput, OutputWriter,
    StatsOutput, render_report,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Exit code when drift meets the `--fail-on` threshold.
const DRIFT_EXIT_CODE: u8 = 2;

/// KCAS - content-addressed storage with drift detection
#[derive(Parser)]
#[command(name = "kcas")]
#[command(about = "Content-addressed storage with baseline drift detection", long_about = None)]
#[command(version)]
struct Cli {
    /// Project root (defaults to KCAS_ROOT env var or the current directory)
    #[arg(short, long, global = true, env = "KCAS_ROOT")]
    root: Option<PathBuf>,

    /// Hash algorithm: sha256, sha512, blake2b, blake3 or md5
    #[arg(long, global = true, env = "KCAS_ALGORITHM", default_value = "sha256")]
    algo: String,

    /// Object store directory (defaults to <root>/.kcas)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Emit JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the hex digest of a file
    Hash {
        /// File to hash
        file: PathBuf,
    },

    /// Print the content identifier of a file
    Cid {
        /// File to identify
        file: PathBuf,

        /// Content codec
        #[arg(long, default_value = "raw")]
        codec: String,
    },

    /// Compare two files by content identifier
    Compare {
        /// First file
        a: PathBuf,

        /// Second file
        b: PathBuf,
    },

    /// Snapshot tracked files into the lock file
    Lock {
        /// Generate the snapshot without writing it
        #[arg(long)]
        dry_run: bool,
    },

    /// Compare tracked files against the lock file
    Drift {
        /// Include per-file analysis
        #[arg(short, long)]
        verbose: bool,

        /// Exit with status 2 when drift reaches this severity
        #[arg(long, value_enum)]
        fail_on: Option<FailOn>,

        /// Compare by hash only, skipping RDF structure analysis
        #[arg(long)]
        no_semantic: bool,
    },

    /// Prune the object store
    Gc {
        /// Trim below capacity rather than only to it
        #[arg(long)]
        force: bool,

        /// Object store byte budget
        #[arg(long)]
        max_bytes: Option<u64>,
    },

    /// Show lock file and object store statistics
    Stats {
        /// Lock file to inspect (defaults to the project lock file)
        lock_file: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FailOn {
    Info,
    Warning,
    Error,
    Critical,
}

impl From<FailOn> for Severity {
    fn from(value: FailOn) -> Self {
        match value {
            FailOn::Info => Severity::Info,
            FailOn::Warning => Severity::Warning,
            FailOn::Error => Severity::Error,
            FailOn::Critical => Severity::Critical,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr so JSON on stdout stays parseable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let output = OutputWriter::new(cli.json);
    match run(cli, &output) {
        Ok(code) => code,
        Err(e) => {
            output.write_error(&e, 1);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli, output: &OutputWriter) -> Result<ExitCode> {
    let root = cli.root.unwrap_or_else(|| PathBuf::from("."));
    let algorithm =
        Algorithm::parse(&cli.algo).with_context(|| format!("Invalid algorithm: {}", cli.algo))?;
    let store = cli.store.unwrap_or_else(|| root.join(".kcas"));
    let layout = ProjectLayout::new(&root);

    match cli.command {
        Commands::Hash { file } => cmd_hash(output, algorithm, &file),
        Commands::Cid { file, codec } => cmd_cid(output, algorithm, &file, &codec),
        Commands::Compare { a, b } => cmd_compare(output, algorithm, &a, &b),
        Commands::Lock { dry_run } => cmd_lock(output, algorithm, &store, &layout, dry_run),
        Commands::Drift {
            verbose,
            fail_on,
            no_semantic,
        } => cmd_drift(
            output,
            algorithm,
            &store,
            &layout,
            verbose,
            fail_on.map(Severity::from),
            no_semantic,
        ),
        Commands::Gc { force, max_bytes } => cmd_gc(output, algorithm, &store, force, max_bytes),
        Commands::Stats { lock_file } => {
            let lock_file = lock_file.unwrap_or_else(|| layout.lock_path());
            cmd_stats(output, &store, &lock_file)
        }
    }
}

fn memory_engine(algorithm: Algorithm) -> Result<CasEngine> {
    CasEngine::new(EngineConfig::default().with_algorithm(algorithm))
        .context("Failed to initialize engine")
}

fn persistent_engine(algorithm: Algorithm, store: &Path) -> Result<CasEngine> {
    CasEngine::new(
        EngineConfig::default()
            .with_algorithm(algorithm)
            .with_storage_dir(store),
    )
    .with_context(|| format!("Failed to open object store at {}", store.display()))
}

fn read(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn cmd_hash(output: &OutputWriter, algorithm: Algorithm, file: &Path) -> Result<ExitCode> {
    let engine = memory_engine(algorithm)?;
    let hash = engine.calculate_hash(&read(file)?, algorithm);

    let data = HashOutput {
        success: true,
        result_code: 0,
        path: file.display().to_string(),
        algorithm,
        hash: hash.clone(),
    };
    output.write(&data, || format!("{}  {}\n", hash, file.display()))?;
    Ok(ExitCode::SUCCESS)
}

fn cmd_cid(output: &OutputWriter, algorithm: Algorithm, file: &Path, codec: &str) -> Result<ExitCode> {
    let codec: Codec = codec
        .parse()
        .with_context(|| format!("Invalid codec: {}", codec))?;
    let engine = memory_engine(algorithm)?;
    let cid = engine
        .generate_cid_with(&read(file)?, algorithm, codec)
        .with_context(|| format!("Failed to generate CID for {}", file.display()))?;

    let data = CidOutput {
        success: true,
        result_code: 0,
        path: file.display().to_string(),
        codec: codec.as_str().to_string(),
        algorithm,
        digest: cid.digest_hex(),
        cid: cid.clone(),
    };
    output.write(&data, || format!("{}  {}\n", cid, file.display()))?;
    Ok(ExitCode::SUCCESS)
}

fn cmd_compare(output: &OutputWriter, algorithm: Algorithm, a: &Path, b: &Path) -> Result<ExitCode> {
    let engine = memory_engine(algorithm)?;
    let comparison = engine
        .compare_content(&read(a)?, &read(b)?)
        .context("Failed to compare content")?;

    let data = CompareOutput {
        success: true,
        result_code: 0,
        identical: comparison.identical,
        drift: comparison.drift,
        cid1: comparison.cid1.clone(),
        cid2: comparison.cid2.clone(),
    };
    output.write(&data, || {
        if comparison.identical {
            format!("identical  {}\n", comparison.cid1)
        } else {
            format!(
                "different\n  {}  {}\n  {}  {}\n",
                comparison.cid1,
                a.display(),
                comparison.cid2,
                b.display()
            )
        }
    })?;
    Ok(ExitCode::SUCCESS)
}

fn cmd_lock(
    output: &OutputWriter,
    algorithm: Algorithm,
    store: &Path,
    layout: &ProjectLayout,
    dry_run: bool,
) -> Result<ExitCode> {
    // A dry run leaves both the lock file and the object store untouched
    let engine = if dry_run {
        memory_engine(algorithm)?
    } else {
        persistent_engine(algorithm, store)?
    };
    let manager = LockManager::new(&engine, layout);
    let lock = manager
        .generate()
        .with_context(|| format!("Failed to snapshot {}", layout.root.display()))?;

    let path = if dry_run {
        layout.lock_path()
    } else {
        manager.update(&lock).context("Failed to write lock file")?
    };

    let data = LockOutput {
        success: true,
        result_code: 0,
        dry_run,
        path: path.display().to_string(),
        files: lock.files.len(),
        commit: lock.vcs.commit.clone(),
    };
    output.write(&data, || {
        let mut text = if dry_run {
            format!("Would write {} ({} files)\n", path.display(), lock.files.len())
        } else {
            format!("Wrote {} ({} files)\n", path.display(), lock.files.len())
        };
        for (file, entry) in &lock.files {
            text.push_str(&format!("  {}  {}\n", &entry.hash[..entry.hash.len().min(16)], file));
        }
        text
    })?;
    Ok(ExitCode::SUCCESS)
}

fn cmd_drift(
    output: &OutputWriter,
    algorithm: Algorithm,
    store: &Path,
    layout: &ProjectLayout,
    verbose: bool,
    fail_on: Option<Severity>,
    no_semantic: bool,
) -> Result<ExitCode> {
    let engine = persistent_engine(algorithm, store)?;
    let detector = DriftDetector::new(&engine, layout).with_options(DriftOptions {
        semantic: !no_semantic,
        ..Default::default()
    });
    let result = detector
        .detect()
        .with_context(|| format!("Drift detection failed for {}", layout.root.display()))?;

    let failed = fail_on.is_some_and(|threshold| {
        !result.drift.is_empty() && result.severity >= threshold
    });
    let result_code = if failed { DRIFT_EXIT_CODE } else { 0 };

    let report = generate_report(&result, verbose);
    let data = DriftOutput {
        success: !failed,
        result_code,
        message: result.message.clone(),
        report,
    };
    output.write(&data, || render_report(&data.report, &data.message))?;

    Ok(ExitCode::from(result_code))
}

fn cmd_gc(
    output: &OutputWriter,
    algorithm: Algorithm,
    store: &Path,
    force: bool,
    max_bytes: Option<u64>,
) -> Result<ExitCode> {
    let mut config = EngineConfig::default()
        .with_algorithm(algorithm)
        .with_storage_dir(store)
        .with_gc_policy(GcPolicy::DiskPressure);
    if let Some(max_bytes) = max_bytes {
        config.max_disk_bytes = max_bytes;
    }
    let engine = CasEngine::new(config)
        .with_context(|| format!("Failed to open object store at {}", store.display()))?;

    let stats = engine.gc(force).context("Garbage collection failed")?;
    let usage = match engine.object_store() {
        Some(disk) => disk.usage().context("Failed to measure object store")?,
        None => Default::default(),
    };

    let data = GcOutput {
        success: true,
        result_code: 0,
        force,
        stats,
        disk_objects: usage.objects,
        disk_bytes: usage.bytes,
    };
    output.write(&data, || {
        format!(
            "Removed {} objects ({} bytes); {} objects ({} bytes) remain\n",
            stats.disk_objects_removed, stats.disk_bytes_freed, usage.objects, usage.bytes
        )
    })?;
    Ok(ExitCode::SUCCESS)
}

fn cmd_stats(output: &OutputWriter, store: &Path, lock_file: &Path) -> Result<ExitCode> {
    let lock_stats = LockManager::get_config_stats(lock_file)
        .with_context(|| format!("Failed to stat {}", lock_file.display()))?;

    let usage = if store.join("config").exists() {
        kcas_core::ObjectStore::open(store)
            .and_then(|disk| disk.usage())
            .with_context(|| format!("Failed to read object store at {}", store.display()))?
    } else {
        Default::default()
    };

    let data = StatsOutput {
        success: true,
        result_code: 0,
        lock_file: lock_stats.clone(),
        store_objects: usage.objects,
        store_bytes: usage.bytes,
    };
    output.write(&data, || {
        let mut text = match &lock_stats {
            Some(stats) => format!(
                "Lock file: {}\n  size: {} bytes\n  modified: {}\n",
                stats.path.display(),
                stats.size_bytes,
                stats.modified.to_rfc3339()
            ),
            None => format!("Lock file: {} (absent)\n", lock_file.display()),
        };
        text.push_str(&format!(
            "Object store: {} objects, {} bytes\n",
            usage.objects, usage.bytes
        ));
        text
    })?;
    Ok(ExitCode::SUCCESS)
}
