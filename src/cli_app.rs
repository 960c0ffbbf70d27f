//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use crossbeam_channel as channel;
use serde_json::{Value, json};
use thiserror::Error;

use dirprint::core::config::{Config, StoragePreset};
use dirprint::core::errors::DprError;
use dirprint::hashing::digest::HashMode;
use dirprint::hashing::provider::HashAlgorithm;
use dirprint::index::diff::compare;
use dirprint::index::directory::DirectoryHash;
use dirprint::index::duplicates::{DuplicateGroup, find_duplicates, find_duplicates_across};
use dirprint::logger::jsonl::{
    EventType, JsonlConfig, JsonlWriter, LogEntry, Severity, SharedJsonlWriter,
};
use dirprint::scanner::control::ScanControl;
use dirprint::scanner::progress::HashProgress;
use dirprint::scanner::service::{HashService, ScanReport};
use dirprint::storage::codec;

/// dirprint: fingerprint directory trees, find duplicates, detect drift.
#[derive(Debug, Parser)]
#[command(
    name = "dirprint",
    author,
    version,
    about = "Concurrent directory fingerprinting",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Quiet mode (no progress line).
    #[arg(short, long, global = true)]
    quiet: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Hash every file under a directory and write a snapshot.
    Scan(ScanArgs),
    /// List duplicate files in one or more snapshots.
    Dupes(DupesArgs),
    /// Compare two snapshots of the same tree.
    Diff(DiffArgs),
    /// Print the contents of a snapshot.
    Show(ShowArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    /// Content digests (full or sampled).
    Hash,
    /// Root-relative path digests only.
    Name,
}

impl From<ModeArg> for HashMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Hash => Self::FileHash,
            ModeArg::Name => Self::FileName,
        }
    }
}

#[derive(Debug, Clone, clap::Args)]
struct ScanArgs {
    /// Directory to scan.
    #[arg(value_name = "ROOT")]
    root: PathBuf,
    /// Snapshot file to write (default: `directoryhash_<timestamp>.dat`).
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,
    /// Option preset for the storage medium (`local` or `removable`).
    #[arg(long, value_name = "PRESET")]
    preset: Option<StoragePreset>,
    /// What to fingerprint.
    #[arg(long, value_enum, default_value_t = ModeArg::Hash)]
    mode: ModeArg,
    /// Hash algorithm (`xxh3`, `xxh32`, `sha256`).
    #[arg(long, default_value_t = HashAlgorithm::Xxh3, value_name = "ALGORITHM")]
    algorithm: HashAlgorithm,
}

#[derive(Debug, Clone, clap::Args)]
struct DupesArgs {
    /// Snapshot files; duplicates are searched across all of them.
    #[arg(value_name = "SNAPSHOT", required = true)]
    snapshots: Vec<PathBuf>,
}

#[derive(Debug, Clone, clap::Args)]
struct DiffArgs {
    /// Older snapshot.
    #[arg(value_name = "OLD")]
    old: PathBuf,
    /// Newer snapshot.
    #[arg(value_name = "NEW")]
    new: PathBuf,
}

#[derive(Debug, Clone, clap::Args)]
struct ShowArgs {
    /// Snapshot file.
    #[arg(value_name = "SNAPSHOT")]
    snapshot: PathBuf,
    /// Re-anchor entries at this root instead of the stored one.
    #[arg(long, value_name = "DIR")]
    root: Option<PathBuf>,
}

#[derive(Debug, Clone, clap::Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Library failure (bad config, unreadable root, corrupt snapshot...).
    #[error("{0}")]
    Dpr(#[from] DprError),
    /// Operation stopped before completion.
    #[error("{0}")]
    Partial(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Dpr(DprError::InvalidConfig { .. } | DprError::ConfigParse { .. }) => 1,
            Self::Dpr(_) | Self::Io(_) => 2,
            Self::Json(_) => 3,
            Self::Partial(_) => 4,
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Scan(args) => run_scan(cli, args),
        Command::Dupes(args) => run_dupes(cli, args),
        Command::Diff(args) => run_diff(cli, args),
        Command::Show(args) => run_show(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// scan
// ---------------------------------------------------------------------------

fn run_scan(cli: &Cli, args: &ScanArgs) -> Result<(), CliError> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(preset) = args.preset {
        config.service = preset.options();
    }
    let log = open_activity_log(&config);

    let service = HashService::from_config(&config, args.algorithm.provider())?
        .with_mode(args.mode.into())
        .with_activity_log(log.clone());

    let scan_control = ScanControl::new();
    #[cfg(feature = "signals")]
    scan_control.cancel_on_interrupt();

    let mode = output_mode(cli);
    let show_progress = !cli.quiet && mode == OutputMode::Human && io::stderr().is_terminal();
    let report = if show_progress {
        scan_with_progress(service, &args.root, &scan_control)?
    } else {
        service.scan(&args.root, &scan_control)?
    };

    if report.cancelled {
        return Err(CliError::Partial(format!(
            "scan cancelled after {} of {} files; no snapshot written",
            report.progress.files_hashed, report.progress.files_discovered
        )));
    }

    let output = args.output.clone().unwrap_or_else(default_output_name);
    codec::save(&output, &report.snapshot)?;
    let mut saved = LogEntry::new(EventType::SnapshotSaved, Severity::Info).with_path(&output);
    saved.files = Some(report.snapshot.len() as u64);
    log.lock().write_entry(&saved);

    match mode {
        OutputMode::Human => print_scan_summary(&report, &output),
        OutputMode::Json => {
            let failures: Vec<Value> = report
                .failures
                .iter()
                .map(|f| json!({"path": f.path.to_string_lossy(), "code": f.code, "message": f.message}))
                .collect();
            write_json_line(&json!({
                "command": "scan",
                "root": report.snapshot.root().to_string_lossy(),
                "output": output.to_string_lossy(),
                "profile": report.snapshot.profile(),
                "files": report.snapshot.len(),
                "bytes_hashed": report.progress.bytes_hashed,
                "elapsed_ms": u64::try_from(report.elapsed.as_millis()).unwrap_or(u64::MAX),
                "failures": failures,
            }))?;
        }
    }
    Ok(())
}

/// Run the scan while a second thread renders a one-line progress meter.
fn scan_with_progress(
    service: HashService,
    root: &Path,
    control: &ScanControl,
) -> Result<ScanReport, CliError> {
    let (tx, rx) = channel::bounded::<HashProgress>(16);
    let service = service.with_progress(tx);
    thread::scope(|s| {
        let renderer = s.spawn(move || {
            let mut stderr = io::stderr();
            loop {
                match rx.recv_timeout(Duration::from_millis(250)) {
                    Ok(p) => {
                        let _ = write!(
                            stderr,
                            "\r  {} {}/{} files, {}   ",
                            "hashing".cyan(),
                            p.files_hashed,
                            p.files_discovered,
                            format_bytes(p.bytes_hashed)
                        );
                        let _ = stderr.flush();
                    }
                    Err(channel::RecvTimeoutError::Timeout) => {}
                    Err(channel::RecvTimeoutError::Disconnected) => break,
                }
            }
            let _ = writeln!(stderr);
        });
        let result = service.scan(root, control);
        // Dropping the service closes the progress channel and ends the renderer.
        drop(service);
        let _ = renderer.join();
        result.map_err(CliError::from)
    })
}

fn print_scan_summary(report: &ScanReport, output: &Path) {
    let snapshot = &report.snapshot;
    println!(
        "{}\n  Root: {}\n  Files: {} ({} hashed) in {:.1}s\n  Profile: {}\n  Snapshot: {}",
        "Directory Scan".bold(),
        snapshot.root().display(),
        snapshot.len(),
        format_bytes(report.progress.bytes_hashed),
        report.elapsed.as_secs_f64(),
        snapshot.profile().describe(),
        output.display().to_string().green(),
    );
    if !report.failures.is_empty() {
        println!(
            "\n  {} {} item(s) skipped:",
            "warning:".yellow().bold(),
            report.failures.len()
        );
        for failure in report.failures.iter().take(20) {
            println!("    [{}] {}", failure.code, failure.path.display());
        }
        if report.failures.len() > 20 {
            println!("    ... and {} more", report.failures.len() - 20);
        }
    }
}

fn default_output_name() -> PathBuf {
    PathBuf::from(format!(
        "directoryhash_{}.dat",
        chrono::Local::now().format("%Y%m%d%H%M%S")
    ))
}

// ---------------------------------------------------------------------------
// dupes / diff / show
// ---------------------------------------------------------------------------

fn run_dupes(cli: &Cli, args: &DupesArgs) -> Result<(), CliError> {
    let log = load_activity_log(cli)?;
    let snapshots = args
        .snapshots
        .iter()
        .map(|path| load_snapshot(path, &log))
        .collect::<Result<Vec<_>, _>>()?;
    let groups = if let [single] = snapshots.as_slice() {
        find_duplicates(single)
    } else {
        let refs: Vec<&DirectoryHash> = snapshots.iter().collect();
        find_duplicates_across(&refs)?
    };

    match output_mode(cli) {
        OutputMode::Human => print_duplicate_groups(&groups),
        OutputMode::Json => write_json_line(&json!({
            "command": "dupes",
            "groups": groups,
        }))?,
    }
    Ok(())
}

fn print_duplicate_groups(groups: &[DuplicateGroup]) {
    if groups.is_empty() {
        println!("  No duplicates found.");
        return;
    }
    let redundant: usize = groups.iter().map(|g| g.paths.len() - 1).sum();
    println!(
        "{}\n  {} group(s), {} redundant file(s)\n",
        "Duplicate Files".bold(),
        groups.len(),
        redundant
    );
    for (i, group) in groups.iter().enumerate() {
        let digest = group.parts.first().map(ToString::to_string).unwrap_or_default();
        println!("  {:>3}  {}", i + 1, short_hex(&digest).dimmed());
        for path in &group.paths {
            println!("         {}", path.display());
        }
    }
}

fn run_diff(cli: &Cli, args: &DiffArgs) -> Result<(), CliError> {
    let log = load_activity_log(cli)?;
    let old = load_snapshot(&args.old, &log)?;
    let new = load_snapshot(&args.new, &log)?;
    let diff = compare(&old, &new)?;

    match output_mode(cli) {
        OutputMode::Human => {
            println!(
                "{}\n  {} → {}\n  unchanged: {}  added: {}  removed: {}  changed: {}\n",
                "Snapshot Diff".bold(),
                old.root().display(),
                new.root().display(),
                diff.unchanged_count,
                diff.added.len(),
                diff.removed.len(),
                diff.changed.len(),
            );
            for path in &diff.added {
                println!("  {} {}", "+".green(), path.display());
            }
            for path in &diff.removed {
                println!("  {} {}", "-".red(), path.display());
            }
            for path in &diff.changed {
                println!("  {} {}", "~".yellow(), path.display());
            }
        }
        OutputMode::Json => write_json_line(&json!({
            "command": "diff",
            "diff": diff,
        }))?,
    }
    Ok(())
}

fn run_show(cli: &Cli, args: &ShowArgs) -> Result<(), CliError> {
    let log = load_activity_log(cli)?;
    let snapshot = load_snapshot(&args.snapshot, &log)?;
    let snapshot = match &args.root {
        Some(root) => snapshot.rebase(root),
        None => snapshot,
    };

    match output_mode(cli) {
        OutputMode::Human => {
            println!(
                "{}\n  Root: {}\n  Profile: {}\n  Files: {} ({} digest parts)\n",
                "Snapshot".bold(),
                snapshot.root().display(),
                snapshot.profile().describe(),
                snapshot.len(),
                snapshot.part_count(),
            );
            for (rel, hash) in snapshot.relative_files() {
                let first = hash.parts().first().map(ToString::to_string).unwrap_or_default();
                let kind = if hash.is_sampled() {
                    format!("{}×", hash.parts().len())
                } else {
                    "full".to_string()
                };
                println!("  {}  {:>5}  {}", short_hex(&first).dimmed(), kind, rel.display());
            }
        }
        OutputMode::Json => {
            let files: Vec<Value> = snapshot
                .files()
                .map(|f| json!({"path": f.path().to_string_lossy(), "parts": f.parts()}))
                .collect();
            write_json_line(&json!({
                "command": "show",
                "root": snapshot.root().to_string_lossy(),
                "profile": snapshot.profile(),
                "files": files,
            }))?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// helpers
// ---------------------------------------------------------------------------

fn open_activity_log(config: &Config) -> SharedJsonlWriter {
    JsonlWriter::open_shared(JsonlConfig::at(&config.paths.activity_log))
}

fn load_activity_log(cli: &Cli) -> Result<SharedJsonlWriter, CliError> {
    Ok(open_activity_log(&Config::load(cli.config.as_deref())?))
}

fn load_snapshot(path: &Path, log: &SharedJsonlWriter) -> Result<DirectoryHash, CliError> {
    match codec::load(path) {
        Ok(snapshot) => {
            let mut entry = LogEntry::new(EventType::SnapshotLoaded, Severity::Info).with_path(path);
            entry.files = Some(snapshot.len() as u64);
            log.lock().write_entry(&entry);
            Ok(snapshot)
        }
        Err(err) => {
            log.lock()
                .write_entry(&LogEntry::new(EventType::Error, Severity::Warning).with_path(path).with_error(&err));
            Err(err.into())
        }
    }
}

fn short_hex(hex: &str) -> &str {
    hex.get(..16).unwrap_or(hex)
}

#[allow(clippy::cast_precision_loss)]
fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    const GIB: u64 = 1024 * MIB;
    const TIB: u64 = 1024 * GIB;

    if bytes >= TIB {
        format!("{:.1} TB", bytes as f64 / TIB as f64)
    } else if bytes >= GIB {
        format!("{:.1} GB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("DPR_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scan_with_all_options() {
        let cli = Cli::try_parse_from([
            "dirprint",
            "scan",
            "/data",
            "--output",
            "out.dat",
            "--preset",
            "removable",
            "--mode",
            "name",
            "--algorithm",
            "sha256",
        ])
        .unwrap();
        let Command::Scan(args) = cli.command else {
            panic!("expected scan");
        };
        assert_eq!(args.root, PathBuf::from("/data"));
        assert_eq!(args.output, Some(PathBuf::from("out.dat")));
        assert_eq!(args.preset, Some(StoragePreset::Removable));
        assert_eq!(args.mode, ModeArg::Name);
        assert_eq!(args.algorithm, HashAlgorithm::Sha256);
    }

    #[test]
    fn scan_defaults() {
        let cli = Cli::try_parse_from(["dirprint", "scan", "."]).unwrap();
        let Command::Scan(args) = cli.command else {
            panic!("expected scan");
        };
        assert_eq!(args.mode, ModeArg::Hash);
        assert_eq!(args.algorithm, HashAlgorithm::Xxh3);
        assert!(args.preset.is_none());
        assert!(args.output.is_none());
    }

    #[test]
    fn rejects_unknown_algorithm_and_preset() {
        assert!(Cli::try_parse_from(["dirprint", "scan", ".", "--algorithm", "md5"]).is_err());
        assert!(Cli::try_parse_from(["dirprint", "scan", ".", "--preset", "tape"]).is_err());
    }

    #[test]
    fn dupes_requires_a_snapshot() {
        assert!(Cli::try_parse_from(["dirprint", "dupes"]).is_err());
        assert!(Cli::try_parse_from(["dirprint", "dupes", "a.dat", "b.dat"]).is_ok());
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["dirprint", "show", "x.dat", "--json", "--no-color"]).unwrap();
        assert!(cli.json);
        assert!(cli.no_color);
    }

    #[test]
    fn output_mode_resolution_honors_precedence() {
        assert_eq!(resolve_output_mode(true, Some("human"), true), OutputMode::Json);
        assert_eq!(resolve_output_mode(false, Some("json"), true), OutputMode::Json);
        assert_eq!(resolve_output_mode(false, Some("human"), false), OutputMode::Human);
        assert_eq!(resolve_output_mode(false, Some("auto"), true), OutputMode::Human);
        assert_eq!(resolve_output_mode(false, None, false), OutputMode::Json);
    }

    #[test]
    fn default_output_name_has_timestamp() {
        let name = default_output_name();
        let name = name.to_str().unwrap();
        assert!(name.starts_with("directoryhash_"));
        assert!(name.ends_with(".dat"));
        assert_eq!(name.len(), "directoryhash_".len() + 14 + ".dat".len());
    }

    #[test]
    fn format_bytes_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn exit_codes() {
        assert_eq!(CliError::Partial("x".into()).exit_code(), 4);
        assert_eq!(
            CliError::Dpr(DprError::InvalidConfig { details: "x".into() }).exit_code(),
            1
        );
        assert_eq!(CliError::Dpr(DprError::corrupt("x")).exit_code(), 2);
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
