//! JSONL activity log: one self-contained JSON object per line.
//!
//! Lines are assembled in memory and written with a single `write_all`, so a
//! process tailing the file never sees a partial line.
//!
//! Fallback chain:
//! 1. Primary file path
//! 2. Fallback path (e.g. a temp-dir copy when the data dir is read-only)
//! 3. stderr with `[DPR-JSONL]` prefix
//! 4. Silent discard (a scan must never fail because logging failed)

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions, rename};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::errors::{DprError, Result};

/// Severity level for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Activity events recorded by scans and snapshot I/O.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ScanStart,
    ScanComplete,
    ScanCancelled,
    FileSkipped,
    SnapshotSaved,
    SnapshotLoaded,
    Error,
}

/// A single JSONL log entry; all fields optional except `ts`, `event`, `severity`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// RFC 3339 UTC timestamp.
    pub ts: String,
    pub event: EventType,
    pub severity: Severity,
    /// Scan root or snapshot file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Hash profile summary (`mode/provider k=.. block=.. threshold=..`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failures: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Freeform details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    /// Create a new entry stamped with the current UTC time.
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: format_utc_now(),
            event,
            severity,
            path: None,
            profile: None,
            files: None,
            bytes: None,
            failures: None,
            duration_ms: None,
            error_code: None,
            error_message: None,
            details: None,
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: &Path) -> Self {
        self.path = Some(path.display().to_string());
        self
    }

    /// Fill `error_code` / `error_message` from a crate error.
    #[must_use]
    pub fn with_error(mut self, err: &DprError) -> Self {
        self.error_code = Some(err.code().to_string());
        self.error_message = Some(err.to_string());
        self
    }
}

/// Degradation state of the JSONL writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    /// Writing to primary path.
    Normal,
    /// Primary failed, writing to fallback path.
    Fallback,
    /// Both files failed, writing to stderr.
    Stderr,
    /// Everything failed, silently discarding.
    Discard,
}

/// Configuration for the JSONL writer.
#[derive(Debug, Clone)]
pub struct JsonlConfig {
    /// Primary log file path.
    pub path: PathBuf,
    /// Optional fallback path (e.g. on a different filesystem).
    pub fallback_path: Option<PathBuf>,
    /// Maximum file size before rotation (bytes). Default: 10 MiB.
    pub max_size_bytes: u64,
    /// Number of rotated files to keep. Default: 3.
    pub max_rotated_files: u32,
    /// Seconds between forced fsync calls. Default: 10.
    pub fsync_interval_secs: u64,
    /// Seconds between attempts to get back to the primary path while
    /// degraded. Default: 60.
    pub recovery_interval_secs: u64,
}

impl JsonlConfig {
    /// Defaults with the primary file at `path`.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

impl Default for JsonlConfig {
    fn default() -> Self {
        Self {
            path: crate::core::config::PathsConfig::default().activity_log,
            fallback_path: Some(std::env::temp_dir().join("dirprint-activity.jsonl")),
            max_size_bytes: 10 * 1024 * 1024, // 10 MiB
            max_rotated_files: 3,
            fsync_interval_secs: 10,
            recovery_interval_secs: 60,
        }
    }
}

/// Writer handle shared between a scan's threads.
pub type SharedJsonlWriter = Arc<Mutex<JsonlWriter>>;

/// Append-only JSONL log writer with rotation and multi-level fallback.
pub struct JsonlWriter {
    config: JsonlConfig,
    writer: Option<BufWriter<File>>,
    state: WriterState,
    bytes_written: u64,
    last_fsync: SystemTime,
    last_recovery_attempt: SystemTime,
}

impl JsonlWriter {
    /// Open the JSONL log file. Falls through the degradation chain on failure.
    pub fn open(config: JsonlConfig) -> Self {
        let mut w = Self {
            config,
            writer: None,
            state: WriterState::Discard,
            bytes_written: 0,
            last_fsync: SystemTime::now(),
            last_recovery_attempt: SystemTime::now(),
        };
        w.try_open_primary();
        w
    }

    /// Open and wrap for sharing with a `HashService`.
    pub fn open_shared(config: JsonlConfig) -> SharedJsonlWriter {
        Arc::new(Mutex::new(Self::open(config)))
    }

    /// Write a single log entry as one atomic JSONL line.
    pub fn write_entry(&mut self, entry: &LogEntry) {
        let line = match serde_json::to_string(entry) {
            Ok(json) => format!("{json}\n"),
            Err(e) => {
                let _ = writeln!(io::stderr(), "[DPR-JSONL] serialize error: {e}");
                return;
            }
        };

        self.maybe_recover();
        self.write_line(&line);
    }

    pub fn flush(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush();
        }
    }

    /// Force an fsync on the underlying file.
    pub fn fsync(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush();
            let _ = w.get_ref().sync_data();
            self.last_fsync = SystemTime::now();
        }
    }

    /// Current degradation state.
    pub fn state(&self) -> &str {
        match self.state {
            WriterState::Normal => "normal",
            WriterState::Fallback => "fallback",
            WriterState::Stderr => "stderr",
            WriterState::Discard => "discard",
        }
    }

    /// Attempt to return to the primary path after a degradation. Called
    /// from `write_entry` at most once per `recovery_interval_secs`.
    pub fn try_recover(&mut self) {
        if self.state == WriterState::Normal {
            return;
        }
        self.last_recovery_attempt = SystemTime::now();
        if let Ok((file, size)) = open_append(&self.config.path) {
            self.flush();
            self.writer = Some(BufWriter::with_capacity(64 * 1024, file));
            self.state = WriterState::Normal;
            self.bytes_written = size;
            let _ = writeln!(
                io::stderr(),
                "[DPR-JSONL] recovered to primary path: {}",
                self.config.path.display()
            );
        }
    }

    // ──────────────────────── internals ────────────────────────

    fn write_line(&mut self, line: &str) {
        if self.bytes_written + line.len() as u64 > self.config.max_size_bytes
            && matches!(self.state, WriterState::Normal | WriterState::Fallback)
        {
            self.rotate();
        }

        match self.state {
            WriterState::Normal | WriterState::Fallback => {
                if let Some(w) = self.writer.as_mut() {
                    if w.write_all(line.as_bytes()).is_err() {
                        self.degrade();
                        self.write_line(line);
                        return;
                    }
                    self.bytes_written += line.len() as u64;
                    self.maybe_fsync();
                } else {
                    self.degrade();
                    self.write_line(line);
                }
            }
            WriterState::Stderr => {
                let _ = write!(io::stderr(), "[DPR-JSONL] {line}");
            }
            WriterState::Discard => {}
        }
    }

    fn maybe_recover(&mut self) {
        if self.state == WriterState::Normal {
            return;
        }
        let elapsed = SystemTime::now()
            .duration_since(self.last_recovery_attempt)
            .unwrap_or(Duration::ZERO);
        if elapsed.as_secs() >= self.config.recovery_interval_secs {
            self.try_recover();
        }
    }

    fn maybe_fsync(&mut self) {
        let elapsed = SystemTime::now()
            .duration_since(self.last_fsync)
            .unwrap_or(Duration::ZERO);
        if elapsed.as_secs() >= self.config.fsync_interval_secs {
            self.fsync();
        }
    }

    fn try_open_primary(&mut self) {
        match open_append(&self.config.path) {
            Ok((file, size)) => {
                self.writer = Some(BufWriter::with_capacity(64 * 1024, file));
                self.state = WriterState::Normal;
                self.bytes_written = size;
            }
            Err(_) => self.try_open_fallback(),
        }
    }

    fn try_open_fallback(&mut self) {
        let Some(fb) = &self.config.fallback_path else {
            self.state = WriterState::Stderr;
            let _ = writeln!(
                io::stderr(),
                "[DPR-JSONL] primary path failed and no fallback configured, using stderr"
            );
            return;
        };
        match open_append(fb) {
            Ok((file, size)) => {
                let _ = writeln!(
                    io::stderr(),
                    "[DPR-JSONL] primary path failed, using fallback: {}",
                    fb.display()
                );
                self.writer = Some(BufWriter::with_capacity(64 * 1024, file));
                self.state = WriterState::Fallback;
                self.bytes_written = size;
            }
            Err(_) => {
                self.state = WriterState::Stderr;
                let _ = writeln!(
                    io::stderr(),
                    "[DPR-JSONL] both primary and fallback paths failed, using stderr"
                );
            }
        }
    }

    fn degrade(&mut self) {
        self.writer = None;
        match self.state {
            WriterState::Normal => self.try_open_fallback(),
            WriterState::Fallback => {
                self.state = WriterState::Stderr;
                let _ = writeln!(io::stderr(), "[DPR-JSONL] fallback write failed, using stderr");
            }
            WriterState::Stderr => self.state = WriterState::Discard,
            WriterState::Discard => {}
        }
    }

    fn rotate(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush();
        }
        self.writer = None;

        let base = match self.state {
            WriterState::Normal => self.config.path.clone(),
            WriterState::Fallback => match &self.config.fallback_path {
                Some(p) => p.clone(),
                None => return,
            },
            _ => return,
        };

        // .2→.3, .1→.2, current→.1; the oldest falls off the end.
        for i in (1..self.config.max_rotated_files).rev() {
            let _ = rename(rotated_name(&base, i), rotated_name(&base, i + 1));
        }
        let _ = rename(&base, rotated_name(&base, 1));

        match open_append(&base) {
            Ok((file, _)) => {
                self.writer = Some(BufWriter::with_capacity(64 * 1024, file));
                self.bytes_written = 0;
            }
            Err(_) => self.degrade(),
        }
    }
}

impl Drop for JsonlWriter {
    fn drop(&mut self) {
        self.flush();
    }
}

// ──────────────────────── helpers ────────────────────────

/// Open or create a file for appending. Returns `(File, current_size)`.
fn open_append(path: &Path) -> Result<(File, u64)> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| DprError::io(parent, source))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| DprError::io(path, source))?;
    let size = file.metadata().map(|m| m.len()).unwrap_or(0);
    Ok((file, size))
}

/// Build a rotated filename: `foo.jsonl` → `foo.jsonl.3`.
fn rotated_name(base: &Path, index: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

fn format_utc_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

// ──────────────────────── tests ────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn config_at(path: PathBuf) -> JsonlConfig {
        JsonlConfig {
            path,
            fallback_path: None,
            max_size_bytes: 1024 * 1024,
            max_rotated_files: 3,
            fsync_interval_secs: 60,
            recovery_interval_secs: 3600,
        }
    }

    #[test]
    fn write_entry_produces_valid_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.jsonl");
        let mut writer = JsonlWriter::open(config_at(path.clone()));

        let mut entry = LogEntry::new(EventType::ScanComplete, Severity::Info);
        entry.files = Some(3);
        entry.bytes = Some(4096);
        writer.write_entry(&entry);
        writer.flush();

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 1);
        let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["event"], "scan_complete");
        assert_eq!(parsed["severity"], "info");
        assert_eq!(parsed["files"], 3);
        assert!(parsed["ts"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn error_entries_carry_codes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("err.jsonl");
        let mut writer = JsonlWriter::open(config_at(path.clone()));

        let err = DprError::corrupt("bad gzip header");
        let entry = LogEntry::new(EventType::Error, Severity::Warning)
            .with_path(Path::new("/tmp/snap.dat"))
            .with_error(&err);
        writer.write_entry(&entry);
        writer.flush();

        let parsed: serde_json::Value =
            serde_json::from_str(fs::read_to_string(&path).unwrap().trim()).unwrap();
        assert_eq!(parsed["error_code"], "DPR-2101");
        assert_eq!(parsed["path"], "/tmp/snap.dat");
    }

    #[test]
    fn shared_writer_accepts_concurrent_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.jsonl");
        let writer = JsonlWriter::open_shared(config_at(path.clone()));

        std::thread::scope(|s| {
            for _ in 0..4 {
                let writer = &writer;
                s.spawn(move || {
                    for _ in 0..25 {
                        writer
                            .lock()
                            .write_entry(&LogEntry::new(EventType::FileSkipped, Severity::Warning));
                    }
                });
            }
        });
        writer.lock().flush();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 100);
        for line in contents.lines() {
            let _: serde_json::Value = serde_json::from_str(line).unwrap();
        }
    }

    #[test]
    fn rotation_shifts_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rot.jsonl");
        let mut writer = JsonlWriter::open(JsonlConfig {
            max_size_bytes: 100, // tiny: force rotation after ~1 entry
            ..config_at(path.clone())
        });

        for _ in 0..10 {
            writer.write_entry(&LogEntry::new(EventType::ScanStart, Severity::Info));
        }
        writer.flush();

        assert!(path.exists());
        assert!(rotated_name(&path, 1).exists());
        assert!(!rotated_name(&path, 5).exists());
    }

    #[test]
    fn fallback_when_primary_dir_unwritable() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where a directory is needed: create_dir_all fails.
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"x").unwrap();
        let fallback = dir.path().join("fallback.jsonl");
        let mut writer = JsonlWriter::open(JsonlConfig {
            fallback_path: Some(fallback.clone()),
            ..config_at(blocker.join("primary.jsonl"))
        });

        assert_eq!(writer.state(), "fallback");
        writer.write_entry(&LogEntry::new(EventType::Error, Severity::Warning));
        writer.flush();

        let contents = fs::read_to_string(&fallback).unwrap();
        assert!(!contents.is_empty());
    }

    #[test]
    fn recovers_to_primary_once_it_is_writable_again() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"x").unwrap();
        let primary = blocker.join("primary.jsonl");
        let fallback = dir.path().join("fallback.jsonl");
        let mut writer = JsonlWriter::open(JsonlConfig {
            fallback_path: Some(fallback.clone()),
            recovery_interval_secs: 0,
            ..config_at(primary.clone())
        });
        writer.write_entry(&LogEntry::new(EventType::ScanStart, Severity::Info));
        assert_eq!(writer.state(), "fallback");

        fs::remove_file(&blocker).unwrap();
        writer.write_entry(&LogEntry::new(EventType::ScanComplete, Severity::Info));
        writer.flush();

        assert_eq!(writer.state(), "normal");
        assert!(fs::read_to_string(&fallback).unwrap().contains("scan_start"));
        let recovered = fs::read_to_string(&primary).unwrap();
        assert!(recovered.contains("scan_complete"));
        assert!(!recovered.contains("scan_start"));
    }

    #[test]
    fn recovery_is_throttled_by_interval() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"x").unwrap();
        let fallback = dir.path().join("fallback.jsonl");
        let mut writer = JsonlWriter::open(JsonlConfig {
            fallback_path: Some(fallback),
            ..config_at(blocker.join("primary.jsonl"))
        });

        fs::remove_file(&blocker).unwrap();
        writer.write_entry(&LogEntry::new(EventType::ScanStart, Severity::Info));
        assert_eq!(writer.state(), "fallback");

        writer.try_recover();
        assert_eq!(writer.state(), "normal");
    }

    #[test]
    fn no_fallback_degrades_to_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"x").unwrap();
        let writer = JsonlWriter::open(config_at(blocker.join("log.jsonl")));
        assert_eq!(writer.state(), "stderr");
    }

    #[test]
    fn entry_optional_fields_omitted_when_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sparse.jsonl");
        let mut writer = JsonlWriter::open(config_at(path.clone()));

        writer.write_entry(&LogEntry::new(EventType::ScanStart, Severity::Info));
        writer.flush();

        let line = fs::read_to_string(&path).unwrap();
        assert!(!line.contains("\"path\""));
        assert!(!line.contains("\"bytes\""));
        assert!(!line.contains("\"profile\""));
    }
}
