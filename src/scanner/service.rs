//! `HashService`: walks a root, fans file tasks out to a worker pool over a
//! bounded queue, and collects the results into a [`DirectoryHash`].
//!
//! Pipeline:
//! ```text
//! walker (calling thread) ──bounded queue──▶ N workers ──▶ ContentIndex
//!                                             │  (I/O permits gate reads)
//!                                             └──▶ ProgressAggregator ──▶ observer
//! ```
//! The producer blocks when the queue is full, so memory stays bounded by
//! `queue_capacity` no matter how large the tree is. Closing the queue is
//! the completion signal: workers exit once it is closed and drained.

#![allow(missing_docs)]

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{self as channel, SendTimeoutError};
use parking_lot::Mutex;
use serde::Serialize;

use crate::core::config::{Config, ServiceOptions, WalkerConfig};
use crate::core::errors::{DprError, Result};
use crate::core::paths::resolve_absolute_path;
use crate::hashing::digest::{FileHash, HashMode, HashProfile};
use crate::hashing::provider::HashProvider;
use crate::index::content::ContentIndex;
use crate::index::directory::DirectoryHash;
use crate::logger::jsonl::{EventType, LogEntry, Severity, SharedJsonlWriter};
use crate::scanner::control::{ScanControl, ScanState};
use crate::scanner::permits::IoPermits;
use crate::scanner::progress::{HashProgress, ProgressAggregator};
use crate::scanner::walker::{DirectoryWalker, ExclusionFn, FileTask, FileWalk};
use crate::scanner::worker::{FileHasher, HashStrategy, Outcome, QUEUE_POLL, ScanShared, run_worker};

/// A file or directory the scan could not read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFailure {
    pub path: PathBuf,
    /// Stable `DPR-nnnn` code.
    pub code: &'static str,
    pub message: String,
}

impl FileFailure {
    pub fn new(path: PathBuf, err: &DprError) -> Self {
        Self {
            path,
            code: err.code(),
            message: err.to_string(),
        }
    }
}

/// Everything one scan produced.
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub snapshot: DirectoryHash,
    /// `true` when the scan stopped early; `snapshot` then holds only the
    /// files that finished hashing before cancellation was observed.
    pub cancelled: bool,
    pub failures: Vec<FileFailure>,
    /// Final counters.
    pub progress: HashProgress,
    pub elapsed: Duration,
}

/// Directory fingerprinting service. Cheap to reuse across scans.
pub struct HashService {
    options: ServiceOptions,
    strategy: HashStrategy,
    walker_config: WalkerConfig,
    exclusion: Option<ExclusionFn>,
    progress_tx: Option<channel::Sender<HashProgress>>,
    activity_log: Option<SharedJsonlWriter>,
}

impl std::fmt::Debug for HashService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashService")
            .field("options", &self.options)
            .field("strategy", &self.strategy)
            .field("walker_config", &self.walker_config)
            .field("exclusion", &self.exclusion.is_some())
            .field("progress", &self.progress_tx.is_some())
            .field("activity_log", &self.activity_log.is_some())
            .finish()
    }
}

impl HashService {
    /// Build a service; invalid options are rejected before any work starts.
    pub fn new(options: ServiceOptions, provider: Arc<dyn HashProvider>) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            strategy: HashStrategy::new(provider, HashMode::FileHash, &options),
            options,
            walker_config: WalkerConfig::default(),
            exclusion: None,
            progress_tx: None,
            activity_log: None,
        })
    }

    /// Service and walker settings taken from a loaded [`Config`].
    pub fn from_config(config: &Config, provider: Arc<dyn HashProvider>) -> Result<Self> {
        Ok(Self::new(config.service.clone(), provider)?.with_walker_config(config.walker.clone()))
    }

    #[must_use]
    pub fn with_mode(mut self, mode: HashMode) -> Self {
        self.strategy = self.strategy.with_mode(mode);
        self
    }

    #[must_use]
    pub fn with_walker_config(mut self, config: WalkerConfig) -> Self {
        self.walker_config = config;
        self
    }

    /// Extra directory-name exclusion applied on top of the configured ones.
    #[must_use]
    pub fn with_exclusion<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.exclusion = Some(Arc::new(predicate));
        self
    }

    /// Publish throttled progress snapshots to `sink`. Sends never block; a
    /// lagging observer misses intermediate snapshots.
    #[must_use]
    pub fn with_progress(mut self, sink: channel::Sender<HashProgress>) -> Self {
        self.progress_tx = Some(sink);
        self
    }

    #[must_use]
    pub fn with_activity_log(mut self, log: SharedJsonlWriter) -> Self {
        self.activity_log = Some(log);
        self
    }

    pub fn options(&self) -> &ServiceOptions {
        &self.options
    }

    pub fn profile(&self) -> HashProfile {
        self.strategy.profile()
    }

    fn walker_for(&self, root: &Path) -> DirectoryWalker {
        let walker = DirectoryWalker::new(root, self.walker_config.clone());
        match &self.exclusion {
            Some(predicate) => {
                let predicate = Arc::clone(predicate);
                walker.with_exclusion(move |name| predicate(name))
            }
            None => walker,
        }
    }

    fn log(&self, entry: &LogEntry) {
        if let Some(log) = &self.activity_log {
            let mut writer = log.lock();
            writer.write_entry(entry);
            writer.flush();
        }
    }

    /// Hash every file under `root`.
    ///
    /// Fails up front with `NotFound` if the root is missing. Unreadable
    /// files and directories are recorded in [`ScanReport::failures`] and
    /// skipped, unless `strict_access` is set, in which case the first one
    /// aborts the scan. Cancelling `control` stops the walk, lets in-flight
    /// reads finish or abort, and returns the partial snapshot with
    /// `cancelled = true`.
    pub fn scan(&self, root: impl AsRef<Path>, control: &ScanControl) -> Result<ScanReport> {
        let started = Instant::now();
        let walker = self.walker_for(root.as_ref());
        let walk = walker.walk().inspect_err(|err| {
            self.log(&LogEntry::new(EventType::Error, Severity::Warning).with_path(walker.root()).with_error(err));
        })?;
        let root = walker.root();
        let profile = self.strategy.profile();

        control.set_state(ScanState::Running);
        let mut start = LogEntry::new(EventType::ScanStart, Severity::Info).with_path(root);
        start.profile = Some(profile.describe());
        self.log(&start);

        let index = ContentIndex::new();
        let permits = IoPermits::new(self.options.io_concurrency);
        let progress = ProgressAggregator::new(
            self.progress_tx.clone(),
            Duration::from_millis(self.options.progress_interval_ms),
        );
        let failures = Mutex::new(Vec::new());
        let shared = ScanShared {
            strategy: &self.strategy,
            root,
            permits: &permits,
            control,
            index: &index,
            progress: &progress,
            failures: &failures,
            activity_log: self.activity_log.as_ref(),
        };

        let (task_tx, task_rx) = channel::bounded::<FileTask>(self.options.queue_capacity);
        let produced = thread::scope(|s| {
            for _ in 0..self.options.worker_count {
                let task_rx = task_rx.clone();
                let shared = &shared;
                s.spawn(move || run_worker(shared, &task_rx));
            }
            drop(task_rx);

            let produced = produce(walk, &task_tx, &shared, self.walker_config.strict_access);
            // Closing the queue tells workers to exit once it is drained.
            drop(task_tx);
            control.begin_draining();
            produced
        });

        let cancelled = control.observe_cancel();
        progress.publish_now();
        let final_progress = progress.snapshot();
        control.set_state(ScanState::Completed);

        if let Err(err) = produced {
            self.log(&LogEntry::new(EventType::Error, Severity::Critical).with_path(root).with_error(&err));
            return Err(err);
        }

        let snapshot = DirectoryHash::from_index(root, profile, index);
        let failures = failures.into_inner();
        let elapsed = started.elapsed();

        let event = if cancelled {
            EventType::ScanCancelled
        } else {
            EventType::ScanComplete
        };
        let mut done = LogEntry::new(event, Severity::Info).with_path(root);
        done.files = Some(snapshot.len() as u64);
        done.bytes = Some(final_progress.bytes_hashed);
        done.failures = Some(failures.len() as u64);
        done.duration_ms = Some(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));
        self.log(&done);

        Ok(ScanReport {
            snapshot,
            cancelled,
            failures,
            progress: final_progress,
            elapsed,
        })
    }

    /// Hash a single file with the same strategy a scan would use. In
    /// file-name mode the key is the file name.
    pub fn hash_file(&self, path: impl AsRef<Path>) -> Result<FileHash> {
        let path = resolve_absolute_path(path.as_ref());
        let meta = fs::metadata(&path).map_err(|source| {
            if source.kind() == ErrorKind::NotFound {
                DprError::NotFound { path: path.clone() }
            } else {
                DprError::access(&path, source)
            }
        })?;
        if !meta.is_file() {
            return Err(DprError::NotFound { path });
        }

        let root = path.parent().map_or_else(|| path.clone(), Path::to_path_buf);
        let permits = IoPermits::new(1);
        let control = ScanControl::new();
        let mut hasher = FileHasher::new(&self.strategy, &root, &permits, &control);
        match hasher.hash(&FileTask {
            path: path.clone(),
            length: meta.len(),
        }) {
            Outcome::Hashed { hash, .. } => Ok(hash),
            Outcome::Failed(err) => Err(err),
            Outcome::Cancelled => Err(DprError::ChannelClosed {
                component: "io permits",
            }),
        }
    }
}

/// Feed walker output into the queue. Returns early (Ok) on cancellation.
fn produce(
    walk: FileWalk<'_>,
    tasks: &channel::Sender<FileTask>,
    shared: &ScanShared<'_>,
    strict_access: bool,
) -> Result<()> {
    for item in walk {
        if shared.control.observe_cancel() {
            return Ok(());
        }
        let task = match item {
            Ok(task) => task,
            Err(err) if strict_access => return Err(err),
            Err(err) => {
                let path = err.path().map_or_else(|| shared.root.to_path_buf(), Path::to_path_buf);
                shared.record_failure(path, &err);
                continue;
            }
        };

        shared.progress.record_discovered();
        let mut pending = task;
        loop {
            match tasks.send_timeout(pending, QUEUE_POLL) {
                Ok(()) => break,
                Err(SendTimeoutError::Timeout(task)) => {
                    if shared.control.observe_cancel() {
                        return Ok(());
                    }
                    pending = task;
                }
                Err(SendTimeoutError::Disconnected(_)) => {
                    return Err(DprError::ChannelClosed {
                        component: "scan queue",
                    });
                }
            }
        }
    }
    Ok(())
}
