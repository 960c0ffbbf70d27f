//! Per-file hashing and the worker loop that drains the scan queue.
//!
//! Size-adaptive strategy:
//! - `length <= full_hash_threshold`: one permit, the whole file streamed
//!   through the provider, a one-part `FileHash`.
//! - larger files: one block per sample offset, each read under its own
//!   permit (the open happens under the first one) and hashed in
//!   isolation, a K-part `FileHash` in offset order.
//! - `HashMode::FileName`: the root-relative path is hashed; no file I/O.

#![allow(missing_docs)]

use std::fs::File;
use std::io::{self, ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use parking_lot::Mutex;

use crate::core::config::ServiceOptions;
use crate::core::errors::DprError;
use crate::core::paths::relative_key;
use crate::hashing::digest::{FileHash, HashMode, HashProfile};
use crate::hashing::provider::HashProvider;
use crate::index::content::ContentIndex;
use crate::logger::jsonl::{EventType, LogEntry, Severity, SharedJsonlWriter};
use crate::scanner::control::ScanControl;
use crate::scanner::permits::IoPermits;
use crate::scanner::progress::ProgressAggregator;
use crate::scanner::sampler::sample_offsets;
use crate::scanner::service::FileFailure;
use crate::scanner::walker::FileTask;

/// How often an idle worker re-checks cancellation.
pub(crate) const QUEUE_POLL: Duration = Duration::from_millis(50);

/// Hashing parameters shared by every worker of a scan.
#[derive(Clone)]
pub struct HashStrategy {
    provider: Arc<dyn HashProvider>,
    mode: HashMode,
    sample_count: usize,
    block_size: usize,
    full_hash_threshold: u64,
}

impl std::fmt::Debug for HashStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashStrategy")
            .field("provider", &self.provider.name())
            .field("mode", &self.mode)
            .field("sample_count", &self.sample_count)
            .field("block_size", &self.block_size)
            .field("full_hash_threshold", &self.full_hash_threshold)
            .finish()
    }
}

impl HashStrategy {
    pub fn new(provider: Arc<dyn HashProvider>, mode: HashMode, options: &ServiceOptions) -> Self {
        Self {
            provider,
            mode,
            sample_count: options.sample_count,
            block_size: options.sample_block_size,
            full_hash_threshold: options.full_hash_threshold,
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: HashMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> HashMode {
        self.mode
    }

    /// Everything that makes two results comparable.
    pub fn profile(&self) -> HashProfile {
        HashProfile {
            mode: self.mode,
            provider: self.provider.name().to_string(),
            sample_count: self.sample_count,
            sample_block_size: self.block_size,
            full_hash_threshold: self.full_hash_threshold,
        }
    }

    /// Whether a file of `length` bytes is hashed by sampling.
    pub fn is_sampled(&self, length: u64) -> bool {
        self.mode == HashMode::FileHash && length > self.full_hash_threshold
    }
}

/// Result of hashing one task.
#[derive(Debug)]
pub(crate) enum Outcome {
    Hashed { hash: FileHash, bytes: u64 },
    Failed(DprError),
    /// Cancellation observed mid-task; nothing is recorded.
    Cancelled,
}

/// Hashes tasks one at a time, reusing a block buffer across sampled files.
pub(crate) struct FileHasher<'a> {
    strategy: &'a HashStrategy,
    root: &'a Path,
    permits: &'a IoPermits,
    control: &'a ScanControl,
    buffer: Vec<u8>,
}

impl<'a> FileHasher<'a> {
    pub(crate) fn new(
        strategy: &'a HashStrategy,
        root: &'a Path,
        permits: &'a IoPermits,
        control: &'a ScanControl,
    ) -> Self {
        Self {
            strategy,
            root,
            permits,
            control,
            buffer: Vec::new(),
        }
    }

    pub(crate) fn hash(&mut self, task: &FileTask) -> Outcome {
        match self.strategy.mode {
            HashMode::FileName => self.hash_name(task),
            HashMode::FileHash if self.strategy.is_sampled(task.length) => self.hash_sampled(task),
            HashMode::FileHash => self.hash_full(task),
        }
    }

    /// The key is the persisted relative form, so the same tree mounted at
    /// two roots yields the same digests.
    fn hash_name(&self, task: &FileTask) -> Outcome {
        let Some(key) = relative_key(self.root, &task.path) else {
            return Outcome::Failed(DprError::io(
                &task.path,
                io::Error::new(
                    ErrorKind::InvalidInput,
                    "path has no portable form relative to the scan root",
                ),
            ));
        };
        Outcome::Hashed {
            hash: FileHash::single(&task.path, self.strategy.provider.hash_buffer(&key)),
            bytes: 0,
        }
    }

    fn hash_full(&self, task: &FileTask) -> Outcome {
        let Some(_permit) = self.permits.acquire(self.control) else {
            return Outcome::Cancelled;
        };
        let file = match File::open(&task.path) {
            Ok(file) => file,
            Err(err) => return Outcome::Failed(read_error(&task.path, err)),
        };

        let mut reader = CancellableReader {
            inner: file,
            control: self.control,
            bytes: 0,
        };
        match self.strategy.provider.hash_stream(&mut reader) {
            Ok(digest) => Outcome::Hashed {
                hash: FileHash::single(&task.path, digest),
                bytes: reader.bytes,
            },
            Err(_) if self.control.is_cancelled() => Outcome::Cancelled,
            Err(err) => Outcome::Failed(read_error(&task.path, err)),
        }
    }

    /// The file is opened under the first block's permit and the handle
    /// stays open across samples; each block read holds its own permit.
    fn hash_sampled(&mut self, task: &FileTask) -> Outcome {
        let offsets = sample_offsets(
            task.length,
            self.strategy.sample_count,
            self.strategy.block_size,
        );

        self.buffer.resize(self.strategy.block_size, 0);
        let mut file: Option<File> = None;
        let mut parts = Vec::with_capacity(offsets.len());
        let mut bytes = 0u64;
        for offset in offsets {
            let read = {
                let Some(_permit) = self.permits.acquire(self.control) else {
                    return Outcome::Cancelled;
                };
                let handle = match file.as_mut() {
                    Some(handle) => handle,
                    None => match File::open(&task.path) {
                        Ok(opened) => file.insert(opened),
                        Err(err) => return Outcome::Failed(read_error(&task.path, err)),
                    },
                };
                read_block(handle, offset, &mut self.buffer)
            };
            match read {
                Ok(n) => {
                    // Short reads at EOF hash only the bytes actually present.
                    parts.push(self.strategy.provider.hash_buffer(&self.buffer[..n]));
                    bytes += n as u64;
                }
                Err(err) => return Outcome::Failed(read_error(&task.path, err)),
            }
        }

        Outcome::Hashed {
            hash: FileHash::new(&task.path, parts),
            bytes,
        }
    }
}

/// Seek to `offset` and fill `buf` until it is full or EOF is reached.
fn read_block(file: &mut File, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
    file.seek(SeekFrom::Start(offset))?;
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

fn read_error(path: &Path, err: io::Error) -> DprError {
    if err.kind() == ErrorKind::PermissionDenied {
        DprError::access(path, err)
    } else {
        DprError::io(path, err)
    }
}

/// Fails the next read once the scan is cancelled, so a long streaming hash
/// stops within one chunk.
struct CancellableReader<'a, R> {
    inner: R,
    control: &'a ScanControl,
    bytes: u64,
}

impl<R: Read> Read for CancellableReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.control.is_cancelled() {
            return Err(io::Error::other("scan cancelled"));
        }
        let n = self.inner.read(buf)?;
        self.bytes += n as u64;
        Ok(n)
    }
}

/// State every thread of one scan shares.
pub(crate) struct ScanShared<'a> {
    pub strategy: &'a HashStrategy,
    pub root: &'a Path,
    pub permits: &'a IoPermits,
    pub control: &'a ScanControl,
    pub index: &'a ContentIndex,
    pub progress: &'a ProgressAggregator,
    pub failures: &'a Mutex<Vec<FileFailure>>,
    pub activity_log: Option<&'a SharedJsonlWriter>,
}

impl ScanShared<'_> {
    /// Record a skipped file or directory; the scan carries on.
    pub(crate) fn record_failure(&self, path: PathBuf, err: &DprError) {
        self.progress.record_failed();
        if let Some(log) = self.activity_log {
            let entry = LogEntry::new(EventType::FileSkipped, Severity::Warning)
                .with_path(&path)
                .with_error(err);
            log.lock().write_entry(&entry);
        }
        self.failures.lock().push(FileFailure::new(path, err));
    }
}

/// Drain tasks until the queue is closed and empty, or the scan is cancelled.
pub(crate) fn run_worker(shared: &ScanShared<'_>, tasks: &Receiver<FileTask>) {
    let mut hasher = FileHasher::new(shared.strategy, shared.root, shared.permits, shared.control);
    loop {
        if shared.control.is_cancelled() {
            return;
        }
        let task = match tasks.recv_timeout(QUEUE_POLL) {
            Ok(task) => task,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return,
        };
        match hasher.hash(&task) {
            Outcome::Hashed { hash, bytes } => {
                shared.index.insert(hash);
                shared.progress.record_hashed(bytes);
            }
            Outcome::Failed(err) => shared.record_failure(task.path, &err),
            Outcome::Cancelled => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::provider::{Sha256Provider, Xxh3Provider};
    use std::fs;
    use tempfile::TempDir;

    fn options(k: usize, block: usize, threshold: u64) -> ServiceOptions {
        ServiceOptions {
            sample_count: k,
            sample_block_size: block,
            full_hash_threshold: threshold,
            ..ServiceOptions::local_disk()
        }
    }

    fn hash_one(strategy: &HashStrategy, root: &Path, path: &Path) -> Outcome {
        let permits = IoPermits::new(2);
        let control = ScanControl::new();
        let mut hasher = FileHasher::new(strategy, root, &permits, &control);
        let length = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        hasher.hash(&FileTask {
            path: path.to_path_buf(),
            length,
        })
    }

    fn hashed(outcome: Outcome) -> (FileHash, u64) {
        match outcome {
            Outcome::Hashed { hash, bytes } => (hash, bytes),
            other => panic!("expected Hashed, got {other:?}"),
        }
    }

    #[test]
    fn full_hash_matches_buffer_digest() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("small");
        fs::write(&path, b"hellohello").unwrap();
        let strategy = HashStrategy::new(Arc::new(Xxh3Provider), HashMode::FileHash, &options(4, 4, 10));

        let (hash, bytes) = hashed(hash_one(&strategy, tmp.path(), &path));
        assert_eq!(hash.parts().len(), 1);
        assert_eq!(hash.parts()[0], Xxh3Provider.hash_buffer(b"hellohello"));
        assert_eq!(bytes, 10);
    }

    #[test]
    fn threshold_boundary_switches_to_sampling() {
        let tmp = TempDir::new().unwrap();
        let at = tmp.path().join("at");
        let over = tmp.path().join("over");
        fs::write(&at, vec![7u8; 64]).unwrap();
        fs::write(&over, vec![7u8; 65]).unwrap();
        let strategy = HashStrategy::new(Arc::new(Xxh3Provider), HashMode::FileHash, &options(4, 8, 64));

        assert_eq!(hashed(hash_one(&strategy, tmp.path(), &at)).0.parts().len(), 1);
        assert_eq!(hashed(hash_one(&strategy, tmp.path(), &over)).0.parts().len(), 4);
    }

    #[test]
    fn sampled_parts_hash_the_blocks_at_each_offset() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("big");
        let content: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        fs::write(&path, &content).unwrap();
        let strategy = HashStrategy::new(Arc::new(Sha256Provider), HashMode::FileHash, &options(4, 100, 500));

        let (hash, bytes) = hashed(hash_one(&strategy, tmp.path(), &path));
        assert_eq!(bytes, 400);
        for (part, offset) in hash.parts().iter().zip([0usize, 300, 600, 900]) {
            assert_eq!(*part, Sha256Provider.hash_buffer(&content[offset..offset + 100]));
        }
    }

    #[test]
    fn degenerate_sampling_uses_short_block_at_zero() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("tiny");
        fs::write(&path, b"abc").unwrap();
        // Threshold 0 forces sampling for a file smaller than one block.
        let strategy = HashStrategy::new(Arc::new(Xxh3Provider), HashMode::FileHash, &options(5, 64, 0));

        let (hash, bytes) = hashed(hash_one(&strategy, tmp.path(), &path));
        assert_eq!(hash.parts().len(), 5);
        let expected = Xxh3Provider.hash_buffer(b"abc");
        assert!(hash.parts().iter().all(|p| *p == expected));
        assert_eq!(bytes, 15);
    }

    #[test]
    fn repeated_hashing_is_identical() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("f");
        fs::write(&path, vec![42u8; 4096]).unwrap();
        let strategy = HashStrategy::new(Arc::new(Xxh3Provider), HashMode::FileHash, &options(8, 128, 1024));
        let a = hashed(hash_one(&strategy, tmp.path(), &path)).0;
        let b = hashed(hash_one(&strategy, tmp.path(), &path)).0;
        assert_eq!(a, b);
        assert_eq!(a.parts(), b.parts());
    }

    #[test]
    fn file_name_mode_hashes_relative_path() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("dir").join("name.txt");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"content is ignored").unwrap();
        let strategy = HashStrategy::new(Arc::new(Xxh3Provider), HashMode::FileName, &options(4, 4, 1));

        let (hash, bytes) = hashed(hash_one(&strategy, tmp.path(), &path));
        assert_eq!(hash.parts(), &[Xxh3Provider.hash_buffer(b"dir/name.txt")]);
        assert_eq!(bytes, 0);
    }

    #[test]
    fn file_name_mode_outside_root_is_a_failure() {
        let tmp = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        let path = other.path().join("stray.txt");
        fs::write(&path, b"x").unwrap();
        let strategy = HashStrategy::new(Arc::new(Xxh3Provider), HashMode::FileName, &options(4, 4, 1));

        let outcome = hash_one(&strategy, tmp.path(), &path);
        assert!(matches!(outcome, Outcome::Failed(DprError::Io { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn file_name_mode_hashes_raw_name_bytes() {
        use std::ffi::OsString;
        use std::os::unix::ffi::OsStringExt;

        let tmp = TempDir::new().unwrap();
        let path = tmp
            .path()
            .join(PathBuf::from(OsString::from_vec(b"caf\xe9.txt".to_vec())));
        fs::write(&path, b"x").unwrap();
        let strategy = HashStrategy::new(Arc::new(Xxh3Provider), HashMode::FileName, &options(4, 4, 1));

        let (hash, _) = hashed(hash_one(&strategy, tmp.path(), &path));
        assert_eq!(hash.parts(), &[Xxh3Provider.hash_buffer(b"caf\xe9.txt")]);
    }

    #[test]
    fn sampled_file_is_not_opened_without_a_permit() {
        // A missing file would fail on open; with no permit obtainable the
        // task is abandoned before the open is attempted.
        let tmp = TempDir::new().unwrap();
        let strategy = HashStrategy::new(Arc::new(Xxh3Provider), HashMode::FileHash, &options(4, 4, 8));
        let permits = IoPermits::new(1);
        let control = ScanControl::new();
        control.cancel();
        let mut hasher = FileHasher::new(&strategy, tmp.path(), &permits, &control);
        let outcome = hasher.hash(&FileTask {
            path: tmp.path().join("absent"),
            length: 4096,
        });
        assert!(matches!(outcome, Outcome::Cancelled));
    }

    #[test]
    fn sampled_hash_returns_every_permit() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("big");
        fs::write(&path, vec![3u8; 2048]).unwrap();
        let strategy = HashStrategy::new(Arc::new(Xxh3Provider), HashMode::FileHash, &options(4, 64, 256));
        let permits = IoPermits::new(1);
        let control = ScanControl::new();
        let mut hasher = FileHasher::new(&strategy, tmp.path(), &permits, &control);

        let (hash, _) = hashed(hasher.hash(&FileTask { path, length: 2048 }));
        assert_eq!(hash.parts().len(), 4);
        assert_eq!(permits.available(), 1);
    }

    #[test]
    fn missing_file_fails_without_panicking() {
        let tmp = TempDir::new().unwrap();
        let strategy = HashStrategy::new(Arc::new(Xxh3Provider), HashMode::FileHash, &options(4, 4, 10));
        let outcome = hash_one(&strategy, tmp.path(), &tmp.path().join("vanished"));
        assert!(matches!(outcome, Outcome::Failed(DprError::Io { .. })));
    }

    #[test]
    fn cancelled_scan_abandons_task() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("f");
        fs::write(&path, vec![1u8; 1024]).unwrap();
        let strategy = HashStrategy::new(Arc::new(Xxh3Provider), HashMode::FileHash, &options(4, 4, 4096));
        let permits = IoPermits::new(1);
        let control = ScanControl::new();
        control.cancel();
        let mut hasher = FileHasher::new(&strategy, tmp.path(), &permits, &control);
        let outcome = hasher.hash(&FileTask {
            path,
            length: 1024,
        });
        assert!(matches!(outcome, Outcome::Cancelled));
    }

    #[test]
    fn profile_reflects_strategy() {
        let strategy = HashStrategy::new(Arc::new(Sha256Provider), HashMode::FileHash, &options(3, 16, 99));
        let profile = strategy.profile();
        assert_eq!(profile.provider, "sha256");
        assert_eq!(profile.sample_count, 3);
        assert_eq!(strategy.with_mode(HashMode::FileName).profile().mode, HashMode::FileName);
    }
}
