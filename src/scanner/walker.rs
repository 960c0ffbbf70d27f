//! Recursive file enumeration with directory-name exclusions and symlink safety.
//!
//! The walker is the producer side of a scan: it stats every regular file
//! once and yields one [`FileTask`] per file. Enumeration is lazy, so the
//! scan's bounded queue throttles how far ahead of the hashers it runs.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::config::WalkerConfig;
use crate::core::errors::{DprError, Result};
use crate::core::paths::resolve_absolute_path;

/// Directory-name fragments that are always skipped: OS trash and
/// volume-metadata directories. Matched case-insensitively as substrings.
pub const DEFAULT_EXCLUDED_DIR_NAMES: &[&str] = &[
    "$recycle.bin",
    "recycler",
    "system volume information",
    ".trash",
    ".spotlight-v100",
    ".fseventsd",
];

/// One file to hash: its absolute path and the length observed at walk time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTask {
    pub path: PathBuf,
    pub length: u64,
}

/// Caller-supplied directory-name predicate; `true` skips the subtree.
pub type ExclusionFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Enumerates every regular file under a root.
///
/// Safety invariants:
/// - Symlinks are skipped unless `follow_symlinks` is set; when following,
///   each real directory is visited at most once (no loops).
/// - Excluded directory names prune the whole subtree.
/// - Only regular files are emitted (FIFOs, sockets and devices are skipped,
///   so a scan can never block opening one).
#[derive(Clone)]
pub struct DirectoryWalker {
    root: PathBuf,
    config: WalkerConfig,
    excluded: Vec<String>,
    custom_exclusion: Option<ExclusionFn>,
}

impl fmt::Debug for DirectoryWalker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryWalker")
            .field("root", &self.root)
            .field("config", &self.config)
            .field("excluded", &self.excluded)
            .field("custom_exclusion", &self.custom_exclusion.is_some())
            .finish()
    }
}

impl DirectoryWalker {
    pub fn new(root: impl AsRef<Path>, config: WalkerConfig) -> Self {
        let excluded = DEFAULT_EXCLUDED_DIR_NAMES
            .iter()
            .map(|name| (*name).to_string())
            .chain(
                config
                    .excluded_dir_names
                    .iter()
                    .map(|name| name.trim().to_lowercase())
                    .filter(|name| !name.is_empty()),
            )
            .collect();
        Self {
            root: resolve_absolute_path(root.as_ref()),
            config,
            excluded,
            custom_exclusion: None,
        }
    }

    /// Add a predicate over directory names; matching subtrees are skipped.
    #[must_use]
    pub fn with_exclusion<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.custom_exclusion = Some(Arc::new(predicate));
        self
    }

    /// Absolute, normalized root of the walk.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether a directory with this name is pruned.
    pub fn is_excluded(&self, dir_name: &str) -> bool {
        let lower = dir_name.to_lowercase();
        self.excluded.iter().any(|frag| lower.contains(frag.as_str()))
            || self
                .custom_exclusion
                .as_ref()
                .is_some_and(|predicate| predicate(dir_name))
    }

    /// Start a fresh enumeration.
    ///
    /// Fails with `NotFound` when the root is missing or is not a directory.
    /// Per-item failures are yielded as `Err(Access)` items; the iterator
    /// keeps going after them.
    pub fn walk(&self) -> Result<FileWalk<'_>> {
        match fs::metadata(&self.root) {
            Ok(meta) if meta.is_dir() => {}
            _ => {
                return Err(DprError::NotFound {
                    path: self.root.clone(),
                });
            }
        }

        let mut visited = HashSet::new();
        if self.config.follow_symlinks
            && let Ok(real) = fs::canonicalize(&self.root)
        {
            visited.insert(real);
        }

        Ok(FileWalk {
            walker: self,
            pending_dirs: vec![self.root.clone()],
            current: None,
            visited,
        })
    }

    /// Collect every readable file, silently skipping unreadable items.
    pub fn collect_files(&self) -> Result<Vec<FileTask>> {
        Ok(self.walk()?.filter_map(std::result::Result::ok).collect())
    }
}

/// Lazy depth-first iterator over the files under a walker's root.
pub struct FileWalk<'a> {
    walker: &'a DirectoryWalker,
    pending_dirs: Vec<PathBuf>,
    current: Option<(PathBuf, fs::ReadDir)>,
    /// Canonical directories already queued (only tracked when following symlinks).
    visited: HashSet<PathBuf>,
}

impl FileWalk<'_> {
    /// Classify one directory entry; `None` means "nothing to yield".
    fn visit(&mut self, entry: &fs::DirEntry) -> Option<Result<FileTask>> {
        let path = entry.path();
        let file_type = match entry.file_type() {
            Ok(ft) => ft,
            Err(err) => return Some(Err(DprError::access(&path, err))),
        };

        let meta = if file_type.is_symlink() {
            if !self.walker.config.follow_symlinks {
                return None;
            }
            match fs::metadata(&path) {
                Ok(meta) => meta,
                // Dangling link.
                Err(_) => return None,
            }
        } else if file_type.is_dir() {
            self.enqueue_dir(path, entry.file_name().to_string_lossy().as_ref());
            return None;
        } else if file_type.is_file() {
            match entry.metadata() {
                Ok(meta) => meta,
                Err(err) => return Some(Err(DprError::access(&path, err))),
            }
        } else {
            return None;
        };

        if meta.is_dir() {
            self.enqueue_dir(path, entry.file_name().to_string_lossy().as_ref());
            None
        } else if meta.is_file() {
            Some(Ok(FileTask {
                path,
                length: meta.len(),
            }))
        } else {
            None
        }
    }

    fn enqueue_dir(&mut self, path: PathBuf, name: &str) {
        if self.walker.is_excluded(name) {
            return;
        }
        if self.walker.config.follow_symlinks {
            match fs::canonicalize(&path) {
                Ok(real) => {
                    if !self.visited.insert(real) {
                        return;
                    }
                }
                Err(_) => return,
            }
        }
        self.pending_dirs.push(path);
    }
}

impl Iterator for FileWalk<'_> {
    type Item = Result<FileTask>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((dir, read_dir)) = self.current.as_mut() {
                match read_dir.next() {
                    Some(Ok(entry)) => {
                        if let Some(item) = self.visit(&entry) {
                            return Some(item);
                        }
                    }
                    // Entry-level read failure: the rest of the listing may still be fine.
                    Some(Err(err)) => return Some(Err(DprError::access(dir, err))),
                    None => self.current = None,
                }
                continue;
            }

            let dir = self.pending_dirs.pop()?;
            match fs::read_dir(&dir) {
                Ok(read_dir) => self.current = Some((dir, read_dir)),
                Err(err) => return Some(Err(DprError::access(&dir, err))),
            }
        }
    }
}
