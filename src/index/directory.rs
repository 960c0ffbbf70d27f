//! `DirectoryHash`: the completed, immutable result of one scan.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::core::errors::{DprError, Result};
use crate::hashing::digest::{FileHash, HashProfile};
use crate::index::content::ContentIndex;

/// Snapshot of a directory: every file's `FileHash`, keyed by absolute path,
/// plus the root and the profile the hashes were produced with.
///
/// Entries are kept sorted by path, so iteration (and the persisted form) is
/// deterministic. Equality compares root, profile and every entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryHash {
    root: PathBuf,
    profile: HashProfile,
    files: BTreeMap<PathBuf, FileHash>,
}

impl DirectoryHash {
    pub fn new(root: impl Into<PathBuf>, profile: HashProfile) -> Self {
        Self {
            root: root.into(),
            profile,
            files: BTreeMap::new(),
        }
    }

    /// Freeze a scan's content index into a snapshot.
    pub fn from_index(root: impl Into<PathBuf>, profile: HashProfile, index: ContentIndex) -> Self {
        let mut snapshot = Self::new(root, profile);
        for (_, hash) in index.into_entries() {
            snapshot.insert(hash);
        }
        snapshot
    }

    /// Add one entry. Rejected (returns `false`) when the path is already
    /// present or does not lie strictly below the root.
    pub fn insert(&mut self, hash: FileHash) -> bool {
        let path = hash.path();
        if path == self.root || !path.starts_with(&self.root) || self.files.contains_key(path) {
            return false;
        }
        self.files.insert(path.to_path_buf(), hash);
        true
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn profile(&self) -> &HashProfile {
        &self.profile
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get(&self, path: &Path) -> Option<&FileHash> {
        self.files.get(path)
    }

    /// Entries in path order.
    pub fn files(&self) -> impl Iterator<Item = &FileHash> {
        self.files.values()
    }

    /// Entries in path order, with paths relative to the root.
    pub fn relative_files(&self) -> impl Iterator<Item = (&Path, &FileHash)> {
        self.files.iter().filter_map(|(path, hash)| {
            path.strip_prefix(&self.root).ok().map(|rel| (rel, hash))
        })
    }

    /// Same entries anchored at `new_root` (e.g. a backup mounted elsewhere).
    #[must_use]
    pub fn rebase(&self, new_root: impl Into<PathBuf>) -> Self {
        let new_root = new_root.into();
        let files = self
            .relative_files()
            .map(|(rel, hash)| {
                let path = new_root.join(rel);
                (path.clone(), hash.with_path(path))
            })
            .collect();
        Self {
            root: new_root,
            profile: self.profile.clone(),
            files,
        }
    }

    /// Fail unless `other` was hashed with the same mode and parameters.
    pub fn ensure_compatible(&self, other: &Self) -> Result<()> {
        if self.profile == other.profile {
            Ok(())
        } else {
            Err(DprError::IncompatibleProfiles {
                left: self.profile.describe(),
                right: other.profile.describe(),
            })
        }
    }

    /// Total sample parts stored, a rough size indicator.
    pub fn part_count(&self) -> usize {
        self.files.values().map(|h| h.parts().len()).sum()
    }
}
