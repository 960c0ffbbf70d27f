//! Drift detection between two snapshots of the same tree.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::core::errors::Result;
use crate::hashing::digest::FileHash;
use crate::index::directory::DirectoryHash;

/// What changed between an old and a new snapshot. Paths are relative to
/// each snapshot's root, so a tree that moved mount points diffs cleanly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotDiff {
    /// Present only in the new snapshot.
    pub added: Vec<PathBuf>,
    /// Present only in the old snapshot.
    pub removed: Vec<PathBuf>,
    /// Present in both with different digests.
    pub changed: Vec<PathBuf>,
    pub unchanged_count: usize,
}

impl SnapshotDiff {
    pub fn is_clean(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// Compare two snapshots entry by entry; both must share one hash profile.
pub fn compare(old: &DirectoryHash, new: &DirectoryHash) -> Result<SnapshotDiff> {
    old.ensure_compatible(new)?;

    let old_files: BTreeMap<&Path, &FileHash> = old.relative_files().collect();
    let mut diff = SnapshotDiff::default();

    for (rel, hash) in new.relative_files() {
        match old_files.get(rel) {
            None => diff.added.push(rel.to_path_buf()),
            Some(previous) if *previous == hash => diff.unchanged_count += 1,
            Some(_) => diff.changed.push(rel.to_path_buf()),
        }
    }

    let new_files: BTreeMap<&Path, &FileHash> = new.relative_files().collect();
    diff.removed = old_files
        .keys()
        .filter(|rel| !new_files.contains_key(*rel))
        .map(|rel| rel.to_path_buf())
        .collect();

    Ok(diff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::DprError;
    use crate::hashing::digest::{DataHash, HashMode, HashProfile};

    fn profile(provider: &str) -> HashProfile {
        HashProfile {
            mode: HashMode::FileHash,
            provider: provider.to_string(),
            sample_count: 2,
            sample_block_size: 8,
            full_hash_threshold: 32,
        }
    }

    fn snapshot(root: &str, entries: &[(&str, u8)]) -> DirectoryHash {
        let mut dh = DirectoryHash::new(root, profile("xxh3-128"));
        for (rel, byte) in entries {
            dh.insert(FileHash::single(
                format!("{root}/{rel}"),
                DataHash::new(vec![*byte; 16]),
            ));
        }
        dh
    }

    #[test]
    fn detects_added_removed_and_changed() {
        let old = snapshot("/mnt/a", &[("keep", 1), ("edit", 2), ("gone", 3)]);
        let new = snapshot("/mnt/b", &[("keep", 1), ("edit", 9), ("sub/new", 4)]);
        let diff = compare(&old, &new).unwrap();
        assert_eq!(diff.added, vec![PathBuf::from("sub/new")]);
        assert_eq!(diff.removed, vec![PathBuf::from("gone")]);
        assert_eq!(diff.changed, vec![PathBuf::from("edit")]);
        assert_eq!(diff.unchanged_count, 1);
        assert!(!diff.is_clean());
    }

    #[test]
    fn identical_snapshots_are_clean() {
        let snap = snapshot("/x", &[("a", 1), ("b/c", 2)]);
        let diff = compare(&snap, &snap.rebase("/y")).unwrap();
        assert!(diff.is_clean());
        assert_eq!(diff.unchanged_count, 2);
    }

    #[test]
    fn mismatched_profiles_are_refused() {
        let old = snapshot("/x", &[("a", 1)]);
        let new = DirectoryHash::new("/x", profile("sha256"));
        assert!(matches!(
            compare(&old, &new),
            Err(DprError::IncompatibleProfiles { .. })
        ));
    }
}
