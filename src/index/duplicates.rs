//! Duplicate finder: groups snapshot entries with identical part sequences.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::core::errors::Result;
use crate::hashing::digest::DataHash;
use crate::index::directory::DirectoryHash;

/// Paths whose `FileHash` values are equal, plus the shared digest parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub parts: Vec<DataHash>,
    /// Sorted, at least two entries.
    pub paths: Vec<PathBuf>,
}

/// Duplicate groups within one snapshot, ordered by their first path.
pub fn find_duplicates(snapshot: &DirectoryHash) -> Vec<DuplicateGroup> {
    group(snapshot.files().map(|f| (f.parts(), f.path())))
}

/// Duplicate groups across several snapshots (e.g. two backup drives).
///
/// All snapshots must share one hash profile; comparing a sampled hash with a
/// full hash would silently report "different", so the mix is refused with
/// `IncompatibleProfiles` instead.
pub fn find_duplicates_across(snapshots: &[&DirectoryHash]) -> Result<Vec<DuplicateGroup>> {
    let Some((first, rest)) = snapshots.split_first() else {
        return Ok(Vec::new());
    };
    for other in rest {
        first.ensure_compatible(other)?;
    }
    Ok(group(
        snapshots
            .iter()
            .flat_map(|s| s.files())
            .map(|f| (f.parts(), f.path())),
    ))
}

fn group<'a>(entries: impl Iterator<Item = (&'a [DataHash], &'a Path)>) -> Vec<DuplicateGroup> {
    let mut by_parts: HashMap<&[DataHash], Vec<&Path>> = HashMap::new();
    for (parts, path) in entries {
        by_parts.entry(parts).or_default().push(path);
    }

    let mut groups: Vec<DuplicateGroup> = by_parts
        .into_iter()
        .filter(|(_, paths)| paths.len() > 1)
        .map(|(parts, paths)| {
            let mut paths: Vec<PathBuf> = paths.into_iter().map(Path::to_path_buf).collect();
            paths.sort();
            paths.dedup();
            DuplicateGroup {
                parts: parts.to_vec(),
                paths,
            }
        })
        .filter(|g| g.paths.len() > 1)
        .collect();
    groups.sort_by(|a, b| a.paths.cmp(&b.paths));
    groups
}
