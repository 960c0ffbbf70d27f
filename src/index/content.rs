//! Concurrent path → `FileHash` map filled by the scan workers.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::hash::{BuildHasher, Hash, Hasher, RandomState};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::hashing::digest::FileHash;

const DEFAULT_SHARDS: usize = 32;

/// Lock-striped map keyed by absolute path.
///
/// Each path is inserted at most once per scan: the walker emits every path a
/// single time, so a second insert for the same path is rejected rather than
/// overwriting the first result.
#[derive(Debug)]
pub struct ContentIndex {
    shards: Box<[Mutex<HashMap<PathBuf, FileHash>>]>,
    hasher: RandomState,
}

impl Default for ContentIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentIndex {
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    /// Index with `shards` independent locks (at least one).
    pub fn with_shards(shards: usize) -> Self {
        Self {
            shards: (0..shards.max(1))
                .map(|_| Mutex::new(HashMap::new()))
                .collect(),
            hasher: RandomState::new(),
        }
    }

    fn shard_for(&self, path: &Path) -> &Mutex<HashMap<PathBuf, FileHash>> {
        let mut h = self.hasher.build_hasher();
        path.hash(&mut h);
        let idx = usize::try_from(h.finish() % self.shards.len() as u64).unwrap_or(0);
        &self.shards[idx]
    }

    /// Insert a result under its own path. Returns `false` (and keeps the
    /// existing entry) if the path was already present.
    pub fn insert(&self, hash: FileHash) -> bool {
        let mut shard = self.shard_for(hash.path()).lock();
        match shard.entry(hash.path().to_path_buf()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(hash);
                true
            }
        }
    }

    pub fn get(&self, path: &Path) -> Option<FileHash> {
        self.shard_for(path).lock().get(path).cloned()
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.lock().is_empty())
    }

    /// Consume the index, yielding every entry in unspecified order.
    pub fn into_entries(self) -> impl Iterator<Item = (PathBuf, FileHash)> {
        self.shards
            .into_vec()
            .into_iter()
            .flat_map(|shard| shard.into_inner().into_iter())
    }
}
