//! Digest data model: opaque per-buffer hashes and per-file hash sequences.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0100_0000_01b3;

/// FNV-1a over a byte slice.
#[must_use]
pub fn fnv1a(bytes: &[u8]) -> u64 {
    fnv1a_continue(FNV_OFFSET, bytes)
}

fn fnv1a_continue(mut hash: u64, bytes: &[u8]) -> u64 {
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Opaque digest produced by a [`HashProvider`](super::provider::HashProvider)
/// for one buffer or stream.
///
/// Equality and ordering are byte-wise. Serialized as lowercase hex.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DataHash(Box<[u8]>);

impl DataHash {
    pub fn new(bytes: impl Into<Box<[u8]>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// FNV-1a of the digest bytes; also what [`Hash`] feeds to the hasher.
    pub fn fnv1a(&self) -> u64 {
        fnv1a(&self.0)
    }

    pub fn to_hex(&self) -> String {
        encode_hex(&self.0)
    }

    /// Parse a lowercase or uppercase hex string.
    pub fn from_hex(hex: &str) -> Option<Self> {
        decode_hex(hex).map(Self::new)
    }
}

/// Lowercase hex rendering of `bytes`.
pub fn encode_hex(bytes: &[u8]) -> String {
    use fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Inverse of [`encode_hex`]; accepts either case.
pub fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    hex.as_bytes()
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
        })
        .collect()
}

impl Hash for DataHash {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.fnv1a());
    }
}

impl fmt::Debug for DataHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataHash({})", self.to_hex())
    }
}

impl fmt::Display for DataHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for DataHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for DataHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct HexVisitor;

        impl Visitor<'_> for HexVisitor {
            type Value = DataHash;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a hex-encoded digest")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<DataHash, E> {
                DataHash::from_hex(v).ok_or_else(|| E::custom(format!("invalid hex digest {v:?}")))
            }
        }

        deserializer.deserialize_str(HexVisitor)
    }
}

/// Hash result for one file.
///
/// A full hash has exactly one part; a sampled hash has one part per sample
/// offset, in offset order. Equality compares the part sequences only: two
/// files with identical content compare equal regardless of path. Results
/// hashed with different modes or sampling parameters never compare equal,
/// which is why cross-snapshot operations check [`HashProfile`] first.
#[derive(Debug, Clone)]
pub struct FileHash {
    path: PathBuf,
    parts: Vec<DataHash>,
}

impl FileHash {
    pub fn new(path: impl Into<PathBuf>, parts: Vec<DataHash>) -> Self {
        Self {
            path: path.into(),
            parts,
        }
    }

    pub fn single(path: impl Into<PathBuf>, hash: DataHash) -> Self {
        Self::new(path, vec![hash])
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn parts(&self) -> &[DataHash] {
        &self.parts
    }

    pub fn is_sampled(&self) -> bool {
        self.parts.len() > 1
    }

    /// Same digests, different location.
    #[must_use]
    pub fn with_path(&self, path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            parts: self.parts.clone(),
        }
    }

    /// Combined FNV-1a fingerprint of the part sequence.
    pub fn fnv1a(&self) -> u64 {
        self.parts
            .iter()
            .fold(FNV_OFFSET, |acc, part| fnv1a_continue(acc, &part.fnv1a().to_le_bytes()))
    }
}

impl PartialEq for FileHash {
    fn eq(&self, other: &Self) -> bool {
        self.parts == other.parts
    }
}

impl Eq for FileHash {}

impl Hash for FileHash {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.fnv1a());
    }
}

/// What a scan fingerprints for each file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashMode {
    /// Content digest (full or sampled, depending on size).
    #[default]
    FileHash,
    /// Digest of the root-relative path only; no file content is read.
    FileName,
}

impl fmt::Display for HashMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FileHash => f.write_str("file_hash"),
            Self::FileName => f.write_str("file_name"),
        }
    }
}

/// Everything that determines whether two `FileHash` values are comparable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HashProfile {
    pub mode: HashMode,
    pub provider: String,
    pub sample_count: usize,
    pub sample_block_size: usize,
    pub full_hash_threshold: u64,
}

impl HashProfile {
    /// Compact human-readable form used in error messages.
    pub fn describe(&self) -> String {
        format!(
            "{}/{} k={} block={} threshold={}",
            self.mode,
            self.provider,
            self.sample_count,
            self.sample_block_size,
            self.full_hash_threshold
        )
    }
}
