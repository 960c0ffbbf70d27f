//! Persistence codec: gzip-compressed JSON with root-relative paths.
//!
//! ```json
//! {"version":1,"root":"/mnt/backup","profile":{...},
//!  "files":[{"path":"photos/a.jpg","parts":["9f..."]}]}
//! ```
//!
//! Entries are written in path order, so serializing the same snapshot twice
//! produces the same bytes. A relative path that is not valid UTF-8 (legal on
//! Unix) is stored as `"path_bytes"`, the hex of its raw bytes, in place of
//! `"path"`. Anything that fails to decompress or decode,
//! and anything that decodes to an inconsistent snapshot, is `CorruptData`.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};

use crate::core::errors::{DprError, Result};
use crate::core::paths::{rejoin, relative_key};
use crate::hashing::digest::{DataHash, FileHash, HashProfile, decode_hex, encode_hex};
use crate::index::directory::DirectoryHash;

/// Current artifact format version.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct ArtifactOut<'a> {
    version: u32,
    root: &'a Path,
    profile: &'a HashProfile,
    files: Vec<EntryOut<'a>>,
}

#[derive(Serialize)]
struct EntryOut<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    path_bytes: Option<String>,
    parts: &'a [DataHash],
}

impl<'a> EntryOut<'a> {
    fn new(key: Vec<u8>, parts: &'a [DataHash]) -> Self {
        match String::from_utf8(key) {
            Ok(path) => Self {
                path: Some(path),
                path_bytes: None,
                parts,
            },
            Err(raw) => Self {
                path: None,
                path_bytes: Some(encode_hex(raw.as_bytes())),
                parts,
            },
        }
    }
}

#[derive(Deserialize)]
struct Header {
    version: u32,
}

#[derive(Deserialize)]
struct ArtifactIn {
    root: PathBuf,
    profile: HashProfile,
    files: Vec<EntryIn>,
}

#[derive(Deserialize)]
struct EntryIn {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    path_bytes: Option<String>,
    parts: Vec<DataHash>,
}

impl EntryIn {
    /// The raw relative key; exactly one of the two forms must be present.
    fn key(&self) -> Result<Vec<u8>> {
        match (&self.path, &self.path_bytes) {
            (Some(path), None) => Ok(path.clone().into_bytes()),
            (None, Some(hex)) => decode_hex(hex)
                .ok_or_else(|| DprError::corrupt(format!("invalid path_bytes {hex:?}"))),
            _ => Err(DprError::corrupt(
                "entry needs exactly one of path or path_bytes",
            )),
        }
    }
}

fn encode_error(details: impl ToString) -> DprError {
    DprError::Serialization {
        context: "snapshot",
        details: details.to_string(),
    }
}

/// Encode a snapshot into its compressed on-disk form.
pub fn serialize(snapshot: &DirectoryHash) -> Result<Vec<u8>> {
    let root = snapshot.root();
    let files = snapshot
        .files()
        .map(|hash| {
            relative_key(root, hash.path())
                .map(|key| EntryOut::new(key, hash.parts()))
                .ok_or_else(|| {
                    encode_error(format!(
                        "path has no portable form relative to the root: {}",
                        hash.path().display()
                    ))
                })
        })
        .collect::<Result<Vec<_>>>()?;

    let artifact = ArtifactOut {
        version: FORMAT_VERSION,
        root,
        profile: snapshot.profile(),
        files,
    };

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    serde_json::to_writer(&mut encoder, &artifact).map_err(encode_error)?;
    encoder.finish().map_err(encode_error)
}

/// Decode an artifact, re-anchoring its entries at the stored root.
pub fn deserialize(bytes: &[u8]) -> Result<DirectoryHash> {
    decode(bytes, None)
}

/// Decode an artifact, re-anchoring its entries at `root` instead of the
/// stored one (the tree was moved or is mounted elsewhere).
pub fn deserialize_at(bytes: &[u8], root: &Path) -> Result<DirectoryHash> {
    decode(bytes, Some(root))
}

fn decode(bytes: &[u8], root_override: Option<&Path>) -> Result<DirectoryHash> {
    let mut json = Vec::new();
    GzDecoder::new(bytes)
        .read_to_end(&mut json)
        .map_err(|e| DprError::corrupt(format!("gzip: {e}")))?;

    let header: Header = serde_json::from_slice(&json)?;
    if header.version != FORMAT_VERSION {
        return Err(DprError::corrupt(format!(
            "unsupported format version {} (expected {FORMAT_VERSION})",
            header.version
        )));
    }
    let artifact: ArtifactIn = serde_json::from_slice(&json)?;

    let root = root_override.map_or(artifact.root, Path::to_path_buf);
    let mut snapshot = DirectoryHash::new(root.clone(), artifact.profile);
    for entry in artifact.files {
        let key = entry.key()?;
        let shown = String::from_utf8_lossy(&key).into_owned();
        let path = rejoin(&root, &key)
            .ok_or_else(|| DprError::corrupt(format!("invalid relative path {shown:?}")))?;
        if entry.parts.is_empty() {
            return Err(DprError::corrupt(format!("no digest parts for {shown:?}")));
        }
        if !snapshot.insert(FileHash::new(path, entry.parts)) {
            return Err(DprError::corrupt(format!("duplicate path {shown:?}")));
        }
    }
    Ok(snapshot)
}

/// Write a snapshot to `path` atomically (temp file in the same directory,
/// then rename).
pub fn save(path: &Path, snapshot: &DirectoryHash) -> Result<()> {
    let bytes = serialize(snapshot)?;

    let file_name = path
        .file_name()
        .map_or_else(|| "snapshot".into(), |n| n.to_string_lossy().into_owned());
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));

    let write = || -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()
    };
    if let Err(source) = write() {
        let _ = fs::remove_file(&tmp);
        return Err(DprError::io(&tmp, source));
    }
    fs::rename(&tmp, path).map_err(|source| {
        let _ = fs::remove_file(&tmp);
        DprError::io(path, source)
    })
}

/// Read and decode a snapshot file.
pub fn load(path: &Path) -> Result<DirectoryHash> {
    let bytes = fs::read(path).map_err(|source| DprError::io(path, source))?;
    deserialize(&bytes)
}
