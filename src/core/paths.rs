//! Path helpers: absolute resolution and the root-relative form used by
//! persisted snapshots.
//!
//! The live index always holds absolute paths. Relative keys only exist at
//! the serialization boundary, written with `/` separators so an artifact
//! produced on one platform or mount point can be re-anchored on another.

use std::env;
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

/// Resolve a path to an absolute, normalized path.
///
/// Uses `fs::canonicalize` when the path exists; otherwise the path is made
/// absolute relative to CWD and `.`/`..` are resolved syntactically.
pub fn resolve_absolute_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
    };

    if let Ok(canonical) = std::fs::canonicalize(&absolute) {
        return strip_verbatim(canonical);
    }

    normalize_syntactic(&absolute)
}

/// Express `path` relative to `root` as a `/`-separated byte key.
///
/// On Unix the key holds the file names exactly as stored on disk, so names
/// that are not valid UTF-8 survive. Elsewhere names must be valid Unicode.
/// Returns `None` when `path` is not under `root` or is `root` itself.
pub fn relative_key(root: &Path, path: &Path) -> Option<Vec<u8>> {
    let rel = path.strip_prefix(root).ok()?;
    let mut key = Vec::new();
    for component in rel.components() {
        let Component::Normal(name) = component else {
            return None;
        };
        if !key.is_empty() {
            key.push(b'/');
        }
        key.extend_from_slice(name_to_bytes(name)?);
    }
    (!key.is_empty()).then_some(key)
}

/// Rejoin a `/`-separated relative key onto `root`.
///
/// Every segment must name exactly one normal path component on this
/// platform: empty keys, a leading `/`, empty segments, `.` and `..` are
/// rejected, as is anything the platform would read as a prefix or a nested
/// separator.
pub fn rejoin(root: &Path, key: &[u8]) -> Option<PathBuf> {
    if key.is_empty() {
        return None;
    }
    let mut joined = root.to_path_buf();
    for segment in key.split(|&b| b == b'/') {
        let name = name_from_bytes(segment)?;
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(normal)), None) if normal == name => joined.push(name),
            _ => return None,
        }
    }
    Some(joined)
}

#[cfg(unix)]
fn name_to_bytes(name: &OsStr) -> Option<&[u8]> {
    use std::os::unix::ffi::OsStrExt;
    Some(name.as_bytes())
}

#[cfg(not(unix))]
fn name_to_bytes(name: &OsStr) -> Option<&[u8]> {
    name.to_str().map(str::as_bytes)
}

#[cfg(unix)]
fn name_from_bytes(bytes: &[u8]) -> Option<&OsStr> {
    use std::os::unix::ffi::OsStrExt;
    Some(OsStr::from_bytes(bytes))
}

#[cfg(not(unix))]
fn name_from_bytes(bytes: &[u8]) -> Option<&OsStr> {
    std::str::from_utf8(bytes).ok().map(OsStr::new)
}

fn normalize_syntactic(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(..) | Component::RootDir | Component::Normal(_) => {
                components.push(component);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if let Some(Component::Normal(_)) = components.last() {
                    components.pop();
                }
            }
        }
    }
    components.into_iter().collect()
}

/// Drop the `\\?\` prefix `canonicalize` adds on Windows so keys stay
/// comparable with paths produced by directory enumeration.
fn strip_verbatim(path: PathBuf) -> PathBuf {
    #[cfg(windows)]
    {
        if let Some(s) = path.to_str()
            && let Some(stripped) = s.strip_prefix(r"\\?\")
            && !stripped.starts_with("UNC")
        {
            return PathBuf::from(stripped);
        }
    }
    path
}
