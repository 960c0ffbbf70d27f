//! Pluggable hash algorithms.
//!
//! The scan pipeline only ever talks to `dyn HashProvider`; which algorithm is
//! plugged in is decided once, at construction, by the caller.

#![allow(missing_docs)]

use std::fmt;
use std::io::{self, ErrorKind, Read};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use xxhash_rust::xxh3::{Xxh3, xxh3_128};
use xxhash_rust::xxh32::{Xxh32, xxh32};

use super::digest::DataHash;

/// Read chunk size for streaming digests.
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Capability that turns bytes into an opaque [`DataHash`].
///
/// `hash_stream` and `hash_buffer` must agree: streaming a reader yields the
/// same digest as hashing its full contents in memory.
pub trait HashProvider: Send + Sync {
    /// Stable identifier recorded in snapshots (e.g. `xxh3-128`).
    fn name(&self) -> &'static str;

    /// Hash an in-memory buffer.
    fn hash_buffer(&self, bytes: &[u8]) -> DataHash;

    /// Hash everything a reader yields until EOF.
    fn hash_stream(&self, reader: &mut dyn Read) -> io::Result<DataHash>;
}

/// XXH3 128-bit. The default provider.
#[derive(Debug, Default, Clone, Copy)]
pub struct Xxh3Provider;

impl HashProvider for Xxh3Provider {
    fn name(&self) -> &'static str {
        "xxh3-128"
    }

    fn hash_buffer(&self, bytes: &[u8]) -> DataHash {
        DataHash::new(xxh3_128(bytes).to_be_bytes().to_vec())
    }

    fn hash_stream(&self, reader: &mut dyn Read) -> io::Result<DataHash> {
        let mut state = Box::new(Xxh3::new());
        for_each_chunk(reader, |chunk| state.update(chunk))?;
        Ok(DataHash::new(state.digest128().to_be_bytes().to_vec()))
    }
}

/// Legacy XXH32 (seed 0), kept for snapshots produced by older tooling.
#[derive(Debug, Default, Clone, Copy)]
pub struct Xxh32Provider;

impl HashProvider for Xxh32Provider {
    fn name(&self) -> &'static str {
        "xxh32"
    }

    fn hash_buffer(&self, bytes: &[u8]) -> DataHash {
        DataHash::new(xxh32(bytes, 0).to_be_bytes().to_vec())
    }

    fn hash_stream(&self, reader: &mut dyn Read) -> io::Result<DataHash> {
        let mut state = Xxh32::new(0);
        for_each_chunk(reader, |chunk| state.update(chunk))?;
        Ok(DataHash::new(state.digest().to_be_bytes().to_vec()))
    }
}

/// SHA-256, for callers who want a cryptographic digest on the full-hash path.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256Provider;

impl HashProvider for Sha256Provider {
    fn name(&self) -> &'static str {
        "sha256"
    }

    fn hash_buffer(&self, bytes: &[u8]) -> DataHash {
        DataHash::new(Sha256::digest(bytes).to_vec())
    }

    fn hash_stream(&self, reader: &mut dyn Read) -> io::Result<DataHash> {
        let mut hasher = Sha256::new();
        for_each_chunk(reader, |chunk| hasher.update(chunk))?;
        Ok(DataHash::new(hasher.finalize().to_vec()))
    }
}

/// Built-in algorithm selector for configuration and the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Xxh3,
    Xxh32,
    Sha256,
}

impl HashAlgorithm {
    /// Instantiate the provider for this algorithm.
    pub fn provider(self) -> Arc<dyn HashProvider> {
        match self {
            Self::Xxh3 => Arc::new(Xxh3Provider),
            Self::Xxh32 => Arc::new(Xxh32Provider),
            Self::Sha256 => Arc::new(Sha256Provider),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Xxh3 => f.write_str("xxh3"),
            Self::Xxh32 => f.write_str("xxh32"),
            Self::Sha256 => f.write_str("sha256"),
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "xxh3" | "xxh3-128" => Ok(Self::Xxh3),
            "xxh32" => Ok(Self::Xxh32),
            "sha256" => Ok(Self::Sha256),
            other => Err(format!("unknown hash algorithm {other:?}")),
        }
    }
}

/// Feed a reader to `sink` in fixed-size chunks until EOF.
fn for_each_chunk(reader: &mut dyn Read, mut sink: impl FnMut(&[u8])) -> io::Result<u64> {
    let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        match reader.read(&mut buf) {
            Ok(0) => return Ok(total),
            Ok(n) => {
                sink(&buf[..n]);
                total += n as u64;
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn providers() -> Vec<Arc<dyn HashProvider>> {
        vec![
            HashAlgorithm::Xxh3.provider(),
            HashAlgorithm::Xxh32.provider(),
            HashAlgorithm::Sha256.provider(),
        ]
    }

    #[test]
    fn stream_and_buffer_agree() {
        // Larger than one chunk so the streaming path updates more than once.
        let data: Vec<u8> = (0..(STREAM_CHUNK_SIZE * 3 + 17))
            .map(|i| (i % 251) as u8)
            .collect();
        for provider in providers() {
            let streamed = provider.hash_stream(&mut Cursor::new(&data)).unwrap();
            assert_eq!(
                streamed,
                provider.hash_buffer(&data),
                "{} stream/buffer mismatch",
                provider.name()
            );
        }
    }

    #[test]
    fn digest_widths() {
        assert_eq!(Xxh3Provider.hash_buffer(b"x").len(), 16);
        assert_eq!(Xxh32Provider.hash_buffer(b"x").len(), 4);
        assert_eq!(Sha256Provider.hash_buffer(b"x").len(), 32);
    }

    #[test]
    fn sha256_known_vector() {
        assert_eq!(
            Sha256Provider.hash_buffer(b"abc").to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn different_content_different_hash() {
        for provider in providers() {
            assert_ne!(provider.hash_buffer(b"hello"), provider.hash_buffer(b"world"));
        }
    }

    #[test]
    fn names_are_distinct() {
        let names: std::collections::HashSet<_> = providers().iter().map(|p| p.name()).collect();
        assert_eq!(names.len(), 3);
    }

    #[test]
    fn algorithm_parses_from_str() {
        assert_eq!("XXH3".parse::<HashAlgorithm>(), Ok(HashAlgorithm::Xxh3));
        assert_eq!("xxh3-128".parse::<HashAlgorithm>(), Ok(HashAlgorithm::Xxh3));
        assert_eq!("sha256".parse::<HashAlgorithm>(), Ok(HashAlgorithm::Sha256));
        assert!("md5".parse::<HashAlgorithm>().is_err());
    }

    #[test]
    fn interrupted_reads_are_retried() {
        struct Flaky {
            inner: Cursor<Vec<u8>>,
            interrupted: bool,
        }
        impl Read for Flaky {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                if !self.interrupted {
                    self.interrupted = true;
                    return Err(io::Error::from(ErrorKind::Interrupted));
                }
                self.inner.read(buf)
            }
        }

        let mut reader = Flaky {
            inner: Cursor::new(b"payload".to_vec()),
            interrupted: false,
        };
        let hash = Xxh3Provider.hash_stream(&mut reader).unwrap();
        assert_eq!(hash, Xxh3Provider.hash_buffer(b"payload"));
    }
}
