#![forbid(unsafe_code)]

//! dirprint: concurrent directory fingerprinting.
//!
//! A scan walks a directory tree, hashes every file on a bounded worker pool
//! (whole-file digests for small files, evenly spaced block samples for large
//! ones) and produces a [`DirectoryHash`](index::directory::DirectoryHash)
//! snapshot. Snapshots can be persisted as compact gzip artifacts, compared
//! for drift, and searched for duplicate files.
//!
//! # Library usage
//!
//! ```rust,no_run
//! use dirprint::prelude::*;
//!
//! # fn main() -> dirprint::core::errors::Result<()> {
//! let service = HashService::new(ServiceOptions::local_disk(), HashAlgorithm::Xxh3.provider())?;
//! let report = service.scan("/data", &ScanControl::new())?;
//! for group in find_duplicates(&report.snapshot) {
//!     println!("{} copies: {:?}", group.paths.len(), group.paths);
//! }
//! codec::save("/tmp/data.dat".as_ref(), &report.snapshot)?;
//! # Ok(())
//! # }
//! ```

pub mod prelude;

pub mod core;
pub mod hashing;
pub mod index;
pub mod logger;
pub mod scanner;
pub mod storage;
