//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use dirprint::prelude::*;
//! ```

// Core
pub use crate::core::config::{Config, ServiceOptions, StoragePreset, WalkerConfig};
pub use crate::core::errors::{DprError, Result};

// Hashing
pub use crate::hashing::digest::{DataHash, FileHash, HashMode, HashProfile};
pub use crate::hashing::provider::{HashAlgorithm, HashProvider};

// Scanner
pub use crate::scanner::control::{ScanControl, ScanState};
pub use crate::scanner::progress::HashProgress;
pub use crate::scanner::service::{FileFailure, HashService, ScanReport};

// Index
pub use crate::index::diff::{SnapshotDiff, compare};
pub use crate::index::directory::DirectoryHash;
pub use crate::index::duplicates::{DuplicateGroup, find_duplicates, find_duplicates_across};

// Storage
pub use crate::storage::codec;
