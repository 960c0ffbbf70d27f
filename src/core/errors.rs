//! DPR-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, DprError>;

/// Top-level error type for dirprint.
#[derive(Debug, Error)]
pub enum DprError {
    #[error("[DPR-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[DPR-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[DPR-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[DPR-2001] path not found: {path}")]
    NotFound { path: PathBuf },

    #[error("[DPR-2002] access failure at {path}: {source}")]
    Access {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[DPR-2101] corrupt snapshot data: {details}")]
    CorruptData { details: String },

    #[error("[DPR-2102] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[DPR-2201] incompatible hash profiles: {left} vs {right}")]
    IncompatibleProfiles { left: String, right: String },

    #[error("[DPR-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[DPR-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },
}

impl DprError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "DPR-1001",
            Self::MissingConfig { .. } => "DPR-1002",
            Self::ConfigParse { .. } => "DPR-1003",
            Self::NotFound { .. } => "DPR-2001",
            Self::Access { .. } => "DPR-2002",
            Self::CorruptData { .. } => "DPR-2101",
            Self::Serialization { .. } => "DPR-2102",
            Self::IncompatibleProfiles { .. } => "DPR-2201",
            Self::Io { .. } => "DPR-3002",
            Self::ChannelClosed { .. } => "DPR-3003",
        }
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::Access { .. } | Self::ChannelClosed { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Convenience constructor for per-item access failures during a scan.
    #[must_use]
    pub fn access(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Access {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Filesystem path the error refers to, when there is one.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::MissingConfig { path }
            | Self::NotFound { path }
            | Self::Access { path, .. }
            | Self::Io { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Convenience constructor for snapshot decode failures.
    #[must_use]
    pub fn corrupt(details: impl Into<String>) -> Self {
        Self::CorruptData {
            details: details.into(),
        }
    }
}

impl From<serde_json::Error> for DprError {
    fn from(value: serde_json::Error) -> Self {
        Self::CorruptData {
            details: format!("serde_json: {value}"),
        }
    }
}

impl From<toml::de::Error> for DprError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
