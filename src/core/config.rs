//! Configuration system: TOML file + env var overrides + storage presets.

#![allow(missing_docs)]

use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::errors::{DprError, Result};

/// Full dirprint configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub service: ServiceOptions,
    pub walker: WalkerConfig,
    pub paths: PathsConfig,
}

/// Tuning knobs for the hashing pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServiceOptions {
    /// Number of sample blocks hashed for files above `full_hash_threshold`.
    pub sample_count: usize,
    /// Bytes per sample block.
    pub sample_block_size: usize,
    /// Files of at most this many bytes are hashed in full.
    pub full_hash_threshold: u64,
    /// Depth of the bounded walker → worker queue.
    pub queue_capacity: usize,
    /// Concurrent hashing workers (CPU side).
    pub worker_count: usize,
    /// Maximum simultaneous file reads (I/O side), independent of `worker_count`.
    pub io_concurrency: usize,
    /// Minimum spacing between progress snapshots.
    pub progress_interval_ms: u64,
}

const MIB: usize = 1024 * 1024;

impl ServiceOptions {
    /// Fast local storage (SSD / NVMe): wide I/O fan-out.
    pub fn local_disk() -> Self {
        Self {
            sample_count: 16,
            sample_block_size: MIB,
            full_hash_threshold: 100 * MIB as u64,
            queue_capacity: 4096,
            worker_count: available_cpus() * 2,
            io_concurrency: 128,
            progress_interval_ms: 100,
        }
    }

    /// Slow or removable media (spinning disks, USB): narrow I/O fan-out,
    /// one worker per CPU.
    pub fn removable_media() -> Self {
        Self {
            worker_count: available_cpus(),
            io_concurrency: 32,
            ..Self::local_disk()
        }
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("sample_count", self.sample_count),
            ("sample_block_size", self.sample_block_size),
            ("queue_capacity", self.queue_capacity),
            ("worker_count", self.worker_count),
            ("io_concurrency", self.io_concurrency),
        ] {
            if value == 0 {
                return Err(DprError::InvalidConfig {
                    details: format!("service.{name} must be >= 1"),
                });
            }
        }
        Ok(())
    }
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self::local_disk()
    }
}

/// Named option presets, selected by media type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoragePreset {
    #[default]
    Local,
    Removable,
}

impl StoragePreset {
    pub fn options(self) -> ServiceOptions {
        match self {
            Self::Local => ServiceOptions::local_disk(),
            Self::Removable => ServiceOptions::removable_media(),
        }
    }
}

impl fmt::Display for StoragePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Removable => f.write_str("removable"),
        }
    }
}

impl FromStr for StoragePreset {
    type Err = DprError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "ssd" => Ok(Self::Local),
            "removable" | "external" | "hdd" => Ok(Self::Removable),
            other => Err(DprError::ConfigParse {
                context: "preset",
                details: format!("unknown storage preset {other:?}"),
            }),
        }
    }
}

/// Directory-walk behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct WalkerConfig {
    /// Extra directory-name fragments to skip (case-insensitive substring match).
    /// The OS trash / volume-metadata names are always skipped in addition.
    pub excluded_dir_names: Vec<String>,
    pub follow_symlinks: bool,
    /// Treat an unreadable subdirectory as a scan error instead of skipping it.
    pub strict_access: bool,
}

/// Filesystem locations used by dirprint itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub activity_log: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME")
            .or_else(|| env::var_os("USERPROFILE"))
            .map_or_else(
                || {
                    eprintln!(
                        "[DPR-CONFIG] WARNING: HOME not set, falling back to temp dir for data paths"
                    );
                    env::temp_dir()
                },
                PathBuf::from,
            );
        Self {
            config_file: home_dir.join(".config").join("dirprint").join("config.toml"),
            activity_log: home_dir
                .join(".local")
                .join("share")
                .join("dirprint")
                .join("activity.jsonl"),
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| DprError::io(&path_buf, source))?;
            toml::from_str::<Self>(&raw)?
        } else if path.is_some() {
            return Err(DprError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic FNV-1a fingerprint of the effective config.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self).map_err(|e| DprError::Serialization {
            context: "config",
            details: e.to_string(),
        })?;
        Ok(format!(
            "{:016x}",
            crate::hashing::digest::fnv1a(canonical.as_bytes())
        ))
    }

    pub fn validate(&self) -> Result<()> {
        self.service.validate()?;
        if self
            .walker
            .excluded_dir_names
            .iter()
            .any(|name| name.trim().is_empty())
        {
            return Err(DprError::InvalidConfig {
                details: "walker.excluded_dir_names must not contain blank entries".to_string(),
            });
        }
        Ok(())
    }

    /// Apply `DPR_*` overrides using `lookup` as the variable source.
    ///
    /// `DPR_PRESET` is applied first so individual knobs can refine it.
    pub fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("DPR_PRESET") {
            let preset: StoragePreset = raw.parse()?;
            self.service = preset.options();
        }

        let svc = &mut self.service;
        set_parsed(&mut lookup, "DPR_SERVICE_SAMPLE_COUNT", &mut svc.sample_count)?;
        set_parsed(
            &mut lookup,
            "DPR_SERVICE_SAMPLE_BLOCK_SIZE",
            &mut svc.sample_block_size,
        )?;
        set_parsed(
            &mut lookup,
            "DPR_SERVICE_FULL_HASH_THRESHOLD",
            &mut svc.full_hash_threshold,
        )?;
        set_parsed(&mut lookup, "DPR_SERVICE_QUEUE_CAPACITY", &mut svc.queue_capacity)?;
        set_parsed(&mut lookup, "DPR_SERVICE_WORKER_COUNT", &mut svc.worker_count)?;
        set_parsed(&mut lookup, "DPR_SERVICE_IO_CONCURRENCY", &mut svc.io_concurrency)?;
        set_parsed(
            &mut lookup,
            "DPR_SERVICE_PROGRESS_INTERVAL_MS",
            &mut svc.progress_interval_ms,
        )?;

        set_parsed(
            &mut lookup,
            "DPR_WALKER_FOLLOW_SYMLINKS",
            &mut self.walker.follow_symlinks,
        )?;
        set_parsed(
            &mut lookup,
            "DPR_WALKER_STRICT_ACCESS",
            &mut self.walker.strict_access,
        )?;

        if let Some(raw) = lookup("DPR_ACTIVITY_LOG") {
            self.paths.activity_log = PathBuf::from(raw);
        }
        Ok(())
    }
}

fn available_cpus() -> usize {
    std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get)
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn set_parsed<F, T>(lookup: &mut F, name: &str, slot: &mut T) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    if let Some(raw) = lookup(name) {
        *slot = raw.trim().parse::<T>().map_err(|error| DprError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })?;
    }
    Ok(())
}
