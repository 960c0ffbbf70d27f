//! Digest model and pluggable hash providers.

pub mod digest;
pub mod provider;
