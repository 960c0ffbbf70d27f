//! Snapshot persistence.

pub mod codec;
