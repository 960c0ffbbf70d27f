//! In-memory results: the concurrent content index, completed snapshots, and
//! the queries run over them.

pub mod content;
pub mod diff;
pub mod directory;
pub mod duplicates;
