//! Scan pipeline: directory walker, bounded task queue, worker pool, I/O
//! permits, sampling, progress, and cancellation.

pub mod control;
pub mod permits;
pub mod progress;
pub mod sampler;
pub mod service;
pub mod walker;
pub mod worker;
