//! Lock-free scan progress counters with non-blocking snapshot publishing.

#![allow(missing_docs)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{self as channel, TrySendError};
use serde::Serialize;

/// Point-in-time copy of the scan counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct HashProgress {
    pub files_discovered: u64,
    pub files_hashed: u64,
    pub bytes_hashed: u64,
    /// Files abandoned because of a read error.
    pub files_failed: u64,
}

const NEVER: u64 = u64::MAX;

/// Shared counters updated by the walker and workers.
///
/// Publishing goes through `try_send` on a caller-supplied channel and is
/// throttled to one snapshot per interval; a full or disconnected channel
/// drops the snapshot instead of stalling a worker.
#[derive(Debug)]
pub struct ProgressAggregator {
    discovered: AtomicU64,
    hashed: AtomicU64,
    bytes: AtomicU64,
    failed: AtomicU64,
    sink: Option<channel::Sender<HashProgress>>,
    started: Instant,
    interval_ms: u64,
    last_publish_ms: AtomicU64,
    dropped: AtomicU64,
}

impl ProgressAggregator {
    pub fn new(sink: Option<channel::Sender<HashProgress>>, interval: Duration) -> Self {
        Self {
            discovered: AtomicU64::new(0),
            hashed: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            sink,
            started: Instant::now(),
            interval_ms: u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            last_publish_ms: AtomicU64::new(NEVER),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn record_discovered(&self) {
        self.discovered.fetch_add(1, Ordering::Relaxed);
        self.maybe_publish();
    }

    pub fn record_hashed(&self, bytes: u64) {
        self.hashed.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
        self.maybe_publish();
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.maybe_publish();
    }

    pub fn snapshot(&self) -> HashProgress {
        HashProgress {
            files_discovered: self.discovered.load(Ordering::Relaxed),
            files_hashed: self.hashed.load(Ordering::Relaxed),
            bytes_hashed: self.bytes.load(Ordering::Relaxed),
            files_failed: self.failed.load(Ordering::Relaxed),
        }
    }

    /// Snapshots that could not be delivered because the observer lagged.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Publish regardless of the throttle (used for the final snapshot).
    pub fn publish_now(&self) {
        self.send(self.snapshot());
    }

    fn maybe_publish(&self) {
        if self.sink.is_none() {
            return;
        }
        let now = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX - 1);
        let last = self.last_publish_ms.load(Ordering::Relaxed);
        if last != NEVER && now.saturating_sub(last) < self.interval_ms {
            return;
        }
        // One winner per interval; losers coalesce into the winner's snapshot.
        if self
            .last_publish_ms
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            self.send(self.snapshot());
        }
    }

    fn send(&self, progress: HashProgress) {
        if let Some(sink) = &self.sink {
            match sink.try_send(progress) {
                Ok(()) => {}
                Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}
