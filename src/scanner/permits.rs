//! Counting semaphore bounding simultaneous file reads.
//!
//! Permits are unit tokens circulating through a bounded channel: acquiring
//! takes a token out, dropping the guard puts it back. The permit count is
//! independent of the worker count, so slow media can be throttled without
//! starving CPU-side hashing.

use std::time::Duration;

use crossbeam_channel::{self as channel, RecvTimeoutError};

use crate::scanner::control::ScanControl;

/// How often a blocked acquirer re-checks cancellation.
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// Shared pool of I/O permits.
#[derive(Debug)]
pub struct IoPermits {
    tokens_tx: channel::Sender<()>,
    tokens_rx: channel::Receiver<()>,
    capacity: usize,
}

impl IoPermits {
    /// Create a pool with `capacity` permits (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tokens_tx, tokens_rx) = channel::bounded(capacity);
        for _ in 0..capacity {
            let _ = tokens_tx.try_send(());
        }
        Self {
            tokens_tx,
            tokens_rx,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits currently free.
    pub fn available(&self) -> usize {
        self.tokens_rx.len()
    }

    /// Block until a permit is free. Returns `None` once `control` is
    /// cancelled, without taking a permit.
    pub fn acquire(&self, control: &ScanControl) -> Option<IoPermit<'_>> {
        loop {
            if control.is_cancelled() {
                return None;
            }
            match self.tokens_rx.recv_timeout(CANCEL_POLL) {
                Ok(()) => return Some(IoPermit { pool: self }),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }
}

/// RAII guard; the permit returns to the pool on drop.
#[derive(Debug)]
pub struct IoPermit<'a> {
    pool: &'a IoPermits,
}

impl Drop for IoPermit<'_> {
    fn drop(&mut self) {
        let _ = self.pool.tokens_tx.try_send(());
    }
}
