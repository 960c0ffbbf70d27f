//! Scan lifecycle control: cooperative cancellation and the observable
//! `Idle → Running → Draining → Completed` state machine.
//!
//! A [`ScanControl`] is cheap to clone; every clone shares the same flag, so a
//! UI thread or a signal handler can cancel a scan running elsewhere.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Lifecycle of one scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    /// Walker and workers active.
    Running,
    /// Walker finished, queue closed, workers finishing in-flight tasks.
    Draining,
    /// Cancellation observed; partial results will still be returned.
    Cancelled,
    Completed,
}

impl ScanState {
    const fn to_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Running => 1,
            Self::Draining => 2,
            Self::Cancelled => 3,
            Self::Completed => 4,
        }
    }

    const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Running,
            2 => Self::Draining,
            3 => Self::Cancelled,
            4 => Self::Completed,
            _ => Self::Idle,
        }
    }
}

/// Shared cancellation flag plus scan state.
#[derive(Debug, Clone, Default)]
pub struct ScanControl {
    cancelled: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
}

impl ScanControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn state(&self) -> ScanState {
        ScanState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// The raw flag, for wiring into OS signal handlers.
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Cancel on SIGINT / SIGTERM. Registration is best-effort; failures are
    /// reported to stderr but not fatal.
    #[cfg(feature = "signals")]
    pub fn cancel_on_interrupt(&self) {
        use signal_hook::consts::{SIGINT, SIGTERM};

        if let Err(e) = signal_hook::flag::register(SIGINT, self.flag()) {
            eprintln!("[DPR-SIGNAL] failed to register SIGINT: {e}");
        }
        if let Err(e) = signal_hook::flag::register(SIGTERM, self.flag()) {
            eprintln!("[DPR-SIGNAL] failed to register SIGTERM: {e}");
        }
    }

    pub(crate) fn set_state(&self, next: ScanState) {
        self.state.store(next.to_u8(), Ordering::Release);
    }

    /// Move `Running`/`Draining` to `Cancelled` if cancellation was requested.
    /// Returns whether the scan is (now) in the cancelled state.
    pub(crate) fn observe_cancel(&self) -> bool {
        if !self.is_cancelled() {
            return false;
        }
        for from in [ScanState::Running, ScanState::Draining] {
            if self
                .state
                .compare_exchange(
                    from.to_u8(),
                    ScanState::Cancelled.to_u8(),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return true;
            }
        }
        self.state() == ScanState::Cancelled
    }

    /// `Running → Draining`, unless the scan was cancelled meanwhile.
    pub(crate) fn begin_draining(&self) {
        let _ = self.state.compare_exchange(
            ScanState::Running.to_u8(),
            ScanState::Draining.to_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}
