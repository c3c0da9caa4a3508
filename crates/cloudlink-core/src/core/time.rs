// crates/cloudlink-core/src/core/time.rs
// ============================================================================
// Module: Cloudlink Clock
// Description: Clock abstraction used by workers for all timestamps.
// Purpose: Keep wall-clock reads behind a trait so timing is testable.
// Dependencies: std
// ============================================================================

//! ## Overview
//! Workers stamp records, schedule cleanup and age batches through [`Clock`].
//! [`SystemClock`] reads the host clock; [`ManualClock`] is advanced explicitly
//! by tests.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

// ============================================================================
// SECTION: Clock
// ============================================================================

/// Source of unix-second timestamps.
pub trait Clock: Send + Sync {
    /// Returns the current time in unix seconds.
    fn now_unix_secs(&self) -> u64;
}

/// Clock backed by the host system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix_secs(&self) -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |duration| duration.as_secs())
    }
}

/// Deterministic clock advanced by hand.
#[derive(Debug, Default)]
pub struct ManualClock {
    /// Current time in unix seconds.
    now: AtomicU64,
}

impl ManualClock {
    /// Creates a clock frozen at `start` unix seconds.
    #[must_use]
    pub const fn new(start: u64) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    /// Moves the clock forward by `secs`.
    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }

    /// Sets the clock to an absolute value.
    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_unix_secs(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
