//! Mutation timestamps.
//!
//! Timestamps are microseconds since the Unix epoch, bumped logically so the
//! clock never issues the same value twice and never moves backwards. Using
//! wall time as the floor keeps timestamps of a fresh process above those
//! already committed by an earlier one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Abstraction over wall-clock time.
pub trait TimeSource: Send + Sync {
    /// Current time in microseconds since the Unix epoch.
    fn now_micros(&self) -> u64;
}

/// Real time source using the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    #[allow(clippy::cast_possible_truncation)] // microseconds fit u64 for half a million years
    fn now_micros(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_micros() as u64)
    }
}

/// Monotonic timestamp issuer shared by all mutation callers.
pub struct Clock {
    source: Box<dyn TimeSource>,
    last: AtomicU64,
}

impl Clock {
    #[must_use]
    pub fn new(source: Box<dyn TimeSource>) -> Self {
        Self {
            source,
            last: AtomicU64::new(0),
        }
    }

    /// Issue a timestamp greater than every one issued or observed before.
    pub fn tick(&self) -> u64 {
        let now = self.source.now_micros();
        let mut last = self.last.load(Ordering::Acquire);
        loop {
            // Saturates once u64::MAX has been observed.
            let next = now.max(last.saturating_add(1));
            match self
                .last
                .compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }

    /// Record an externally supplied timestamp so later ticks exceed it.
    pub fn observe(&self, ts: u64) {
        self.last.fetch_max(ts, Ordering::AcqRel);
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new(Box::new(SystemTimeSource))
    }
}
