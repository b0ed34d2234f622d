//! Monotonic tick sources
//!
//! Timeouts and keep-alive deadlines are measured in ticks of one
//! millisecond, sampled at call entry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Source of the monotonic tick counter
pub trait TickSource: Send + Sync {
    /// Current tick count
    fn now(&self) -> u64;
}

/// Milliseconds elapsed since creation
#[derive(Debug)]
pub struct MonotonicTicks {
    origin: Instant,
}

impl MonotonicTicks {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicTicks {
    fn default() -> Self {
        Self::new()
    }
}

impl TickSource for MonotonicTicks {
    fn now(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Manually driven ticks, optionally advancing by `step` on every read
#[derive(Debug, Default)]
pub struct ManualTicks {
    now: AtomicU64,
    step: AtomicU64,
}

impl ManualTicks {
    pub fn new(start: u64) -> Self {
        Self {
            now: AtomicU64::new(start),
            step: AtomicU64::new(0),
        }
    }

    /// Ticks that advance by `step` each time they are read
    pub fn stepping(start: u64, step: u64) -> Self {
        Self {
            now: AtomicU64::new(start),
            step: AtomicU64::new(step),
        }
    }

    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, by: u64) {
        self.now.fetch_add(by, Ordering::SeqCst);
    }
}

impl TickSource for ManualTicks {
    fn now(&self) -> u64 {
        let step = self.step.load(Ordering::SeqCst);
        self.now.fetch_add(step, Ordering::SeqCst)
    }
}
