//! Dispatcher clock injection.
//!
//! In-kernel deployments read a per-CPU monotonic clock tied to the
//! dispatcher thread; the core only ever needs "now, in nanoseconds", so the
//! clock is a trait object supplied at construction.

use std::sync::atomic::{AtomicU64, Ordering};

pub trait IoClock: Send + Sync {
    fn now_ns(&self) -> u64;
}

/// A manually advanced clock for tests and offline replay.
#[derive(Default)]
pub struct FakeClock {
    now: AtomicU64,
}

impl FakeClock {
    pub fn new(start_ns: u64) -> FakeClock {
        FakeClock {
            now: AtomicU64::new(start_ns),
        }
    }

    pub fn set_ns(&self, ns: u64) {
        self.now.store(ns, Ordering::Relaxed);
    }

    pub fn advance_ns(&self, delta: u64) {
        self.now.fetch_add(delta, Ordering::Relaxed);
    }
}

impl IoClock for FakeClock {
    fn now_ns(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }
}
