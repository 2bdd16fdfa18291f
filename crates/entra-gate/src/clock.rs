//! Verification clock
//!
//! The gate samples the clock exactly once per request and hands that instant
//! to every time-based check.

use std::fmt;
use std::time::SystemTime;

/// Source of the verification instant
pub trait Clock: fmt::Debug + Send + Sync {
    /// Current wall-clock time
    fn now(&self) -> SystemTime;
}

/// The system wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// A clock frozen at a fixed instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub SystemTime);

impl Clock for FixedClock {
    fn now(&self) -> SystemTime {
        self.0
    }
}
