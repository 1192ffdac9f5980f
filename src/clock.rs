//! Dispatch-time clock.
//!
//! Alert ids, `createdAt` and the cooldown arithmetic all read one
//! [`Clock`], so the three can never drift apart. [`SystemClock`] never
//! goes backwards even if the wall clock is stepped.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};

/// Source of dispatch timestamps.
pub trait Clock: Send + Sync {
    /// Current time. Successive calls are non-decreasing.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock, clamped to be monotonically non-decreasing.
#[derive(Debug, Default)]
pub struct SystemClock {
    last: Mutex<Option<DateTime<Utc>>>,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let now = match *last {
            Some(previous) => previous.max(Utc::now()),
            None => Utc::now(),
        };
        *last = Some(now);
        now
    }
}

/// Manually advanced clock for simulated time.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
