//! Injectable time source.
//!
//! Every time-dependent decision in the core (TOTP counters, token issue and
//! expiry) goes through this trait so tests can pin the clock.

use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the current time as Unix epoch seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

/// Wall-clock implementation used outside of tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
            .unwrap_or_default()
    }
}
