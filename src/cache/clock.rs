//! Time sources for entry timestamps and staleness checks.

use std::sync::Mutex;

use time::{Duration, OffsetDateTime};

use super::lock::mutex_lock;

const SOURCE: &str = "cache::clock";

/// Supplies the current instant to the cache.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

/// Wall-clock time in UTC.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// A clock that only moves when told to.
///
/// Useful for exercising TTL behaviour without sleeping.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<OffsetDateTime>,
}

impl ManualClock {
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Start at the given number of seconds after the Unix epoch.
    pub fn at_unix(seconds: i64) -> Self {
        Self::new(OffsetDateTime::UNIX_EPOCH.saturating_add(Duration::seconds(seconds)))
    }

    pub fn advance(&self, by: Duration) {
        let mut now = mutex_lock(&self.now, SOURCE, "advance");
        *now = now.saturating_add(by);
    }

    pub fn set(&self, to: OffsetDateTime) {
        *mutex_lock(&self.now, SOURCE, "set") = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *mutex_lock(&self.now, SOURCE, "now")
    }
}
