//! Wall-clock access.
//!
//! Every day-key and expiry check goes through a [`Clock`] so that the
//! day-boundary logic can be driven deterministically in tests.

use chrono::{DateTime, Duration, Local, NaiveDate, NaiveTime};
use std::sync::RwLock;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;

    fn now_ms(&self) -> i64 {
        self.now().timestamp_millis()
    }

    /// Local calendar day of `now()`.
    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Local>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Local>) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    pub fn set(&self, now: DateTime<Local>) {
        let mut guard = self.now.write().unwrap_or_else(|e| e.into_inner());
        *guard = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.write().unwrap_or_else(|e| e.into_inner());
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Local> {
        *self.now.read().unwrap_or_else(|e| e.into_inner())
    }
}

/// `YYYY-MM-DD` rendering of a local calendar day.
pub fn day_key(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

pub fn parse_day_key(key: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(key.trim(), "%Y-%m-%d").ok()
}

/// First instant of the local day after `now`, in epoch milliseconds.
///
/// Where a DST gap swallows midnight, the first existing hour after it is used.
pub fn next_local_midnight_ms(now: DateTime<Local>) -> i64 {
    let today = now.date_naive();
    let start = today.succ_opt().unwrap_or(today).and_time(NaiveTime::MIN);
    (0..3)
        .map(|h| start + Duration::hours(h))
        .find_map(|t| t.and_local_timezone(Local).earliest())
        .map(|t| t.timestamp_millis())
        .unwrap_or_else(|| now.timestamp_millis() + 86_400_000)
}
