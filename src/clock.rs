//! Clock and ID services.
//!
//! All time reads and ID minting go through [`Clock`] so that TTL,
//! scheduling, and daily-reset logic can be driven deterministically in
//! tests.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use uuid::Uuid;

/// Source of wall-clock and monotonic time.
pub trait Clock: Send + Sync {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;

    /// Monotonic elapsed milliseconds since the clock was created.
    fn monotonic_ms(&self) -> u64;
}

/// System-backed clock.
pub struct SystemClock {
    started: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn monotonic_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

/// Manually-advanced clock for tests.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    monotonic_ms: Mutex<u64>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
            monotonic_ms: Mutex::new(0),
        }
    }

    /// Advance both wall and monotonic time.
    pub fn advance(&self, delta: Duration) {
        let mut now = self.now.lock().expect("clock poisoned");
        *now += delta;
        let mut mono = self.monotonic_ms.lock().expect("clock poisoned");
        *mono += delta.num_milliseconds().max(0) as u64;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock poisoned")
    }

    fn monotonic_ms(&self) -> u64 {
        *self.monotonic_ms.lock().expect("clock poisoned")
    }
}

/// Shared clock handle.
pub type SharedClock = Arc<dyn Clock>;

/// Mint an ID with a readable prefix, e.g. `run_3f1a…`.
pub fn new_prefixed_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}

/// Start of the local day containing `t`, used for daily budget resets.
pub fn day_of(t: DateTime<Utc>) -> NaiveDate {
    t.date_naive()
}

/// Inclusive lower bound for a "last N days" window ending at `t`.
pub fn days_back(t: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    t - Duration::days(days)
}

/// Inclusive lower bound for a "last N hours" window ending at `t`.
pub fn hours_back(t: DateTime<Utc>, hours: i64) -> DateTime<Utc> {
    t - Duration::hours(hours)
}
