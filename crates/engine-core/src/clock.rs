//! Clock abstraction for testable time handling.
//!
//! Every place the runtime reads "now" (computing `executeAfter`, stamping
//! `startedAt`/`completedAt`, cache TTL expiry) goes through this trait
//! instead of `Utc::now()` directly, so suspension/resume timing can be
//! exercised deterministically in tests.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

/// A source of the current wall-clock time.
pub trait Clock: Clone + Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

/// The real system clock.
#[derive(Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A fake clock for tests, with explicit advancement.
#[derive(Clone)]
pub struct FakeClock {
    current: Arc<Mutex<DateTime<Utc>>>,
}

impl FakeClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { current: Arc::new(Mutex::new(start)) }
    }

    /// Advance the clock by the given duration.
    pub fn advance(&self, duration: chrono::Duration) {
        let mut guard = self.current.lock().expect("clock mutex poisoned");
        *guard += duration;
    }

    /// Set the clock to an absolute instant.
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.current.lock().expect("clock mutex poisoned") = instant;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock().expect("clock mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_advances_by_duration() {
        let start = Utc::now();
        let clock = FakeClock::new(start);
        clock.advance(chrono::Duration::seconds(60));
        assert_eq!(clock.now(), start + chrono::Duration::seconds(60));
    }

    #[test]
    fn fake_clock_set_overrides_current() {
        let clock = FakeClock::new(Utc::now());
        let target = DateTime::from_timestamp(0, 0).unwrap();
        clock.set(target);
        assert_eq!(clock.now(), target);
    }

    #[test]
    fn clones_share_the_same_underlying_time() {
        let clock = FakeClock::new(Utc::now());
        let clone = clock.clone();
        clock.advance(chrono::Duration::seconds(30));
        assert_eq!(clock.now(), clone.now());
    }
}
