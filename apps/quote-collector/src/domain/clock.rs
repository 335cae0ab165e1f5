//! Observation Clock
//!
//! `collected_at` is assigned at normalization time. [`SystemClock`] clamps
//! readings so successive timestamps within one process never go backwards,
//! even if the wall clock is stepped back.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Source of observation timestamps.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock, monotonically non-decreasing per instance.
#[derive(Debug, Default)]
pub struct SystemClock {
    last: Mutex<Option<DateTime<Utc>>>,
}

impl SystemClock {
    /// Create a new system clock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last: Mutex::new(None),
        }
    }

    fn clamp(&self, reading: DateTime<Utc>) -> DateTime<Utc> {
        let mut last = self.last.lock();
        let now = match *last {
            Some(previous) if previous > reading => previous,
            _ => reading,
        };
        *last = Some(now);
        now
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        self.clamp(Utc::now())
    }
}

/// Clock that returns a settable instant.
#[derive(Debug)]
pub struct FixedClock {
    instant: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    /// Create a clock frozen at `instant`.
    #[must_use]
    pub fn new(instant: DateTime<Utc>) -> Self {
        Self {
            instant: Mutex::new(instant),
        }
    }

    /// Move the clock to `instant`.
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.instant.lock() = instant;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.instant.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn system_clock_never_goes_backwards() {
        let clock = SystemClock::new();
        let later = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let earlier = later - Duration::hours(1);

        assert_eq!(clock.clamp(later), later);
        assert_eq!(clock.clamp(earlier), later);
        assert_eq!(clock.clamp(later + Duration::seconds(1)), later + Duration::seconds(1));
    }

    #[test]
    fn system_clock_successive_reads_non_decreasing() {
        let clock = SystemClock::new();
        let mut previous = clock.now();
        for _ in 0..100 {
            let next = clock.now();
            assert!(next >= previous);
            previous = next;
        }
    }

    #[test]
    fn fixed_clock_is_settable() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let clock = FixedClock::new(start);
        assert_eq!(clock.now(), start);

        let next = start + Duration::minutes(1);
        clock.set(next);
        assert_eq!(clock.now(), next);
    }
}
