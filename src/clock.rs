//! Time source abstraction
//!
//! Every timestamp the control loop records (pipeline ids, history end
//! timestamps, datastore snapshots) is read through a [`Clock`] so tests can
//! pin and advance time explicitly.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Duration, TimeZone, Utc};

/// Process-wide wall-clock source.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// [`Clock`] backed by the system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven [`Clock`] with millisecond resolution.
///
/// # Example
///
/// ```rust
/// use livetune::clock::{Clock, ManualClock};
///
/// let clock = ManualClock::at_millis(1_000);
/// clock.advance_millis(5);
/// assert_eq!(clock.now().timestamp_millis(), 1_005);
/// ```
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    /// Create a clock frozen at `millis` since the Unix epoch.
    #[must_use]
    pub const fn at_millis(millis: i64) -> Self {
        Self {
            millis: AtomicI64::new(millis),
        }
    }

    /// Create a clock frozen at `instant`.
    #[must_use]
    pub fn at(instant: DateTime<Utc>) -> Self {
        Self::at_millis(instant.timestamp_millis())
    }

    /// Move the clock forward.
    pub fn advance_millis(&self, millis: i64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }

    /// Move the clock forward by a chrono duration.
    pub fn advance(&self, duration: Duration) {
        self.advance_millis(duration.num_milliseconds());
    }

    /// Pin the clock to `millis` since the Unix epoch.
    pub fn set_millis(&self, millis: i64) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::at_millis(0)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let millis = self.millis.load(Ordering::SeqCst);
        Utc.timestamp_millis_opt(millis)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::at_millis(10);
        assert_eq!(clock.now().timestamp_millis(), 10);

        clock.advance_millis(15);
        assert_eq!(clock.now().timestamp_millis(), 25);

        clock.advance(Duration::seconds(1));
        assert_eq!(clock.now().timestamp_millis(), 1_025);

        clock.set_millis(3);
        assert_eq!(clock.now().timestamp_millis(), 3);
    }

    #[test]
    fn test_system_clock_is_monotone_enough() {
        let clock = SystemClock;
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }
}
