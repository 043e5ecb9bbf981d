//! Time abstraction for testable time-dependent behavior.
//!
//! Every timestamp in the gateway is UTC. Storage uses epoch milliseconds;
//! JSON I/O uses ISO-8601 with a trailing `Z`. The same clock feeds both the
//! rate-limit window arithmetic and timestamp emission so tests can inject a
//! virtual clock and drive both consistently.

use chrono::{DateTime, SecondsFormat, Utc};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Trait for providing wall-clock and monotonic time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current wall-clock time in UTC.
    #[must_use]
    fn now(&self) -> DateTime<Utc>;

    /// Monotonic elapsed time since an arbitrary fixed origin.
    ///
    /// Used for sliding-window arithmetic where wall-clock jumps must not
    /// perturb admission decisions.
    #[must_use]
    fn monotonic(&self) -> Duration;
}

/// Real clock for production use.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Creates a new system clock anchored at construction time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
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

    fn monotonic(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Manually advanced clock for tests.
///
/// Wall-clock and monotonic time move together through [`ManualClock::advance`],
/// so window expiry and emitted timestamps stay coherent in assertions.
#[derive(Debug)]
pub struct ManualClock {
    state: Mutex<(DateTime<Utc>, Duration)>,
}

impl ManualClock {
    /// Creates a manual clock starting at the given wall-clock instant.
    #[must_use]
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new((start, Duration::ZERO)),
        }
    }

    /// Advances both wall-clock and monotonic time.
    pub fn advance(&self, delta: Duration) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        state.0 += chrono::Duration::from_std(delta).unwrap_or(chrono::Duration::zero());
        state.1 += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .0
    }

    fn monotonic(&self) -> Duration {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .1
    }
}

/// Type alias for a shared clock.
pub type SharedClock = Arc<dyn Clock>;

/// Creates the production clock.
#[must_use]
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock::new())
}

/// Creates a manual clock for tests. The concrete handle keeps `advance`
/// reachable; coerce a clone to [`SharedClock`] for injection.
#[must_use]
pub fn manual_clock(start: DateTime<Utc>) -> Arc<ManualClock> {
    Arc::new(ManualClock::starting_at(start))
}

/// Converts a UTC timestamp to epoch milliseconds for storage.
#[must_use]
pub fn to_epoch_ms(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Converts epoch milliseconds back to a UTC timestamp.
///
/// Out-of-range values clamp to the Unix epoch rather than failing; stored
/// values are always produced by [`to_epoch_ms`].
#[must_use]
pub fn from_epoch_ms(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

/// Formats a UTC timestamp as ISO-8601 with millisecond precision and a
/// trailing `Z`, the wire contract for all JSON timestamps.
#[must_use]
pub fn iso_z(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_should_move_monotonic_and_wall_clock_together_when_advancing() {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let clock = ManualClock::starting_at(start);

        clock.advance(Duration::from_secs(90));

        assert_eq!(clock.monotonic(), Duration::from_secs(90));
        assert_eq!(clock.now(), start + chrono::Duration::seconds(90));
    }

    #[test]
    fn test_should_format_timestamps_with_trailing_z_when_serializing() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let formatted = iso_z(at);
        assert_eq!(formatted, "2026-03-01T12:00:00.000Z");
        assert!(formatted.ends_with('Z'));
    }

    #[test]
    fn test_should_round_trip_epoch_milliseconds_when_converting() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(from_epoch_ms(to_epoch_ms(at)), at);
    }

    #[test]
    fn test_should_never_run_backwards_when_using_system_clock() {
        let clock = SystemClock::new();
        let first = clock.monotonic();
        let second = clock.monotonic();
        assert!(second >= first);
    }
}
