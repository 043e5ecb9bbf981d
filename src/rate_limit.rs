//! Sliding-window rate limiting for communication operations.
//!
//! Admission is checked against a global ceiling first, then against the
//! per-key (connector class) window. Each check trims timestamps older
//! than the window, counts the survivors, and appends the current instant
//! on admission, all inside a critical section per key, so admissions are
//! linearizable. Window arithmetic runs on the injected clock's monotonic
//! time; wall-clock jumps cannot perturb decisions.

use crate::clock::SharedClock;
use crate::domain_types::{RateLimitCeiling, WindowSeconds};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// Window length of the global ceiling.
const GLOBAL_WINDOW_SECONDS: f64 = 60.0;

/// Per-key record of recent admissions.
#[derive(Debug, Clone)]
struct RateLimitRecord {
    timestamps: Vec<f64>,
    limit: u32,
    window_seconds: u64,
}

impl RateLimitRecord {
    fn new(limit: u32, window_seconds: u64) -> Self {
        Self {
            timestamps: Vec::new(),
            limit,
            window_seconds,
        }
    }

    fn trim(&mut self, cutoff: f64) {
        self.timestamps.retain(|ts| *ts > cutoff);
    }
}

/// Which ceiling denied the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitScope {
    Global,
    PerKey,
}

/// Outcome of an admission check.
#[derive(Debug, Clone)]
pub enum RateLimitDecision {
    /// Request admitted; its timestamp has been recorded.
    Admitted,
    /// Request denied by the named scope.
    Denied {
        /// Which ceiling fired.
        scope: LimitScope,
        /// Seconds until the oldest surviving timestamp leaves the window.
        retry_after_seconds: u64,
        /// Human-readable denial message.
        reason: String,
    },
}

impl RateLimitDecision {
    /// Whether the request was admitted.
    #[must_use]
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted)
    }
}

/// Current usage for a key.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitUsage {
    pub key: String,
    pub current: usize,
    pub limit: u32,
    pub window_seconds: u64,
    pub percentage: f64,
}

/// Sliding-window rate limiter keyed per connector class plus a global
/// ceiling.
pub struct RateLimiter {
    clock: SharedClock,
    records: DashMap<String, RateLimitRecord>,
    global_timestamps: Mutex<Vec<f64>>,
    global_limit: u32,
}

impl RateLimiter {
    /// Creates a limiter with the given global per-minute ceiling.
    #[must_use]
    pub fn new(clock: SharedClock, global_limit: u32) -> Self {
        Self {
            clock,
            records: DashMap::new(),
            global_timestamps: Mutex::new(Vec::new()),
            global_limit,
        }
    }

    /// Checks and records one admission for `key`.
    ///
    /// Atomic per key: trim, count, and append happen under the key's
    /// entry lock; the global sequence is checked under its own lock for
    /// the whole decision.
    #[must_use]
    pub fn check(
        &self,
        key: &str,
        limit: RateLimitCeiling,
        window: WindowSeconds,
    ) -> RateLimitDecision {
        let now = self.clock.monotonic().as_secs_f64();

        let mut global = self
            .global_timestamps
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        global.retain(|ts| *ts > now - GLOBAL_WINDOW_SECONDS);
        if global.len() >= self.global_limit as usize {
            let oldest = global.iter().copied().fold(f64::INFINITY, f64::min);
            let retry = (GLOBAL_WINDOW_SECONDS - (now - oldest)).max(0.0) as u64;
            return RateLimitDecision::Denied {
                scope: LimitScope::Global,
                retry_after_seconds: retry,
                reason: format!("Global rate limit exceeded. Try again in {retry} seconds."),
            };
        }

        let mut record = self
            .records
            .entry(key.to_string())
            .or_insert_with(|| RateLimitRecord::new(limit.as_u32(), window.as_u64()));
        record.limit = limit.as_u32();
        record.window_seconds = window.as_u64();
        record.trim(now - window.as_secs_f64());

        if record.timestamps.len() >= limit.as_usize() {
            let oldest = record
                .timestamps
                .iter()
                .copied()
                .fold(f64::INFINITY, f64::min);
            let retry = (window.as_secs_f64() - (now - oldest)).max(0.0) as u64;
            return RateLimitDecision::Denied {
                scope: LimitScope::PerKey,
                retry_after_seconds: retry,
                reason: format!("Rate limit exceeded. Try again in {retry} seconds."),
            };
        }

        record.timestamps.push(now);
        global.push(now);
        debug!(
            key,
            current = record.timestamps.len(),
            limit = limit.as_u32(),
            "rate limit admission"
        );
        RateLimitDecision::Admitted
    }

    /// Current usage for a key. Unknown keys report zero usage.
    #[must_use]
    pub fn usage(&self, key: &str) -> RateLimitUsage {
        let now = self.clock.monotonic().as_secs_f64();
        match self.records.get(key) {
            Some(record) => {
                let cutoff = now - record.window_seconds as f64;
                let current = record.timestamps.iter().filter(|ts| **ts > cutoff).count();
                let percentage = if record.limit > 0 {
                    current as f64 / f64::from(record.limit) * 100.0
                } else {
                    0.0
                };
                RateLimitUsage {
                    key: key.to_string(),
                    current,
                    limit: record.limit,
                    window_seconds: record.window_seconds,
                    percentage,
                }
            }
            None => RateLimitUsage {
                key: key.to_string(),
                current: 0,
                limit: 0,
                window_seconds: 60,
                percentage: 0.0,
            },
        }
    }

    /// Remaining admissions for a key in the current window.
    #[must_use]
    pub fn remaining(&self, key: &str) -> u32 {
        let usage = self.usage(key);
        usage.limit.saturating_sub(usage.current as u32)
    }

    /// Wall-clock instant when the key's window next frees a slot, or
    /// `None` for unknown keys.
    #[must_use]
    pub fn reset_time(&self, key: &str) -> Option<DateTime<Utc>> {
        let record = self.records.get(key)?;
        let now = self.clock.monotonic().as_secs_f64();
        let oldest = record
            .timestamps
            .iter()
            .copied()
            .fold(f64::INFINITY, f64::min);
        if oldest.is_infinite() {
            return Some(self.clock.now());
        }
        let seconds_until_reset = (oldest + record.window_seconds as f64 - now).max(0.0);
        Some(self.clock.now() + chrono::Duration::milliseconds((seconds_until_reset * 1000.0) as i64))
    }

    /// Pre-registers or adjusts the stored limit for a key (reported by
    /// [`RateLimiter::usage`]).
    pub fn set_limit(&self, key: &str, limit: RateLimitCeiling, window: WindowSeconds) {
        let mut record = self
            .records
            .entry(key.to_string())
            .or_insert_with(|| RateLimitRecord::new(limit.as_u32(), window.as_u64()));
        record.limit = limit.as_u32();
        record.window_seconds = window.as_u64();
    }

    /// Clears recorded admissions for one key, or all state when `None`.
    pub fn reset(&self, key: Option<&str>) {
        match key {
            Some(key) => {
                if let Some(mut record) = self.records.get_mut(key) {
                    record.timestamps.clear();
                }
            }
            None => {
                self.records.clear();
                self.global_timestamps
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clear();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{manual_clock, Clock, ManualClock, SharedClock};
    use chrono::TimeZone;
    use std::sync::Arc;
    use std::time::Duration;

    fn limiter_with_clock(global: u32) -> (RateLimiter, Arc<ManualClock>) {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let clock = manual_clock(start);
        let shared: SharedClock = clock.clone();
        (RateLimiter::new(shared, global), clock)
    }

    fn ceiling(value: u32) -> RateLimitCeiling {
        RateLimitCeiling::try_new(value).unwrap()
    }

    fn window(value: u64) -> WindowSeconds {
        WindowSeconds::try_new(value).unwrap()
    }

    #[test]
    fn test_should_admit_up_to_limit_when_inside_window() {
        let (limiter, _clock) = limiter_with_clock(100);
        for _ in 0..30 {
            assert!(limiter.check("web_search", ceiling(30), window(60)).is_admitted());
        }
        let denied = limiter.check("web_search", ceiling(30), window(60));
        assert!(!denied.is_admitted());
    }

    #[test]
    fn test_should_compute_retry_hint_from_oldest_timestamp_when_denying() {
        let (limiter, clock) = limiter_with_clock(100);
        assert!(limiter.check("k", ceiling(2), window(60)).is_admitted());
        clock.advance(Duration::from_secs(10));
        assert!(limiter.check("k", ceiling(2), window(60)).is_admitted());
        clock.advance(Duration::from_secs(20));

        match limiter.check("k", ceiling(2), window(60)) {
            RateLimitDecision::Denied {
                scope,
                retry_after_seconds,
                ..
            } => {
                assert_eq!(scope, LimitScope::PerKey);
                // window 60 - (now 30 - oldest 0)
                assert_eq!(retry_after_seconds, 30);
            }
            RateLimitDecision::Admitted => panic!("expected denial"),
        }
    }

    #[test]
    fn test_should_admit_again_when_window_slides_past_oldest() {
        let (limiter, clock) = limiter_with_clock(100);
        assert!(limiter.check("k", ceiling(1), window(60)).is_admitted());
        assert!(!limiter.check("k", ceiling(1), window(60)).is_admitted());

        clock.advance(Duration::from_secs(61));
        assert!(limiter.check("k", ceiling(1), window(60)).is_admitted());
    }

    #[test]
    fn test_should_enforce_global_ceiling_across_keys_when_checking() {
        let (limiter, _clock) = limiter_with_clock(5);
        for i in 0..5 {
            let key = format!("kind-{i}");
            assert!(limiter.check(&key, ceiling(100), window(60)).is_admitted());
        }
        match limiter.check("another", ceiling(100), window(60)) {
            RateLimitDecision::Denied { scope, .. } => assert_eq!(scope, LimitScope::Global),
            RateLimitDecision::Admitted => panic!("expected global denial"),
        }
    }

    #[test]
    fn test_should_not_consume_global_quota_when_key_denies() {
        let (limiter, _clock) = limiter_with_clock(3);
        assert!(limiter.check("a", ceiling(1), window(60)).is_admitted());
        // Key-level denial: global sequence must not grow.
        assert!(!limiter.check("a", ceiling(1), window(60)).is_admitted());
        assert!(limiter.check("b", ceiling(1), window(60)).is_admitted());
        assert!(limiter.check("c", ceiling(1), window(60)).is_admitted());
    }

    #[test]
    fn test_should_report_usage_and_remaining_when_inspecting() {
        let (limiter, _clock) = limiter_with_clock(100);
        for _ in 0..3 {
            let _ = limiter.check("k", ceiling(10), window(60));
        }
        let usage = limiter.usage("k");
        assert_eq!(usage.current, 3);
        assert_eq!(usage.limit, 10);
        assert!((usage.percentage - 30.0).abs() < f64::EPSILON);
        assert_eq!(limiter.remaining("k"), 7);

        let unknown = limiter.usage("unknown");
        assert_eq!(unknown.current, 0);
        assert_eq!(unknown.limit, 0);
    }

    #[test]
    fn test_should_report_reset_time_when_window_is_full() {
        let (limiter, clock) = limiter_with_clock(100);
        assert!(limiter.check("k", ceiling(1), window(60)).is_admitted());
        clock.advance(Duration::from_secs(20));

        let reset = limiter.reset_time("k").unwrap();
        let expected = clock.now() + chrono::Duration::seconds(40);
        assert_eq!(reset, expected);
        assert!(limiter.reset_time("unknown").is_none());
    }

    #[test]
    fn test_should_clear_state_when_resetting() {
        let (limiter, _clock) = limiter_with_clock(100);
        let _ = limiter.check("k", ceiling(1), window(60));
        assert!(!limiter.check("k", ceiling(1), window(60)).is_admitted());

        limiter.reset(Some("k"));
        assert!(limiter.check("k", ceiling(1), window(60)).is_admitted());

        limiter.reset(None);
        assert_eq!(limiter.usage("k").current, 0);
    }

    #[test]
    fn test_should_stay_linearizable_when_checked_concurrently() {
        let (limiter, _clock) = limiter_with_clock(10_000);
        let limiter = Arc::new(limiter);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let limiter = Arc::clone(&limiter);
            handles.push(std::thread::spawn(move || {
                let mut admitted = 0;
                for _ in 0..100 {
                    if limiter.check("shared", ceiling(500), window(60)).is_admitted() {
                        admitted += 1;
                    }
                }
                admitted
            }));
        }
        let total: i32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 500, "exactly the ceiling must be admitted");
    }
}
