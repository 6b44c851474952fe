//! Wall-clock source, injectable so time-dependent behaviour can be tested.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Reads the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Clones share the same instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now = *now + by;
    }

    pub fn advance_secs_f64(&self, secs: f64) {
        self.advance(seconds_to_duration(secs));
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Fractional seconds to a chrono duration, microsecond resolution.
pub fn seconds_to_duration(secs: f64) -> Duration {
    if !secs.is_finite() {
        return Duration::zero();
    }
    Duration::microseconds((secs * 1_000_000.0).round() as i64)
}

/// Signed elapsed seconds from `earlier` to `later`.
pub fn elapsed_seconds(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    let delta = later.signed_duration_since(earlier);
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => delta.num_milliseconds() as f64 / 1_000.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances_shared_instant() {
        let clock = ManualClock::default();
        let other = clock.clone();
        let start = clock.now();

        other.advance_secs_f64(1.5);

        assert!((elapsed_seconds(start, clock.now()) - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_seconds_to_duration_ignores_nan() {
        assert_eq!(seconds_to_duration(f64::NAN), Duration::zero());
        assert_eq!(seconds_to_duration(0.25), Duration::milliseconds(250));
    }
}
