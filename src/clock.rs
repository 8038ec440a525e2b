//! Injectable wall-clock sources.
//!
//! The engine never calls `Utc::now()` directly; it reads time through a
//! [`TimeSource`] handle so tests can drive trade expiry, pricing hours, and
//! simulation end times without real delays.

use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Duration, Timelike, Utc};

/// A source of wall-clock time.
pub trait TimeSource: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> DateTime<Utc>;

    /// Returns the current hour of day (0–23), used by the pricing model.
    fn hour_of_day(&self) -> u32 {
        self.now().hour()
    }
}

/// System clock; the production time source.
#[derive(Debug, Default, Clone, Copy)]
pub struct WallClock;

impl TimeSource for WallClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for deterministic tests.
///
/// # Examples
///
/// ```
/// use chrono::{Duration, TimeZone, Utc};
/// use microgrid_engine::clock::{ManualClock, TimeSource};
///
/// let clock = ManualClock::starting_at(Utc.with_ymd_and_hms(2024, 6, 1, 18, 0, 0).unwrap());
/// assert_eq!(clock.hour_of_day(), 18);
///
/// clock.advance(Duration::hours(5));
/// assert_eq!(clock.hour_of_day(), 23);
/// ```
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    /// Creates a manual clock fixed at the given start instant.
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    /// Moves the clock forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        let mut now = self.now.write().unwrap_or_else(PoisonError::into_inner);
        *now = *now + delta;
    }

    /// Jumps the clock to an absolute instant.
    pub fn set(&self, instant: DateTime<Utc>) {
        let mut now = self.now.write().unwrap_or_else(PoisonError::into_inner);
        *now = instant;
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read().unwrap_or_else(PoisonError::into_inner)
    }
}
