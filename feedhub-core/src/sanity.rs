//! Per-address sanity checks on altitude and position.
//!
//! Transponder and decoder glitches produce the occasional impossible value:
//! an altitude that jumps 20,000 ft in a second, or a position on the other
//! side of the country. The checker keeps a little history per address and
//! judges each new value against it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::geo::haversine_nm;

/// Fastest plausible altitude change, feet per second.
pub const MAX_FEET_PER_SECOND: f64 = 600.0;

/// Fastest plausible ground speed, knots.
pub const MAX_SPEED_KNOTS: f64 = 1500.0;

/// History older than this is discarded rather than compared against.
pub const HISTORY_WINDOW_SECONDS: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Certainty {
    Uncertain,
    ProbablyRight,
    CertainlyWrong,
}

pub trait SanityChecker: Send + Sync {
    fn check_altitude(&self, icao: u32, at: DateTime<Utc>, altitude: i32) -> Certainty;
    fn check_position(&self, icao: u32, at: DateTime<Utc>, lat: f64, lon: f64) -> Certainty;
    /// Forget everything known about the address.
    fn reset_aircraft(&self, icao: u32);
    /// Forget everything.
    fn reset(&self);
}

#[derive(Debug, Clone, Copy)]
struct Sample<T> {
    at: DateTime<Utc>,
    value: T,
    confirmed: bool,
}

#[derive(Debug, Default)]
struct History {
    altitude: Option<Sample<i32>>,
    position: Option<Sample<(f64, f64)>>,
}

/// Rate-of-change based checker.
#[derive(Debug, Default)]
pub struct DefaultSanityChecker {
    history: Mutex<HashMap<u32, History>>,
}

impl DefaultSanityChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracked_count(&self) -> usize {
        self.history.lock().len()
    }
}

/// Judge a new value against the last one using the given rate check.
fn judge<T: Copy>(
    slot: &mut Option<Sample<T>>,
    at: DateTime<Utc>,
    value: T,
    plausible: impl Fn(T, T, f64) -> bool,
) -> Certainty {
    let previous = match slot {
        Some(prev) => *prev,
        None => {
            *slot = Some(Sample { at, value, confirmed: false });
            return Certainty::Uncertain;
        }
    };

    let elapsed = (at - previous.at).num_milliseconds() as f64 / 1000.0;
    if elapsed > HISTORY_WINDOW_SECONDS || elapsed < 0.0 {
        *slot = Some(Sample { at, value, confirmed: false });
        return Certainty::Uncertain;
    }

    if plausible(previous.value, value, elapsed.max(1.0)) {
        *slot = Some(Sample { at, value, confirmed: true });
        Certainty::ProbablyRight
    } else if previous.confirmed {
        Certainty::CertainlyWrong
    } else {
        *slot = Some(Sample { at, value, confirmed: false });
        Certainty::Uncertain
    }
}

impl SanityChecker for DefaultSanityChecker {
    fn check_altitude(&self, icao: u32, at: DateTime<Utc>, altitude: i32) -> Certainty {
        let mut history = self.history.lock();
        let entry = history.entry(icao).or_default();
        judge(&mut entry.altitude, at, altitude, |prev, next, secs| {
            ((next - prev).abs() as f64) / secs <= MAX_FEET_PER_SECOND
        })
    }

    fn check_position(&self, icao: u32, at: DateTime<Utc>, lat: f64, lon: f64) -> Certainty {
        let mut history = self.history.lock();
        let entry = history.entry(icao).or_default();
        judge(&mut entry.position, at, (lat, lon), |prev, next, secs| {
            let nm = haversine_nm(prev.0, prev.1, next.0, next.1);
            nm / (secs / 3600.0) <= MAX_SPEED_KNOTS
        })
    }

    fn reset_aircraft(&self, icao: u32) {
        self.history.lock().remove(&icao);
    }

    fn reset(&self) {
        self.history.lock().clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use chrono::Duration;

    #[test]
    fn test_first_altitude_is_uncertain() {
        let checker = DefaultSanityChecker::new();
        let now = ManualClock::default().now();
        assert_eq!(checker.check_altitude(1, now, 35000), Certainty::Uncertain);
    }

    #[test]
    fn test_altitude_spike_after_confirmation_is_wrong() {
        let checker = DefaultSanityChecker::new();
        let clock = ManualClock::default();
        checker.check_altitude(1, clock.now(), 35000);
        clock.advance(Duration::seconds(1));
        assert_eq!(checker.check_altitude(1, clock.now(), 35025), Certainty::ProbablyRight);
        clock.advance(Duration::seconds(1));
        assert_eq!(checker.check_altitude(1, clock.now(), 3025), Certainty::CertainlyWrong);
        // The spike did not become the new baseline
        clock.advance(Duration::seconds(1));
        assert_eq!(checker.check_altitude(1, clock.now(), 35050), Certainty::ProbablyRight);
    }

    #[test]
    fn test_unconfirmed_jump_becomes_baseline() {
        let checker = DefaultSanityChecker::new();
        let clock = ManualClock::default();
        checker.check_altitude(1, clock.now(), 35000);
        clock.advance(Duration::seconds(1));
        assert_eq!(checker.check_altitude(1, clock.now(), 5000), Certainty::Uncertain);
        clock.advance(Duration::seconds(1));
        assert_eq!(checker.check_altitude(1, clock.now(), 5010), Certainty::ProbablyRight);
    }

    #[test]
    fn test_stale_history_restarts() {
        let checker = DefaultSanityChecker::new();
        let clock = ManualClock::default();
        checker.check_altitude(1, clock.now(), 35000);
        clock.advance(Duration::seconds(1));
        checker.check_altitude(1, clock.now(), 35000);
        clock.advance(Duration::seconds(120));
        assert_eq!(checker.check_altitude(1, clock.now(), 1000), Certainty::Uncertain);
    }

    #[test]
    fn test_position_teleport_is_wrong() {
        let checker = DefaultSanityChecker::new();
        let clock = ManualClock::default();
        checker.check_position(1, clock.now(), 51.0, -1.0);
        clock.advance(Duration::seconds(2));
        assert_eq!(checker.check_position(1, clock.now(), 51.002, -1.0), Certainty::ProbablyRight);
        clock.advance(Duration::seconds(2));
        assert_eq!(checker.check_position(1, clock.now(), 40.0, -74.0), Certainty::CertainlyWrong);
    }

    #[test]
    fn test_reset_aircraft_forgets_history() {
        let checker = DefaultSanityChecker::new();
        let now = ManualClock::default().now();
        checker.check_altitude(1, now, 1000);
        checker.check_altitude(2, now, 1000);
        assert_eq!(checker.tracked_count(), 2);
        checker.reset_aircraft(1);
        assert_eq!(checker.tracked_count(), 1);
        checker.reset();
        assert_eq!(checker.tracked_count(), 0);
    }
}
