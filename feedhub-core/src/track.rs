//! Derived tracks for aircraft that do not transmit one, or that are on the
//! ground where transmitted headings are unreliable.
//!
//! For each aircraft a small side record remembers the last coordinate used
//! for a bearing and whether the track is "frozen" (we are still waiting for
//! the aircraft to move far enough to trust a bearing). The bearing is only
//! recomputed once the aircraft has moved further than the jitter threshold.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::geo::{haversine_km, initial_bearing, round_track};
use crate::message::BaseStationMessage;

/// Minimum movement before a bearing is recomputed on the ground.
pub const MIN_GROUND_MOVE_KM: f64 = 0.010;

/// Minimum movement before a bearing is recomputed in the air.
pub const MIN_AIRBORNE_MOVE_KM: f64 = 0.25;

/// Frozen ground tracks older than this are forgotten.
pub const FROZEN_TRACK_EXPIRY_MINUTES: i64 = 30;

/// Side record kept per aircraft while its track has to be derived.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackCalculationParameters {
    pub latitude: f64,
    pub longitude: f64,
    pub last_transmitted_track: Option<f32>,
    pub track_frozen: bool,
    pub track_frozen_at: DateTime<Utc>,
}

/// What the aircraft record currently says about its track.
#[derive(Debug, Clone, Copy, Default)]
pub struct CurrentTrack {
    pub track: Option<f32>,
    pub is_transmitting_track: bool,
}

/// Track calculation state for every aircraft in one store.
#[derive(Debug, Default)]
pub struct TrackCalculator {
    parameters: HashMap<u32, TrackCalculationParameters>,
}

impl TrackCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Work out the track to store for this message.
    pub fn calculate(
        &mut self,
        icao: u32,
        msg: &BaseStationMessage,
        current: CurrentTrack,
        now: DateTime<Utc>,
    ) -> Option<f32> {
        let mut result = msg.track;
        let on_ground = msg.on_ground.unwrap_or(false);
        let never_transmitted = !current.is_transmitting_track;

        // A zero track from an aircraft that has never sent a real one is noise
        if result == Some(0.0) && never_transmitted {
            result = None;
        }

        let Some((lat, lon)) = msg.position() else {
            return result;
        };
        if !on_ground && !never_transmitted {
            return result;
        }

        if on_ground {
            let expired = self.parameters.get(&icao).is_some_and(|p| {
                p.track_frozen_at + Duration::minutes(FROZEN_TRACK_EXPIRY_MINUTES) <= now
            });
            if expired {
                self.parameters.remove(&icao);
            }
        }

        let track_suspect = matches!(msg.track, None | Some(0.0));
        let mut track_frozen =
            on_ground && self.parameters.get(&icao).map_or(true, |p| p.track_frozen);
        if !track_suspect && !track_frozen {
            return result;
        }

        let mut calculated = false;
        match self.parameters.get_mut(&icao) {
            None => {
                self.parameters.insert(
                    icao,
                    TrackCalculationParameters {
                        latitude: lat,
                        longitude: lon,
                        last_transmitted_track: msg.track,
                        track_frozen: true,
                        track_frozen_at: now,
                    },
                );
                calculated = true;
            }
            Some(params) if params.latitude != lat || params.longitude != lon => {
                if track_frozen && on_ground && params.last_transmitted_track != msg.track {
                    track_frozen = false;
                    params.track_frozen = false;
                }
                if track_suspect || track_frozen {
                    let min_km = if on_ground {
                        MIN_GROUND_MOVE_KM
                    } else {
                        MIN_AIRBORNE_MOVE_KM
                    };
                    let moved = haversine_km(params.latitude, params.longitude, lat, lon);
                    if moved >= min_km {
                        result = Some(round_track(initial_bearing(
                            params.latitude,
                            params.longitude,
                            lat,
                            lon,
                        )));
                        params.latitude = lat;
                        params.longitude = lon;
                        calculated = true;
                    }
                    params.last_transmitted_track = msg.track;
                }
            }
            Some(_) => {}
        }

        if !calculated && (track_suspect || track_frozen) {
            result = current.track;
        }
        result
    }

    pub fn remove(&mut self, icao: u32) {
        self.parameters.remove(&icao);
    }

    pub fn clear(&mut self) {
        self.parameters.clear();
    }

    pub fn get(&self, icao: u32) -> Option<&TrackCalculationParameters> {
        self.parameters.get(&icao)
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};

    const ICAO: u32 = 0x4840D6;

    fn position(lat: f64, lon: f64, on_ground: bool) -> BaseStationMessage {
        let mut msg = BaseStationMessage::transmission("4840D6");
        msg.latitude = Some(lat);
        msg.longitude = Some(lon);
        msg.on_ground = Some(on_ground);
        msg
    }

    #[test]
    fn test_transmitted_track_passes_through() {
        let mut calc = TrackCalculator::new();
        let mut msg = position(51.0, -1.0, false);
        msg.track = Some(123.4);
        let current = CurrentTrack {
            track: None,
            is_transmitting_track: true,
        };
        let now = ManualClock::default().now();
        assert_eq!(calc.calculate(ICAO, &msg, current, now), Some(123.4));
        assert!(calc.is_empty());
    }

    #[test]
    fn test_zero_track_from_silent_aircraft_is_dropped() {
        let mut calc = TrackCalculator::new();
        let mut msg = BaseStationMessage::transmission("4840D6");
        msg.track = Some(0.0);
        let now = ManualClock::default().now();
        assert_eq!(calc.calculate(ICAO, &msg, CurrentTrack::default(), now), None);
    }

    #[test]
    fn test_airborne_bearing_after_threshold() {
        let clock = ManualClock::default();
        let mut calc = TrackCalculator::new();
        let mut current = CurrentTrack::default();

        // First position only seeds the parameters
        let t = calc.calculate(ICAO, &position(51.0, -1.0, false), current, clock.now());
        assert_eq!(t, None);
        assert!(calc.get(ICAO).is_some());

        // About 1.1 km due north
        let t = calc.calculate(ICAO, &position(51.01, -1.0, false), current, clock.now());
        assert_eq!(t, Some(0.0));
        current.track = t;

        // About 0.7 km due east
        let t = calc.calculate(ICAO, &position(51.01, -0.99, false), current, clock.now());
        let t = t.unwrap_or_default();
        assert!((t - 90.0).abs() < 0.5, "got {t}");
    }

    #[test]
    fn test_small_moves_keep_previous_track() {
        let clock = ManualClock::default();
        let mut calc = TrackCalculator::new();
        let mut current = CurrentTrack::default();

        calc.calculate(ICAO, &position(51.0, -1.0, false), current, clock.now());
        let first = calc.calculate(ICAO, &position(51.01, -1.0, false), current, clock.now());
        current.track = first;

        // Three samples each under 250 m from the last used coordinate
        for lon in [-0.999, -0.998, -0.997] {
            let t = calc.calculate(ICAO, &position(51.01, lon, false), current, clock.now());
            assert_eq!(t, first);
        }
    }

    #[test]
    fn test_ground_threshold_is_ten_metres() {
        let clock = ManualClock::default();
        let mut calc = TrackCalculator::new();
        let current = CurrentTrack::default();

        calc.calculate(ICAO, &position(51.0, -1.0, true), current, clock.now());
        // About 22 m north
        let t = calc.calculate(ICAO, &position(51.0002, -1.0, true), current, clock.now());
        assert_eq!(t, Some(0.0));
    }

    #[test]
    fn test_frozen_ground_track_expires() {
        let clock = ManualClock::default();
        let mut calc = TrackCalculator::new();
        let current = CurrentTrack::default();

        calc.calculate(ICAO, &position(51.0, -1.0, true), current, clock.now());
        let seeded_at = calc.get(ICAO).map(|p| p.track_frozen_at);

        clock.advance(Duration::minutes(FROZEN_TRACK_EXPIRY_MINUTES));
        calc.calculate(ICAO, &position(51.0, -1.0, true), current, clock.now());
        let reseeded_at = calc.get(ICAO).map(|p| p.track_frozen_at);

        assert_ne!(seeded_at, reseeded_at);
        assert_eq!(reseeded_at, Some(clock.now()));
    }

    #[test]
    fn test_remove_and_clear() {
        let clock = ManualClock::default();
        let mut calc = TrackCalculator::new();
        calc.calculate(ICAO, &position(51.0, -1.0, true), CurrentTrack::default(), clock.now());
        calc.calculate(7, &position(52.0, -1.0, true), CurrentTrack::default(), clock.now());
        assert_eq!(calc.len(), 2);
        calc.remove(ICAO);
        assert_eq!(calc.len(), 1);
        calc.clear();
        assert!(calc.is_empty());
    }
}
