//! Aircraft record with a version stamp per mutable field.
//!
//! Every field that can change carries the store version at which it last
//! changed. A reader holding the version from its previous snapshot can pick
//! out exactly the fields that changed since.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::types::icao_to_string;

/// Maximum points kept in the full trail.
pub const MAX_FULL_TRAIL: usize = 1000;

/// Maximum points kept in the short trail, whatever its time window.
pub const MAX_SHORT_TRAIL: usize = 500;

/// Standard pressure in inches of mercury.
pub const STANDARD_PRESSURE_INHG: f32 = 29.92;

// ---------------------------------------------------------------------------
// Versioned values
// ---------------------------------------------------------------------------

/// A value and the version at which it last changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Versioned<T> {
    pub value: T,
    pub version: i64,
}

impl<T: PartialEq> Versioned<T> {
    pub fn new(value: T) -> Self {
        Versioned { value, version: 0 }
    }

    /// Store the value, stamping the version only when it actually changed.
    /// Returns true when it changed.
    pub fn set(&mut self, value: T, version: i64) -> bool {
        if self.value == value {
            return false;
        }
        self.value = value;
        self.version = version;
        true
    }

    pub fn changed_since(&self, version: i64) -> bool {
        self.version > version
    }
}

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AltitudeType {
    #[default]
    Barometric,
    Geometric,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransponderType {
    #[default]
    Unknown,
    ModeS,
    Adsb,
}

// ---------------------------------------------------------------------------
// Trails and detail
// ---------------------------------------------------------------------------

/// One trail point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Coordinate {
    pub at: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub track: Option<f32>,
    pub altitude: Option<i32>,
    pub ground_speed: Option<f32>,
}

/// Identity detail supplied by an enrichment provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AircraftDetail {
    pub icao24: String,
    pub registration: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub model_icao: Option<String>,
    pub operator: Option<String>,
    pub operator_icao: Option<String>,
    pub serial: Option<String>,
    pub year_built: Option<String>,
}

// ---------------------------------------------------------------------------
// Aircraft record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Aircraft {
    pub unique_id: u32,
    pub icao24: Versioned<String>,
    /// Highest version stamped on any field of this record.
    pub data_version: i64,

    pub first_seen: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub last_mode_s_update: Option<DateTime<Utc>>,
    pub last_satcom_update: Option<DateTime<Utc>>,

    pub receiver_id: Versioned<i32>,
    pub count_messages_received: Versioned<u64>,
    pub callsign: Versioned<Option<String>>,
    pub transponder_type: Versioned<TransponderType>,

    pub latitude: Versioned<Option<f64>>,
    pub longitude: Versioned<Option<f64>>,
    pub position_time: Option<DateTime<Utc>>,
    pub position_is_mlat: Versioned<bool>,
    pub position_receiver_id: Versioned<i32>,

    pub altitude: Versioned<Option<i32>>,
    pub geometric_altitude: Versioned<Option<i32>>,
    pub altitude_type: Versioned<AltitudeType>,
    pub air_pressure_inhg: Versioned<Option<f32>>,
    pub air_pressure_looked_up_at: Option<DateTime<Utc>>,

    pub ground_speed: Versioned<Option<f32>>,
    pub vertical_rate: Versioned<Option<i32>>,
    pub track: Versioned<Option<f32>>,
    pub is_transmitting_track: Versioned<bool>,
    pub squawk: Versioned<Option<u16>>,
    pub emergency: Versioned<bool>,
    pub on_ground: Versioned<Option<bool>>,

    pub registration: Versioned<Option<String>>,
    pub manufacturer: Versioned<Option<String>>,
    pub model: Versioned<Option<String>>,
    pub model_icao: Versioned<Option<String>>,
    pub operator: Versioned<Option<String>>,
    pub operator_icao: Versioned<Option<String>>,
    pub serial: Versioned<Option<String>>,
    pub year_built: Versioned<Option<String>>,

    pub full_coordinates: Vec<Coordinate>,
    pub full_coordinates_version: i64,
    pub short_coordinates: Vec<Coordinate>,
    pub short_coordinates_version: i64,
}

impl Aircraft {
    pub fn new(icao: u32, now: DateTime<Utc>) -> Self {
        Aircraft {
            unique_id: icao,
            icao24: Versioned::new(icao_to_string(icao)),
            data_version: 0,
            first_seen: now,
            last_update: now,
            last_mode_s_update: None,
            last_satcom_update: None,
            receiver_id: Versioned::new(0),
            count_messages_received: Versioned::new(0),
            callsign: Versioned::default(),
            transponder_type: Versioned::default(),
            latitude: Versioned::default(),
            longitude: Versioned::default(),
            position_time: None,
            position_is_mlat: Versioned::new(false),
            position_receiver_id: Versioned::new(0),
            altitude: Versioned::default(),
            geometric_altitude: Versioned::default(),
            altitude_type: Versioned::default(),
            air_pressure_inhg: Versioned::default(),
            air_pressure_looked_up_at: None,
            ground_speed: Versioned::default(),
            vertical_rate: Versioned::default(),
            track: Versioned::default(),
            is_transmitting_track: Versioned::new(false),
            squawk: Versioned::default(),
            emergency: Versioned::new(false),
            on_ground: Versioned::default(),
            registration: Versioned::default(),
            manufacturer: Versioned::default(),
            model: Versioned::default(),
            model_icao: Versioned::default(),
            operator: Versioned::default(),
            operator_icao: Versioned::default(),
            serial: Versioned::default(),
            year_built: Versioned::default(),
            full_coordinates: Vec::new(),
            full_coordinates_version: 0,
            short_coordinates: Vec::new(),
            short_coordinates_version: 0,
        }
    }

    /// Stamp the icao field of a brand new record.
    pub(crate) fn stamp_new(&mut self, version: i64) {
        self.icao24.version = version;
        self.data_version = version;
    }

    pub fn position(&self) -> Option<(f64, f64)> {
        match (self.latitude.value, self.longitude.value) {
            (Some(lat), Some(lon)) if lat != 0.0 || lon != 0.0 => Some((lat, lon)),
            _ => None,
        }
    }

    /// True when neither a Mode-S nor a Satcom message has arrived since the
    /// respective threshold.
    pub fn is_expired(&self, mode_s_threshold: DateTime<Utc>, satcom_threshold: DateTime<Utc>) -> bool {
        self.last_mode_s_update.map_or(true, |t| t < mode_s_threshold)
            && self.last_satcom_update.map_or(true, |t| t < satcom_threshold)
    }

    /// Add the current position to the trails.
    ///
    /// The full trail only keeps points where the track changed: a new point
    /// on an unchanged heading slides the previous one forward. The short
    /// trail keeps every point inside the time window.
    pub fn update_coordinates(&mut self, now: DateTime<Utc>, short_trail_seconds: i64, version: i64) {
        let Some((latitude, longitude)) = self.position() else {
            return;
        };
        let coordinate = Coordinate {
            at: now,
            latitude,
            longitude,
            track: self.track.value,
            altitude: self.altitude.value,
            ground_speed: self.ground_speed.value,
        };

        let last = self.full_coordinates.last();
        if last.is_some_and(|c| c.latitude == latitude && c.longitude == longitude) {
            return;
        }

        let len = self.full_coordinates.len();
        let straight = len >= 2
            && self.full_coordinates[len - 1].track == coordinate.track
            && self.full_coordinates[len - 2].track == coordinate.track;
        if straight {
            self.full_coordinates[len - 1] = coordinate.clone();
        } else {
            self.full_coordinates.push(coordinate.clone());
            if self.full_coordinates.len() > MAX_FULL_TRAIL {
                self.full_coordinates.remove(0);
            }
        }
        self.full_coordinates_version = version;

        let threshold = now - Duration::seconds(short_trail_seconds);
        self.short_coordinates.retain(|c| c.at >= threshold);
        self.short_coordinates.push(coordinate);
        if self.short_coordinates.len() > MAX_SHORT_TRAIL {
            let excess = self.short_coordinates.len() - MAX_SHORT_TRAIL;
            self.short_coordinates.drain(..excess);
        }
        self.short_coordinates_version = version;
        self.data_version = version;
    }

    pub fn reset_coordinates(&mut self, version: i64) {
        if self.full_coordinates.is_empty() && self.short_coordinates.is_empty() {
            return;
        }
        self.full_coordinates.clear();
        self.short_coordinates.clear();
        self.full_coordinates_version = version;
        self.short_coordinates_version = version;
        self.data_version = version;
    }

    /// Copy identity detail onto the record. Returns true when anything changed.
    pub fn apply_detail(&mut self, detail: &AircraftDetail, version: i64) -> bool {
        let mut changed = false;
        changed |= self.registration.set(detail.registration.clone(), version);
        changed |= self.manufacturer.set(detail.manufacturer.clone(), version);
        changed |= self.model.set(detail.model.clone(), version);
        changed |= self.model_icao.set(detail.model_icao.clone(), version);
        changed |= self.operator.set(detail.operator.clone(), version);
        changed |= self.operator_icao.set(detail.operator_icao.clone(), version);
        changed |= self.serial.set(detail.serial.clone(), version);
        changed |= self.year_built.set(detail.year_built.clone(), version);
        if changed {
            self.data_version = version;
        }
        changed
    }
}

/// Convert a pressure altitude to a geometric one with the given setting.
pub fn pressure_to_geometric_altitude(altitude: i32, pressure_inhg: f32) -> i32 {
    altitude + ((pressure_inhg - STANDARD_PRESSURE_INHG) * 1000.0).round() as i32
}

/// Convert a geometric altitude to a pressure one with the given setting.
pub fn geometric_to_pressure_altitude(altitude: i32, pressure_inhg: f32) -> i32 {
    altitude - ((pressure_inhg - STANDARD_PRESSURE_INHG) * 1000.0).round() as i32
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
