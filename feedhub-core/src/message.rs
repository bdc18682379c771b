//! Inbound message record and the events listeners raise.
//!
//! A message is what an external decoder produces for one wire frame. The
//! core never parses raw bytes; it only folds these records into state.

use std::sync::Arc;

use crate::types::{ConnectionStatus, FeedError};

/// Message type discriminator. Only [`MessageType::Transmission`] mutates
/// aircraft state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageType {
    #[default]
    Transmission,
    NewAircraft,
    NewId,
    SelectionChange,
    StatusChange,
    Click,
    Unknown,
}

/// Extra values some decoders can supply alongside the basic fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Supplementary {
    /// Altitude is geometric (GNSS) rather than barometric.
    pub altitude_is_geometric: Option<bool>,
    /// Pressure setting transmitted by the aircraft, inches of mercury.
    pub pressure_setting_inhg: Option<f32>,
}

/// One decoded position/identity message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BaseStationMessage {
    pub message_type: MessageType,
    pub icao24: String,
    pub receiver_id: i32,
    pub callsign: Option<String>,
    pub altitude: Option<i32>,
    pub ground_speed: Option<f32>,
    pub track: Option<f32>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub vertical_rate: Option<i32>,
    pub squawk: Option<u16>,
    pub on_ground: Option<bool>,
    pub is_mlat: bool,
    pub supplementary: Option<Supplementary>,
}

impl BaseStationMessage {
    /// A transmission message for the given address.
    pub fn transmission(icao24: &str) -> Self {
        BaseStationMessage {
            icao24: icao24.to_string(),
            ..Default::default()
        }
    }

    /// Position when both coordinates are present and not the 0,0 placeholder.
    pub fn position(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) if lat != 0.0 || lon != 0.0 => Some((lat, lon)),
            _ => None,
        }
    }

    /// True when the message carries anything a position display would use.
    pub fn has_positional_data(&self) -> bool {
        self.position().is_some() || self.track.is_some() || self.ground_speed.is_some()
    }

    /// True when the message carries fields only ADS-B transponders send.
    pub fn has_adsb_fields(&self) -> bool {
        self.has_positional_data() || self.vertical_rate.is_some()
    }
}

/// A message as delivered by a listener.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedMessage {
    pub message: BaseStationMessage,
    pub is_out_of_band: bool,
    pub is_satcom_feed: bool,
}

impl FeedMessage {
    pub fn new(message: BaseStationMessage) -> Self {
        FeedMessage {
            message,
            is_out_of_band: false,
            is_satcom_feed: false,
        }
    }
}

/// Everything a listener can tell its subscribers.
#[derive(Debug, Clone)]
pub enum ListenerEvent {
    Message(FeedMessage),
    /// The position for this address jumped and its history is meaningless.
    PositionReset(u32),
    /// The underlying source changed; all state built from it is stale.
    SourceChanged,
    ConnectionStateChanged(ConnectionStatus),
    ExceptionCaught(Arc<FeedError>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_ignores_null_island() {
        let mut msg = BaseStationMessage::transmission("4840D6");
        msg.latitude = Some(0.0);
        msg.longitude = Some(0.0);
        assert_eq!(msg.position(), None);
        msg.latitude = Some(51.5);
        assert_eq!(msg.position(), Some((51.5, 0.0)));
    }

    #[test]
    fn test_has_positional_data() {
        let mut msg = BaseStationMessage::transmission("4840D6");
        assert!(!msg.has_positional_data());
        msg.vertical_rate = Some(-640);
        assert!(!msg.has_positional_data());
        assert!(msg.has_adsb_fields());
        msg.ground_speed = Some(412.0);
        assert!(msg.has_positional_data());
    }
}
