//! BaseStation (SBS-1, port 30003) line translator.
//!
//! Field layout:
//!
//! ```text
//!  0 message type (MSG, SEL, ID, AIR, STA, CLK)
//!  1 transmission type (MSG only, 1-8)
//!  4 ICAO24 address
//! 10 callsign       11 altitude (ft)     12 ground speed (kt)
//! 13 track          14 latitude          15 longitude
//! 16 vertical rate  17 squawk            18 alert
//! 19 emergency      20 spi               21 on ground
//! ```

use feedhub_core::message::{BaseStationMessage, MessageType};

fn field<'a>(fields: &[&'a str], index: usize) -> Option<&'a str> {
    fields
        .get(index)
        .copied()
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn parse_field<T: std::str::FromStr>(fields: &[&str], index: usize) -> Option<T> {
    field(fields, index).and_then(|s| s.parse().ok())
}

/// Flags are sent as `-1` / `1` for set and `0` for clear.
fn parse_flag(fields: &[&str], index: usize) -> Option<bool> {
    field(fields, index).map(|s| s != "0")
}

fn message_type(kind: &str) -> Option<MessageType> {
    match kind {
        "MSG" => Some(MessageType::Transmission),
        "AIR" => Some(MessageType::NewAircraft),
        "ID" => Some(MessageType::NewId),
        "SEL" => Some(MessageType::SelectionChange),
        "STA" => Some(MessageType::StatusChange),
        "CLK" => Some(MessageType::Click),
        _ => None,
    }
}

/// Translate one line. Returns `None` for lines that are not BaseStation
/// records.
pub fn parse_line(line: &str, receiver_id: i32) -> Option<BaseStationMessage> {
    let fields: Vec<&str> = line.trim().split(',').collect();
    let message_type = message_type(fields.first()?.trim())?;
    let icao24 = field(&fields, 4)?.to_uppercase();

    Some(BaseStationMessage {
        message_type,
        icao24,
        receiver_id,
        callsign: field(&fields, 10).map(str::to_string),
        altitude: parse_field(&fields, 11),
        ground_speed: parse_field(&fields, 12),
        track: parse_field(&fields, 13),
        latitude: parse_field(&fields, 14),
        longitude: parse_field(&fields, 15),
        vertical_rate: parse_field(&fields, 16),
        squawk: parse_field(&fields, 17),
        on_ground: parse_flag(&fields, 21),
        is_mlat: false,
        supplementary: None,
    })
}
