//! Shared types, error enum, and address helpers for feedhub-core.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors produced by feedhub-core.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("the feed manager has already been initialised")]
    AlreadyInitialised,
    #[error("the feed manager has not been initialised")]
    NotInitialised,
    #[error("unique id {0} is already in use")]
    DuplicateUniqueId(i32),
    #[error("no more custom feed ids can be allocated")]
    CustomIdsExhausted,
    #[error("invalid lookup provider: {0}")]
    InvalidProvider(String),
    #[error("collaborator failed: {0}")]
    Collaborator(String),
    #[error("listener error: {0}")]
    Listener(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FeedError>;

// ---------------------------------------------------------------------------
// ICAO24 addresses
// ---------------------------------------------------------------------------

/// Parse a 24-bit address from its six hex digit form.
///
/// Surrounding whitespace is ignored. Anything other than exactly six hex
/// digits is rejected.
pub fn parse_icao24(s: &str) -> Option<u32> {
    let s = s.trim();
    if s.len() != 6 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(s, 16).ok()
}

/// Format a 24-bit address as six upper-case hex digits.
pub fn icao_to_string(icao: u32) -> String {
    format!("{:06X}", icao & 0x00FF_FFFF)
}

/// Normalise an address for keyed lookups: trimmed, upper-case, validated.
pub fn normalise_icao24(s: &str) -> Option<String> {
    parse_icao24(s).map(icao_to_string)
}

// ---------------------------------------------------------------------------
// Connection state
// ---------------------------------------------------------------------------

/// Connection state reported by listeners and feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Reconnecting => "reconnecting",
        }
    }
}

/// Emergency squawk codes (hijack, radio failure, general emergency).
pub fn is_emergency_squawk(squawk: u16) -> bool {
    matches!(squawk, 7500 | 7600 | 7700)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
