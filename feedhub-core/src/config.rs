//! Configuration document for feedhub.
//!
//! Reads/writes `~/.feedhub/config.json` holding the receivers, merged feeds,
//! aircraft list timeouts, online lookup settings and web server address.
//! Every section has defaults so a partial file loads.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::{FeedError, Result};

/// Full configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub receivers: Vec<ReceiverConfig>,
    pub merged_feeds: Vec<MergedFeedConfig>,
    pub base_station: BaseStationSettings,
    pub online_lookup: OnlineLookupSettings,
    pub web: WebConfig,
}

/// How a feed is exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiverUsage {
    #[default]
    Normal,
    HideFromWebSite,
    MergeOnly,
}

impl ReceiverUsage {
    pub fn is_visible(&self) -> bool {
        matches!(self, ReceiverUsage::Normal)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    pub unique_id: i32,
    pub name: String,
    pub enabled: bool,
    pub usage: ReceiverUsage,
    pub auto_reconnect: bool,
    /// `host:port` of the BaseStation-format source.
    pub address: String,
    pub is_satcom_feed: bool,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        ReceiverConfig {
            unique_id: 0,
            name: String::new(),
            enabled: true,
            usage: ReceiverUsage::Normal,
            auto_reconnect: true,
            address: "127.0.0.1:30003".into(),
            is_satcom_feed: false,
        }
    }
}

impl ReceiverConfig {
    /// Two entries describe the same source when their endpoint matches.
    pub fn same_source(&self, other: &ReceiverConfig) -> bool {
        self.address == other.address
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergedFeedConfig {
    pub unique_id: i32,
    pub name: String,
    pub enabled: bool,
    pub receiver_ids: Vec<i32>,
    /// Members whose positions come from multilateration.
    pub mlat_receiver_ids: Vec<i32>,
    pub icao_timeout_ms: u64,
    pub ignore_aircraft_with_no_position: bool,
    pub usage: ReceiverUsage,
}

impl Default for MergedFeedConfig {
    fn default() -> Self {
        MergedFeedConfig {
            unique_id: 0,
            name: String::new(),
            enabled: true,
            receiver_ids: Vec::new(),
            mlat_receiver_ids: Vec::new(),
            icao_timeout_ms: 5000,
            ignore_aircraft_with_no_position: false,
            usage: ReceiverUsage::Normal,
        }
    }
}

/// Aircraft list timeouts shared by every store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaseStationSettings {
    pub display_timeout_seconds: i64,
    pub satcom_display_timeout_minutes: i64,
    pub tracking_timeout_seconds: i64,
    pub satcom_tracking_timeout_minutes: i64,
    pub short_trail_length_seconds: i64,
}

impl Default for BaseStationSettings {
    fn default() -> Self {
        BaseStationSettings {
            display_timeout_seconds: 30,
            satcom_display_timeout_minutes: 120,
            tracking_timeout_seconds: 600,
            satcom_tracking_timeout_minutes: 240,
            short_trail_length_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OnlineLookupSettings {
    pub enabled: bool,
    pub url: Option<String>,
    pub max_batch_size: usize,
    pub min_seconds_between_requests: i64,
    pub max_seconds_after_failed_request: i64,
    pub request_timeout_seconds: u64,
}

impl Default for OnlineLookupSettings {
    fn default() -> Self {
        OnlineLookupSettings {
            enabled: false,
            url: None,
            max_batch_size: 20,
            min_seconds_between_requests: 1,
            max_seconds_after_failed_request: 60,
            request_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        WebConfig {
            host: "127.0.0.1".into(),
            port: 8080,
        }
    }
}

impl Configuration {
    /// Reject documents with missing or duplicated feed ids.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        let ids = self
            .receivers
            .iter()
            .map(|r| r.unique_id)
            .chain(self.merged_feeds.iter().map(|m| m.unique_id));
        for id in ids {
            if id <= 0 {
                return Err(FeedError::Config(format!("feed id {id} must be positive")));
            }
            if !seen.insert(id) {
                return Err(FeedError::DuplicateUniqueId(id));
            }
        }
        Ok(())
    }

    /// Every configured feed id, enabled or not.
    pub fn configured_ids(&self) -> impl Iterator<Item = i32> + '_ {
        self.receivers
            .iter()
            .map(|r| r.unique_id)
            .chain(self.merged_feeds.iter().map(|m| m.unique_id))
    }
}

/// Get the config directory path (`~/.feedhub/`).
pub fn config_dir() -> PathBuf {
    dirs_home().join(".feedhub")
}

/// Get the default config file path.
pub fn config_file() -> PathBuf {
    config_dir().join("config.json")
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load a configuration file.
///
/// Returns the default document if the file doesn't exist.
pub fn load_config(path: &Path) -> Result<Configuration> {
    if !path.exists() {
        return Ok(Configuration::default());
    }
    let text = std::fs::read_to_string(path)?;
    parse_config(&text)
}

pub fn parse_config(text: &str) -> Result<Configuration> {
    let config: Configuration = serde_json::from_str(text)?;
    config.validate()?;
    Ok(config)
}

/// Save a configuration file, creating its directory if needed.
pub fn save_config(config: &Configuration, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let text = serde_json::to_string_pretty(config)?;
    std::fs::write(path, text)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
