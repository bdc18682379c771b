//! Listener that merges the messages of several receiver listeners.
//!
//! Each address is owned by one component at a time. Messages from the owner
//! pass through; messages from anyone else are dropped until the owner has
//! been silent for the ICAO timeout, at which point ownership moves. Position
//! data from a multilateration component is let through as out-of-band so the
//! store can fill gaps without overriding the owner's positions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::clock::Clock;
use crate::config::ReceiverConfig;
use crate::events::{EventHub, SubscriptionId};
use crate::listener::{same_listener, Listener};
use crate::message::{FeedMessage, ListenerEvent, MessageType};
use crate::types::{icao_to_string, normalise_icao24, ConnectionStatus};

/// Addresses silent for this long are forgotten.
pub const CLEANUP_AFTER_MINUTES: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergedFeedSettings {
    pub icao_timeout: Duration,
    pub ignore_aircraft_with_no_position: bool,
}

impl Default for MergedFeedSettings {
    fn default() -> Self {
        MergedFeedSettings {
            icao_timeout: Duration::milliseconds(5000),
            ignore_aircraft_with_no_position: false,
        }
    }
}

/// One listener feeding a merged feed.
#[derive(Clone)]
pub struct MergedFeedComponent {
    pub listener: Arc<dyn Listener>,
    pub is_mlat_feed: bool,
}

struct Subscribed {
    listener: Arc<dyn Listener>,
    is_mlat_feed: Arc<AtomicBool>,
    subscription: SubscriptionId,
}

#[derive(Debug, Clone, Copy)]
struct Source {
    receiver_id: i32,
    last_message_at: DateTime<Utc>,
    seen_position: bool,
}

pub struct MergedFeedListener {
    receiver_id: i32,
    name: RwLock<String>,
    clock: Arc<dyn Clock>,
    settings: RwLock<MergedFeedSettings>,
    components: Mutex<Vec<Subscribed>>,
    sources: Mutex<HashMap<String, Source>>,
    events: EventHub<ListenerEvent>,
    forwarded: AtomicU64,
    out_of_band: AtomicU64,
    weak_self: Weak<MergedFeedListener>,
}

impl MergedFeedListener {
    pub fn new(receiver_id: i32, name: &str, settings: MergedFeedSettings, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| MergedFeedListener {
            receiver_id,
            name: RwLock::new(name.to_string()),
            clock,
            settings: RwLock::new(settings),
            components: Mutex::new(Vec::new()),
            sources: Mutex::new(HashMap::new()),
            events: EventHub::new(),
            forwarded: AtomicU64::new(0),
            out_of_band: AtomicU64::new(0),
            weak_self: weak_self.clone(),
        })
    }

    pub fn apply_settings(&self, name: &str, settings: MergedFeedSettings) {
        *self.name.write() = name.to_string();
        *self.settings.write() = settings;
    }

    pub fn settings(&self) -> MergedFeedSettings {
        *self.settings.read()
    }

    /// Replace the component set. Components already subscribed stay
    /// subscribed; a new listener instance for the same receiver is treated as
    /// a new component.
    pub fn set_listeners(&self, components: Vec<MergedFeedComponent>) {
        let mut current = self.components.lock();
        let mut kept = Vec::with_capacity(components.len());
        for sub in current.drain(..) {
            match components.iter().find(|c| same_listener(&c.listener, &sub.listener)) {
                Some(c) => {
                    sub.is_mlat_feed.store(c.is_mlat_feed, Ordering::SeqCst);
                    kept.push(sub);
                }
                None => {
                    sub.listener.events().unsubscribe(sub.subscription);
                }
            }
        }
        for c in components {
            if kept.iter().any(|k: &Subscribed| same_listener(&k.listener, &c.listener)) {
                continue;
            }
            let is_mlat_feed = Arc::new(AtomicBool::new(c.is_mlat_feed));
            let subscription = self.subscribe_to(&c.listener, is_mlat_feed.clone());
            kept.push(Subscribed {
                listener: c.listener,
                is_mlat_feed,
                subscription,
            });
        }
        debug!(feed_id = self.receiver_id, components = kept.len(), "merged feed components set");
        *current = kept;
    }

    fn subscribe_to(&self, listener: &Arc<dyn Listener>, is_mlat_feed: Arc<AtomicBool>) -> SubscriptionId {
        let merged = self.weak_self.clone();
        let receiver_id = listener.receiver_id();
        listener.events().subscribe(move |event| {
            if let Some(merged) = merged.upgrade() {
                merged.handle_component_event(receiver_id, is_mlat_feed.load(Ordering::Relaxed), event);
            }
        })
    }

    /// Receiver ids of the current components.
    pub fn component_ids(&self) -> Vec<i32> {
        self.components
            .lock()
            .iter()
            .map(|c| c.listener.receiver_id())
            .collect()
    }

    /// Unsubscribe from every component.
    pub fn dispose(&self) {
        let mut current = self.components.lock();
        for sub in current.drain(..) {
            sub.listener.events().unsubscribe(sub.subscription);
        }
        self.sources.lock().clear();
    }

    fn handle_component_event(&self, receiver_id: i32, is_mlat_feed: bool, event: &ListenerEvent) {
        match event {
            ListenerEvent::Message(msg) => {
                if let Some(out) = self.filter(receiver_id, is_mlat_feed, msg) {
                    self.events.publish(&ListenerEvent::Message(out));
                }
            }
            ListenerEvent::PositionReset(icao) => {
                let owner = self
                    .sources
                    .lock()
                    .get(&icao_to_string(*icao))
                    .map(|s| s.receiver_id);
                if owner == Some(receiver_id) {
                    self.events.publish(&ListenerEvent::PositionReset(*icao));
                }
            }
            _ => {}
        }
    }

    /// Decide whether a component's message goes through, and how.
    fn filter(&self, receiver_id: i32, is_mlat_feed: bool, feed_message: &FeedMessage) -> Option<FeedMessage> {
        let msg = &feed_message.message;
        if msg.message_type != MessageType::Transmission {
            return None;
        }
        let icao = normalise_icao24(&msg.icao24)?;
        let now = self.clock.now();
        let settings = self.settings();
        let is_mlat = is_mlat_feed || msg.is_mlat;

        let mut sources = self.sources.lock();
        let mut out_of_band = false;
        let mut source = match sources.get(&icao).copied() {
            None => Source {
                receiver_id,
                last_message_at: now,
                seen_position: false,
            },
            Some(mut source) => {
                if source.receiver_id == receiver_id {
                    source.last_message_at = now;
                } else if source.last_message_at + settings.icao_timeout <= now {
                    source.receiver_id = receiver_id;
                    source.last_message_at = now;
                } else if is_mlat && msg.has_positional_data() {
                    out_of_band = true;
                } else {
                    return None;
                }
                source
            }
        };
        if msg.position().is_some() {
            source.seen_position = true;
        }
        sources.insert(icao, source);
        if settings.ignore_aircraft_with_no_position && !out_of_band && !source.seen_position {
            return None;
        }
        drop(sources);

        self.forwarded.fetch_add(1, Ordering::Relaxed);
        if out_of_band {
            self.out_of_band.fetch_add(1, Ordering::Relaxed);
        }
        let mut message = msg.clone();
        message.is_mlat = is_mlat;
        Some(FeedMessage {
            message,
            is_out_of_band: feed_message.is_out_of_band || out_of_band,
            is_satcom_feed: feed_message.is_satcom_feed,
        })
    }

    /// Forget addresses nobody has sent for a while. Returns how many.
    pub fn cleanup(&self, now: DateTime<Utc>) -> usize {
        let threshold = now - Duration::minutes(CLEANUP_AFTER_MINUTES);
        let mut sources = self.sources.lock();
        let before = sources.len();
        sources.retain(|_, s| s.last_message_at > threshold);
        before - sources.len()
    }

    pub fn tracked_count(&self) -> usize {
        self.sources.lock().len()
    }

    /// Messages forwarded, and how many of those went out-of-band.
    pub fn forwarded_counts(&self) -> (u64, u64) {
        (
            self.forwarded.load(Ordering::Relaxed),
            self.out_of_band.load(Ordering::Relaxed),
        )
    }
}

impl Listener for MergedFeedListener {
    fn receiver_id(&self) -> i32 {
        self.receiver_id
    }

    fn name(&self) -> String {
        self.name.read().clone()
    }

    fn is_satcom_feed(&self) -> bool {
        false
    }

    fn connection_status(&self) -> ConnectionStatus {
        ConnectionStatus::Connected
    }

    fn connect(&self) {}

    fn disconnect(&self) {}

    fn apply_configuration(&self, _receiver: &ReceiverConfig) {}

    fn events(&self) -> &EventHub<ListenerEvent> {
        &self.events
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
