//! Feeds: a numbered, named pairing of a listener and an aircraft store.
//!
//! Receiver feeds wrap one receiver's listener, merged feeds wrap a
//! [`MergedFeedListener`] over several receiver feeds, and custom feeds are
//! supplied from outside and only managed, never built, here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Duration;
use parking_lot::{Mutex, RwLock};
use tracing::info;

use crate::clock::Clock;
use crate::config::{MergedFeedConfig, ReceiverConfig};
use crate::events::{EventHub, SubscriptionId};
use crate::listener::Listener;
use crate::merged::{MergedFeedComponent, MergedFeedListener, MergedFeedSettings};
use crate::message::ListenerEvent;
use crate::reconcile::LiveFeed;
use crate::store::{AircraftStore, StoreEvent};
use crate::types::{ConnectionStatus, FeedError};

/// Events a feed raises to whoever manages it.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    ExceptionCaught(Arc<FeedError>),
    ConnectionStateChanged(ConnectionStatus),
}

/// A feed supplied by an external caller.
pub trait CustomFeed: Send + Sync {
    fn unique_id(&self) -> i32;
    fn set_unique_id(&self, id: i32);
    fn name(&self) -> String;
    fn is_visible(&self) -> bool;
    fn connection_status(&self) -> ConnectionStatus;
    fn listener(&self) -> Option<Arc<dyn Listener>>;
    fn store(&self) -> Option<Arc<AircraftStore>>;
    fn connect(&self);
    fn disconnect(&self);
    fn events(&self) -> &EventHub<FeedEvent>;
}

/// Re-raise a listener's connection and exception events as feed events.
fn forward_listener_events(listener: &dyn Listener, events: &Arc<EventHub<FeedEvent>>) -> SubscriptionId {
    let events = events.clone();
    listener.events().subscribe(move |event| match event {
        ListenerEvent::ConnectionStateChanged(status) => {
            events.publish(&FeedEvent::ConnectionStateChanged(*status));
        }
        ListenerEvent::ExceptionCaught(error) => {
            events.publish(&FeedEvent::ExceptionCaught(error.clone()));
        }
        _ => {}
    })
}

fn forward_store_events(store: &AircraftStore, events: &Arc<EventHub<FeedEvent>>) -> SubscriptionId {
    let events = events.clone();
    store.events().subscribe(move |event| {
        if let StoreEvent::ExceptionCaught(error) = event {
            events.publish(&FeedEvent::ExceptionCaught(error.clone()));
        }
    })
}

// ---------------------------------------------------------------------------
// Receiver feed
// ---------------------------------------------------------------------------

pub struct ReceiverFeed {
    unique_id: i32,
    config: RwLock<ReceiverConfig>,
    listener: Arc<dyn Listener>,
    store: Arc<AircraftStore>,
    events: Arc<EventHub<FeedEvent>>,
    subscriptions: Mutex<Option<(SubscriptionId, SubscriptionId)>>,
    disposed: AtomicBool,
}

impl ReceiverFeed {
    /// Wire the listener into the store. Does not connect.
    pub fn new(config: &ReceiverConfig, listener: Arc<dyn Listener>, store: Arc<AircraftStore>) -> Self {
        let events = Arc::new(EventHub::new());
        let listener_sub = forward_listener_events(listener.as_ref(), &events);
        let store_sub = forward_store_events(&store, &events);
        store.start(listener.clone());
        ReceiverFeed {
            unique_id: config.unique_id,
            config: RwLock::new(config.clone()),
            listener,
            store,
            events,
            subscriptions: Mutex::new(Some((listener_sub, store_sub))),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn unique_id(&self) -> i32 {
        self.unique_id
    }

    pub fn config(&self) -> ReceiverConfig {
        self.config.read().clone()
    }

    pub fn listener(&self) -> &Arc<dyn Listener> {
        &self.listener
    }

    pub fn store(&self) -> &Arc<AircraftStore> {
        &self.store
    }

    /// Apply an edited entry for the same source in place.
    pub fn apply_configuration(&self, config: &ReceiverConfig) {
        self.listener.apply_configuration(config);
        *self.config.write() = config.clone();
    }

    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some((listener_sub, store_sub)) = self.subscriptions.lock().take() {
            self.listener.events().unsubscribe(listener_sub);
            self.store.events().unsubscribe(store_sub);
        }
        self.store.stop();
        self.listener.disconnect();
        info!(feed_id = self.unique_id, "receiver feed disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Merged feed
// ---------------------------------------------------------------------------

pub struct MergedFeed {
    unique_id: i32,
    config: RwLock<MergedFeedConfig>,
    listener: Arc<MergedFeedListener>,
    store: Arc<AircraftStore>,
    events: Arc<EventHub<FeedEvent>>,
    subscription: Mutex<Option<SubscriptionId>>,
    disposed: AtomicBool,
}

fn merged_settings(config: &MergedFeedConfig) -> MergedFeedSettings {
    MergedFeedSettings {
        icao_timeout: Duration::milliseconds(config.icao_timeout_ms as i64),
        ignore_aircraft_with_no_position: config.ignore_aircraft_with_no_position,
    }
}

/// Listeners of the configured members that are live receiver feeds, in
/// configuration order.
fn merged_components(config: &MergedFeedConfig, receivers: &[Arc<Feed>]) -> Vec<MergedFeedComponent> {
    config
        .receiver_ids
        .iter()
        .filter_map(|id| {
            receivers.iter().find_map(|feed| match feed.as_ref() {
                Feed::Receiver(r) if r.unique_id() == *id => Some(MergedFeedComponent {
                    listener: r.listener().clone(),
                    is_mlat_feed: config.mlat_receiver_ids.contains(id),
                }),
                _ => None,
            })
        })
        .collect()
}

impl MergedFeed {
    pub fn new(
        config: &MergedFeedConfig,
        receivers: &[Arc<Feed>],
        store: Arc<AircraftStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let listener = MergedFeedListener::new(config.unique_id, &config.name, merged_settings(config), clock);
        listener.set_listeners(merged_components(config, receivers));
        let events = Arc::new(EventHub::new());
        let subscription = forward_store_events(&store, &events);
        store.start(listener.clone());
        MergedFeed {
            unique_id: config.unique_id,
            config: RwLock::new(config.clone()),
            listener,
            store,
            events,
            subscription: Mutex::new(Some(subscription)),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn unique_id(&self) -> i32 {
        self.unique_id
    }

    pub fn config(&self) -> MergedFeedConfig {
        self.config.read().clone()
    }

    pub fn listener(&self) -> &Arc<MergedFeedListener> {
        &self.listener
    }

    pub fn store(&self) -> &Arc<AircraftStore> {
        &self.store
    }

    /// Apply the entry and rebuild the component list against the receiver
    /// feeds that are live now.
    pub fn apply_configuration(&self, config: &MergedFeedConfig, receivers: &[Arc<Feed>]) {
        self.listener.apply_settings(&config.name, merged_settings(config));
        self.listener.set_listeners(merged_components(config, receivers));
        *self.config.write() = config.clone();
    }

    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(subscription) = self.subscription.lock().take() {
            self.store.events().unsubscribe(subscription);
        }
        self.store.stop();
        self.listener.dispose();
        info!(feed_id = self.unique_id, "merged feed disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Feed
// ---------------------------------------------------------------------------

pub enum Feed {
    Receiver(ReceiverFeed),
    Merged(MergedFeed),
    Custom(Arc<dyn CustomFeed>),
}

impl Feed {
    pub fn unique_id(&self) -> i32 {
        match self {
            Feed::Receiver(f) => f.unique_id(),
            Feed::Merged(f) => f.unique_id(),
            Feed::Custom(f) => f.unique_id(),
        }
    }

    pub fn name(&self) -> String {
        match self {
            Feed::Receiver(f) => f.config.read().name.clone(),
            Feed::Merged(f) => f.config.read().name.clone(),
            Feed::Custom(f) => f.name(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Feed::Receiver(_) => "receiver",
            Feed::Merged(_) => "merged",
            Feed::Custom(_) => "custom",
        }
    }

    pub fn is_visible(&self) -> bool {
        match self {
            Feed::Receiver(f) => f.config.read().usage.is_visible(),
            Feed::Merged(f) => f.config.read().usage.is_visible(),
            Feed::Custom(f) => f.is_visible(),
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, Feed::Custom(_))
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        match self {
            Feed::Receiver(f) => f.listener.connection_status(),
            Feed::Merged(f) => f.listener.connection_status(),
            Feed::Custom(f) => f.connection_status(),
        }
    }

    pub fn listener(&self) -> Option<Arc<dyn Listener>> {
        match self {
            Feed::Receiver(f) => Some(f.listener.clone()),
            Feed::Merged(f) => Some(f.listener.clone()),
            Feed::Custom(f) => f.listener(),
        }
    }

    pub fn store(&self) -> Option<Arc<AircraftStore>> {
        match self {
            Feed::Receiver(f) => Some(f.store.clone()),
            Feed::Merged(f) => Some(f.store.clone()),
            Feed::Custom(f) => f.store(),
        }
    }

    pub fn events(&self) -> &EventHub<FeedEvent> {
        match self {
            Feed::Receiver(f) => &f.events,
            Feed::Merged(f) => &f.events,
            Feed::Custom(f) => f.events(),
        }
    }

    pub fn connect(&self) {
        match self {
            Feed::Receiver(f) => f.listener.connect(),
            Feed::Merged(f) => f.listener.connect(),
            Feed::Custom(f) => f.connect(),
        }
    }

    pub fn disconnect(&self) {
        match self {
            Feed::Receiver(f) => f.listener.disconnect(),
            Feed::Merged(f) => f.listener.disconnect(),
            Feed::Custom(f) => f.disconnect(),
        }
    }

    /// Tear the feed down. Custom feeds belong to their caller and are only
    /// disconnected.
    pub fn dispose(&self) {
        match self {
            Feed::Receiver(f) => f.dispose(),
            Feed::Merged(f) => f.dispose(),
            Feed::Custom(f) => f.disconnect(),
        }
    }

    /// How the reconciliation planner sees this feed.
    pub fn live_entry(&self) -> LiveFeed {
        match self {
            Feed::Receiver(f) => LiveFeed::Receiver(f.config()),
            Feed::Merged(f) => LiveFeed::Merged(f.config()),
            Feed::Custom(f) => LiveFeed::Custom(f.unique_id()),
        }
    }
}

impl std::fmt::Debug for Feed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Feed")
            .field("kind", &self.kind())
            .field("unique_id", &self.unique_id())
            .field("name", &self.name())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{BaseStationSettings, ReceiverUsage};
    use crate::store::StoreServices;
    use crate::testing::{message, MockCustomFeed, MockListener};

    fn make_receiver(id: i32) -> (Arc<Feed>, Arc<MockListener>) {
        let listener = Arc::new(MockListener::new(id));
        let services = StoreServices {
            clock: Arc::new(ManualClock::default()),
            ..Default::default()
        };
        let store = Arc::new(AircraftStore::new(id, BaseStationSettings::default(), &services));
        let config = ReceiverConfig {
            unique_id: id,
            name: format!("R{id}"),
            ..Default::default()
        };
        let feed = ReceiverFeed::new(&config, listener.clone(), store);
        (Arc::new(Feed::Receiver(feed)), listener)
    }

    #[test]
    fn test_receiver_feed_routes_messages_to_store() {
        let (feed, listener) = make_receiver(5);
        listener.send(message("4840D6"));
        assert_eq!(feed.store().map(|s| s.count()), Some(1));
        assert_eq!(feed.unique_id(), 5);
        assert_eq!(feed.name(), "R5");
        assert!(feed.is_visible());
        assert_eq!(listener.connect_calls(), 0);
    }

    #[test]
    fn test_receiver_feed_forwards_connection_events() {
        let (feed, listener) = make_receiver(5);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        feed.events().subscribe(move |event| {
            if let FeedEvent::ConnectionStateChanged(status) = event {
                s.lock().push(*status);
            }
        });
        listener.set_status(ConnectionStatus::Connected);
        assert_eq!(*seen.lock(), vec![ConnectionStatus::Connected]);
        assert_eq!(feed.connection_status(), ConnectionStatus::Connected);
    }

    #[test]
    fn test_dispose_is_idempotent_and_unhooks() {
        let (feed, listener) = make_receiver(5);
        feed.dispose();
        feed.dispose();
        assert_eq!(listener.disconnect_calls(), 1);
        assert_eq!(listener.events().subscriber_count(), 0);
        listener.send(message("4840D6"));
        assert_eq!(feed.store().map(|s| s.count()), Some(0));
    }

    #[test]
    fn test_hidden_usage() {
        let (feed, _) = make_receiver(5);
        if let Feed::Receiver(r) = feed.as_ref() {
            r.apply_configuration(&ReceiverConfig {
                unique_id: 5,
                name: "Hidden".into(),
                usage: ReceiverUsage::HideFromWebSite,
                ..Default::default()
            });
        }
        assert!(!feed.is_visible());
        assert_eq!(feed.name(), "Hidden");
    }

    #[test]
    fn test_merged_feed_aggregates_members() {
        let (r1, l1) = make_receiver(1);
        let (r2, l2) = make_receiver(2);
        let (_r3, l3) = make_receiver(3);
        let config = MergedFeedConfig {
            unique_id: 10,
            name: "All".into(),
            receiver_ids: vec![2, 1, 99],
            ..Default::default()
        };
        let services = StoreServices {
            clock: Arc::new(ManualClock::default()),
            ..Default::default()
        };
        let store = Arc::new(AircraftStore::new(10, BaseStationSettings::default(), &services));
        let merged = MergedFeed::new(&config, &[r1.clone(), r2.clone()], store, services.clock.clone());
        assert_eq!(merged.listener().component_ids(), vec![2, 1]);

        l1.send(message("000001"));
        l2.send(message("000002"));
        l3.send(message("000003"));
        assert_eq!(merged.store().count(), 2);

        merged.apply_configuration(&config, &[r2]);
        assert_eq!(merged.listener().component_ids(), vec![2]);

        let feed = Feed::Merged(merged);
        feed.dispose();
        assert_eq!(l2.events().subscriber_count(), 2);
    }

    #[test]
    fn test_custom_feed_surface() {
        let custom = Arc::new(MockCustomFeed::new("Custom"));
        custom.set_unique_id(1_000_001);
        let feed = Feed::Custom(custom.clone());
        assert_eq!(feed.unique_id(), 1_000_001);
        assert!(feed.store().is_none());
        feed.dispose();
        assert_eq!(custom.disconnect_calls(), 1);
        assert_eq!(feed.live_entry(), LiveFeed::Custom(1_000_001));
    }
}
