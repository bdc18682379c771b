//! Shared fakes for unit tests.

use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::aircraft::AircraftDetail;
use crate::config::ReceiverConfig;
use crate::detail::DetailFetcher;
use crate::events::EventHub;
use crate::feed::{CustomFeed, FeedEvent};
use crate::listener::{Listener, ListenerFactory};
use crate::message::{BaseStationMessage, FeedMessage, ListenerEvent};
use crate::store::AircraftStore;
use crate::types::{ConnectionStatus, FeedError, Result};

pub fn message(icao: &str) -> BaseStationMessage {
    BaseStationMessage::transmission(icao)
}

pub fn positioned(icao: &str, lat: f64, lon: f64) -> BaseStationMessage {
    BaseStationMessage {
        latitude: Some(lat),
        longitude: Some(lon),
        ..BaseStationMessage::transmission(icao)
    }
}

// ---------------------------------------------------------------------------
// Listener
// ---------------------------------------------------------------------------

pub struct MockListener {
    receiver_id: i32,
    config: Mutex<ReceiverConfig>,
    status: Mutex<ConnectionStatus>,
    events: EventHub<ListenerEvent>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    applied: AtomicUsize,
}

impl MockListener {
    pub fn new(receiver_id: i32) -> Self {
        Self::from_config(&ReceiverConfig {
            unique_id: receiver_id,
            name: format!("Receiver {receiver_id}"),
            ..Default::default()
        })
    }

    pub fn from_config(config: &ReceiverConfig) -> Self {
        MockListener {
            receiver_id: config.unique_id,
            config: Mutex::new(config.clone()),
            status: Mutex::new(ConnectionStatus::Disconnected),
            events: EventHub::new(),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            applied: AtomicUsize::new(0),
        }
    }

    /// Publish a message as if it had been received by this listener.
    pub fn send(&self, mut msg: BaseStationMessage) {
        msg.receiver_id = self.receiver_id;
        let mut feed_message = FeedMessage::new(msg);
        feed_message.is_satcom_feed = self.config.lock().is_satcom_feed;
        self.events.publish(&ListenerEvent::Message(feed_message));
    }

    pub fn set_status(&self, status: ConnectionStatus) {
        *self.status.lock() = status;
        self.events.publish(&ListenerEvent::ConnectionStateChanged(status));
    }

    pub fn raise(&self, error: FeedError) {
        self.events.publish(&ListenerEvent::ExceptionCaught(Arc::new(error)));
    }

    pub fn connect_calls(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn apply_calls(&self) -> usize {
        self.applied.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> ReceiverConfig {
        self.config.lock().clone()
    }
}

impl Listener for MockListener {
    fn receiver_id(&self) -> i32 {
        self.receiver_id
    }

    fn name(&self) -> String {
        self.config.lock().name.clone()
    }

    fn is_satcom_feed(&self) -> bool {
        self.config.lock().is_satcom_feed
    }

    fn connection_status(&self) -> ConnectionStatus {
        *self.status.lock()
    }

    fn connect(&self) {
        self.connects.fetch_add(1, Ordering::SeqCst);
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn apply_configuration(&self, receiver: &ReceiverConfig) {
        self.applied.fetch_add(1, Ordering::SeqCst);
        *self.config.lock() = receiver.clone();
    }

    fn events(&self) -> &EventHub<ListenerEvent> {
        &self.events
    }
}

/// Builds [`MockListener`]s and remembers every one it built.
#[derive(Default)]
pub struct MockListenerFactory {
    created: Mutex<Vec<Arc<MockListener>>>,
    fail_ids: Mutex<Vec<i32>>,
}

impl MockListenerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, receiver_id: i32) {
        self.fail_ids.lock().push(receiver_id);
    }

    /// The most recent listener built for the receiver.
    pub fn listener(&self, receiver_id: i32) -> Option<Arc<MockListener>> {
        self.created
            .lock()
            .iter()
            .rev()
            .find(|l| l.receiver_id == receiver_id)
            .cloned()
    }

    pub fn created_count(&self, receiver_id: i32) -> usize {
        self.created
            .lock()
            .iter()
            .filter(|l| l.receiver_id == receiver_id)
            .count()
    }
}

impl ListenerFactory for MockListenerFactory {
    fn create_listener(&self, receiver: &ReceiverConfig) -> Result<Arc<dyn Listener>> {
        if self.fail_ids.lock().contains(&receiver.unique_id) {
            return Err(FeedError::Collaborator(format!(
                "cannot build listener for {}",
                receiver.unique_id
            )));
        }
        let listener = Arc::new(MockListener::from_config(receiver));
        self.created.lock().push(listener.clone());
        Ok(listener)
    }
}

// ---------------------------------------------------------------------------
// Custom feed
// ---------------------------------------------------------------------------

pub struct MockCustomFeed {
    unique_id: AtomicI32,
    name: String,
    visible: bool,
    events: EventHub<FeedEvent>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

impl MockCustomFeed {
    pub fn new(name: &str) -> Self {
        MockCustomFeed {
            unique_id: AtomicI32::new(0),
            name: name.to_string(),
            visible: true,
            events: EventHub::new(),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        }
    }

    pub fn with_id(name: &str, unique_id: i32) -> Self {
        let feed = Self::new(name);
        feed.unique_id.store(unique_id, Ordering::SeqCst);
        feed
    }

    pub fn raise(&self, error: FeedError) {
        self.events.publish(&FeedEvent::ExceptionCaught(Arc::new(error)));
    }

    pub fn connect_calls(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

impl CustomFeed for MockCustomFeed {
    fn unique_id(&self) -> i32 {
        self.unique_id.load(Ordering::SeqCst)
    }

    fn set_unique_id(&self, id: i32) {
        self.unique_id.store(id, Ordering::SeqCst);
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn is_visible(&self) -> bool {
        self.visible
    }

    fn connection_status(&self) -> ConnectionStatus {
        ConnectionStatus::Connected
    }

    fn listener(&self) -> Option<Arc<dyn Listener>> {
        None
    }

    fn store(&self) -> Option<Arc<AircraftStore>> {
        None
    }

    fn connect(&self) {
        self.connects.fetch_add(1, Ordering::SeqCst);
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn events(&self) -> &EventHub<FeedEvent> {
        &self.events
    }
}

// ---------------------------------------------------------------------------
// Detail fetcher
// ---------------------------------------------------------------------------

pub struct MockDetailFetcher {
    detail: Option<AircraftDetail>,
    fail: bool,
    registered: Mutex<Vec<String>>,
}

impl MockDetailFetcher {
    pub fn with_detail(icao24: &str, registration: &str) -> Self {
        MockDetailFetcher {
            detail: Some(AircraftDetail {
                icao24: icao24.to_string(),
                registration: Some(registration.to_string()),
                ..Default::default()
            }),
            fail: false,
            registered: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        MockDetailFetcher {
            detail: None,
            fail: true,
            registered: Mutex::new(Vec::new()),
        }
    }

    pub fn registered(&self) -> Vec<String> {
        self.registered.lock().clone()
    }
}

impl DetailFetcher for MockDetailFetcher {
    fn register_aircraft(&self, icao24: &str) -> Result<Option<AircraftDetail>> {
        self.registered.lock().push(icao24.to_string());
        if self.fail {
            return Err(FeedError::Collaborator("detail lookup failed".into()));
        }
        Ok(self.detail.clone().filter(|d| d.icao24 == icao24))
    }
}
