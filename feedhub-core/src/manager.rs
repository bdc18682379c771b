//! Feed manager: owns every feed and keeps the set in step with configuration.
//!
//! The feed list is copy-on-write. Operations that change the topology run
//! one at a time under the manager's state lock, build a new list, publish it
//! and then raise a single [`FeedManagerEvent::FeedsChanged`]. Readers load
//! the current list without taking any lock.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::aircraft::AircraftDetail;
use crate::config::{Configuration, ReceiverConfig};
use crate::events::{EventHub, SubscriptionId};
use crate::feed::{CustomFeed, Feed, FeedEvent, MergedFeed, ReceiverFeed};
use crate::listener::ListenerFactory;
use crate::reconcile::{plan_reconciliation, LiveFeed, ReconcilePlan};
use crate::store::{AircraftStore, StoreServices};
use crate::types::{ConnectionStatus, FeedError, Result};

/// First id handed to a custom feed that arrives without one.
pub const FIRST_CUSTOM_FEED_ID: i32 = 1_000_001;

/// Last id available to custom feeds.
pub const LAST_CUSTOM_FEED_ID: i32 = 1_999_999;

#[derive(Debug, Clone)]
pub enum FeedManagerEvent {
    ExceptionCaught { feed_id: i32, error: Arc<FeedError> },
    ConnectionStateChanged { feed_id: i32, status: ConnectionStatus },
    /// The set of feeds changed. Raised once per operation.
    FeedsChanged,
}

#[derive(Default)]
struct ManagerState {
    initialised: bool,
    disposed: bool,
    pending_custom: Vec<Arc<dyn CustomFeed>>,
    attachments: HashMap<i32, SubscriptionId>,
    /// Every id named by the last applied document, enabled or not.
    configured_ids: HashSet<i32>,
}

pub struct FeedManager {
    listener_factory: Arc<dyn ListenerFactory>,
    services: StoreServices,
    state: Mutex<ManagerState>,
    feeds: ArcSwap<Vec<Arc<Feed>>>,
    events: Arc<EventHub<FeedManagerEvent>>,
    next_custom_id: AtomicI32,
}

impl FeedManager {
    pub fn new(listener_factory: Arc<dyn ListenerFactory>, services: StoreServices) -> Self {
        FeedManager {
            listener_factory,
            services,
            state: Mutex::new(ManagerState::default()),
            feeds: ArcSwap::from_pointee(Vec::new()),
            events: Arc::new(EventHub::new()),
            next_custom_id: AtomicI32::new(FIRST_CUSTOM_FEED_ID - 1),
        }
    }

    pub fn events(&self) -> &EventHub<FeedManagerEvent> {
        &self.events
    }

    pub fn is_initialised(&self) -> bool {
        self.state.lock().initialised
    }

    // -----------------------------------------------------------------------
    // Topology
    // -----------------------------------------------------------------------

    /// Build the feeds for the configuration and adopt any custom feeds
    /// added so far. May only be called once.
    pub fn initialise(&self, config: &Configuration) -> Result<()> {
        let mut state = self.state.lock();
        if state.initialised {
            return Err(FeedError::AlreadyInitialised);
        }
        config.validate()?;
        for custom in &state.pending_custom {
            let id = custom.unique_id();
            if config.configured_ids().any(|configured| configured == id) {
                return Err(FeedError::DuplicateUniqueId(id));
            }
        }
        state.initialised = true;
        state.configured_ids = config.configured_ids().collect();

        let plan = plan_reconciliation(&[], config);
        let (mut feeds, failures) = self.execute(&mut state, Vec::new(), &plan, config);
        let pending: Vec<_> = state.pending_custom.drain(..).collect();
        for custom in pending {
            let feed = Arc::new(Feed::Custom(custom));
            self.attach(&mut state, &feed);
            feeds.push(feed);
        }
        let count = feeds.len();
        self.feeds.store(Arc::new(feeds));
        drop(state);

        info!(feeds = count, "feed manager initialised");
        self.raise_failures(failures);
        self.events.publish(&FeedManagerEvent::FeedsChanged);
        Ok(())
    }

    /// Bring the live feeds in line with a new configuration document.
    ///
    /// The document is checked before anything is touched; a rejected
    /// document leaves the topology as it was.
    pub fn reconcile(&self, config: &Configuration) -> Result<()> {
        let mut state = self.state.lock();
        if !state.initialised || state.disposed {
            return Err(FeedError::NotInitialised);
        }
        config.validate()?;
        let current = self.feeds.load_full();
        for feed in current.iter().filter(|f| f.is_custom()) {
            let id = feed.unique_id();
            if config.configured_ids().any(|configured| configured == id) {
                return Err(FeedError::DuplicateUniqueId(id));
            }
        }

        state.configured_ids = config.configured_ids().collect();

        let live: Vec<LiveFeed> = current.iter().map(|f| f.live_entry()).collect();
        let plan = plan_reconciliation(&live, config);
        debug!(
            dispose = plan.dispose.len(),
            create = plan.create_receivers.len() + plan.create_merged.len(),
            update = plan.update_receivers.len() + plan.update_merged.len(),
            "reconciling feeds"
        );
        let (feeds, failures) = self.execute(&mut state, current.as_ref().clone(), &plan, config);
        let count = feeds.len();
        self.feeds.store(Arc::new(feeds));
        drop(state);

        info!(feeds = count, "feeds reconciled");
        self.raise_failures(failures);
        self.events.publish(&FeedManagerEvent::FeedsChanged);
        Ok(())
    }

    /// Carry out a plan against `feeds`: disposals first, then receivers,
    /// then merged feeds against the receivers that are live afterwards.
    fn execute(
        &self,
        state: &mut ManagerState,
        mut feeds: Vec<Arc<Feed>>,
        plan: &ReconcilePlan,
        config: &Configuration,
    ) -> (Vec<Arc<Feed>>, Vec<(i32, FeedError)>) {
        let mut failures = Vec::new();

        for id in &plan.dispose {
            if let Some(pos) = feeds.iter().position(|f| f.unique_id() == *id && !f.is_custom()) {
                let feed = feeds.remove(pos);
                self.detach(state, &feed);
                feed.dispose();
            }
        }

        for receiver in &plan.update_receivers {
            if let Some(Feed::Receiver(feed)) = find(&feeds, receiver.unique_id) {
                feed.apply_configuration(receiver);
                debug!(feed_id = receiver.unique_id, "receiver feed updated");
            }
        }
        for receiver in &plan.create_receivers {
            match self.create_receiver(receiver, config) {
                Ok(feed) => {
                    self.attach(state, &feed);
                    feed.connect();
                    info!(feed_id = receiver.unique_id, name = %receiver.name, "receiver feed created");
                    feeds.push(feed);
                }
                Err(e) => {
                    error!(feed_id = receiver.unique_id, error = %e, "could not create receiver feed");
                    failures.push((receiver.unique_id, e));
                }
            }
        }

        let receivers: Vec<Arc<Feed>> = feeds
            .iter()
            .filter(|f| matches!(f.as_ref(), Feed::Receiver(_)))
            .cloned()
            .collect();
        for merged in &plan.update_merged {
            if let Some(Feed::Merged(feed)) = find(&feeds, merged.unique_id) {
                feed.apply_configuration(merged, &receivers);
            }
        }
        for merged in &plan.create_merged {
            let store = Arc::new(AircraftStore::new(
                merged.unique_id,
                config.base_station.clone(),
                &self.services,
            ));
            let feed = Arc::new(Feed::Merged(MergedFeed::new(
                merged,
                &receivers,
                store,
                self.services.clock.clone(),
            )));
            self.attach(state, &feed);
            info!(feed_id = merged.unique_id, name = %merged.name, "merged feed created");
            feeds.push(feed);
        }

        for feed in &feeds {
            if !feed.is_custom() {
                if let Some(store) = feed.store() {
                    store.apply_settings(&config.base_station);
                }
            }
        }

        feeds.sort_by_key(|f| {
            let rank = match f.as_ref() {
                Feed::Receiver(_) => 0,
                Feed::Merged(_) => 1,
                Feed::Custom(_) => 2,
            };
            (rank, f.unique_id())
        });
        (feeds, failures)
    }

    fn create_receiver(&self, receiver: &ReceiverConfig, config: &Configuration) -> Result<Arc<Feed>> {
        let listener = self.listener_factory.create_listener(receiver)?;
        let store = Arc::new(AircraftStore::new(
            receiver.unique_id,
            config.base_station.clone(),
            &self.services,
        ));
        Ok(Arc::new(Feed::Receiver(ReceiverFeed::new(receiver, listener, store))))
    }

    fn attach(&self, state: &mut ManagerState, feed: &Arc<Feed>) {
        let feed_id = feed.unique_id();
        let events = self.events.clone();
        let subscription = feed.events().subscribe(move |event| match event {
            FeedEvent::ExceptionCaught(error) => {
                warn!(feed_id, error = %error, "feed raised an exception");
                events.publish(&FeedManagerEvent::ExceptionCaught {
                    feed_id,
                    error: error.clone(),
                });
            }
            FeedEvent::ConnectionStateChanged(status) => {
                events.publish(&FeedManagerEvent::ConnectionStateChanged {
                    feed_id,
                    status: *status,
                });
            }
        });
        state.attachments.insert(feed_id, subscription);
    }

    fn detach(&self, state: &mut ManagerState, feed: &Feed) {
        if let Some(subscription) = state.attachments.remove(&feed.unique_id()) {
            feed.events().unsubscribe(subscription);
        }
    }

    fn raise_failures(&self, failures: Vec<(i32, FeedError)>) {
        for (feed_id, error) in failures {
            self.events.publish(&FeedManagerEvent::ExceptionCaught {
                feed_id,
                error: Arc::new(error),
            });
        }
    }

    // -----------------------------------------------------------------------
    // Custom feeds
    // -----------------------------------------------------------------------

    fn allocate_custom_id(&self) -> Result<i32> {
        self.next_custom_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |id| {
                (id < LAST_CUSTOM_FEED_ID).then_some(id + 1)
            })
            .map(|previous| previous + 1)
            .map_err(|_| FeedError::CustomIdsExhausted)
    }

    /// Register an externally supplied feed. A feed without an id is given
    /// one; an id already in use is rejected.
    pub fn add_custom_feed(&self, custom: Arc<dyn CustomFeed>) -> Result<()> {
        let mut state = self.state.lock();
        if state.disposed {
            return Err(FeedError::NotInitialised);
        }
        if custom.unique_id() == 0 {
            custom.set_unique_id(self.allocate_custom_id()?);
        }
        let id = custom.unique_id();

        if !state.initialised {
            if state.pending_custom.iter().any(|f| f.unique_id() == id) {
                return Err(FeedError::DuplicateUniqueId(id));
            }
            debug!(feed_id = id, "custom feed held until initialise");
            state.pending_custom.push(custom);
            return Ok(());
        }

        let current = self.feeds.load_full();
        if state.configured_ids.contains(&id) || current.iter().any(|f| f.unique_id() == id) {
            return Err(FeedError::DuplicateUniqueId(id));
        }
        let feed = Arc::new(Feed::Custom(custom));
        self.attach(&mut state, &feed);
        let mut feeds = current.as_ref().clone();
        feeds.push(feed);
        self.feeds.store(Arc::new(feeds));
        drop(state);

        info!(feed_id = id, "custom feed added");
        self.events.publish(&FeedManagerEvent::FeedsChanged);
        Ok(())
    }

    /// Remove a custom feed. The feed itself is left as it is. Returns false
    /// when it was not registered.
    pub fn remove_custom_feed(&self, custom: &Arc<dyn CustomFeed>) -> bool {
        let id = custom.unique_id();
        let mut state = self.state.lock();
        if !state.initialised {
            let before = state.pending_custom.len();
            state.pending_custom.retain(|f| f.unique_id() != id);
            return state.pending_custom.len() != before;
        }

        let current = self.feeds.load_full();
        let Some(pos) = current
            .iter()
            .position(|f| f.is_custom() && f.unique_id() == id)
        else {
            return false;
        };
        let mut feeds = current.as_ref().clone();
        let feed = feeds.remove(pos);
        self.detach(&mut state, &feed);
        self.feeds.store(Arc::new(feeds));
        drop(state);

        info!(feed_id = id, "custom feed removed");
        self.events.publish(&FeedManagerEvent::FeedsChanged);
        true
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn all_feeds(&self) -> Vec<Arc<Feed>> {
        self.feeds.load().as_ref().clone()
    }

    pub fn visible_feeds(&self) -> Vec<Arc<Feed>> {
        self.feeds.load().iter().filter(|f| f.is_visible()).cloned().collect()
    }

    pub fn get_by_unique_id(&self, id: i32, ignore_invisible: bool) -> Option<Arc<Feed>> {
        self.feeds
            .load()
            .iter()
            .find(|f| f.unique_id() == id && (!ignore_invisible || f.is_visible()))
            .cloned()
    }

    /// Case-insensitive name lookup.
    pub fn get_by_name(&self, name: &str, ignore_invisible: bool) -> Option<Arc<Feed>> {
        let wanted = name.to_lowercase();
        self.feeds
            .load()
            .iter()
            .find(|f| f.name().to_lowercase() == wanted && (!ignore_invisible || f.is_visible()))
            .cloned()
    }

    // -----------------------------------------------------------------------
    // Fan-out
    // -----------------------------------------------------------------------

    pub fn connect(&self) {
        for feed in self.feeds.load().iter() {
            feed.connect();
        }
    }

    pub fn disconnect(&self) {
        for feed in self.feeds.load().iter() {
            feed.disconnect();
        }
    }

    /// Periodic housekeeping for every store and merged listener.
    pub fn slow_tick(&self) {
        let now = self.services.clock.now();
        for feed in self.feeds.load().iter() {
            match feed.as_ref() {
                Feed::Receiver(f) => f.store().slow_tick(),
                Feed::Merged(f) => {
                    f.store().slow_tick();
                    let forgotten = f.listener().cleanup(now);
                    if forgotten > 0 {
                        debug!(feed_id = f.unique_id(), forgotten, "merged feed addresses forgotten");
                    }
                }
                Feed::Custom(_) => {}
            }
        }
    }

    /// Push fetched identity detail into every store that tracks the
    /// aircraft. Returns how many records changed.
    pub fn deliver_details(&self, details: &[AircraftDetail]) -> usize {
        let mut applied = 0;
        for feed in self.feeds.load().iter() {
            if let Some(store) = feed.store() {
                applied += details.iter().filter(|d| store.apply_detail(d)).count();
            }
        }
        applied
    }

    /// Tear every feed down. The manager cannot be used afterwards.
    pub fn dispose(&self) {
        let mut state = self.state.lock();
        if state.disposed {
            return;
        }
        state.disposed = true;
        let feeds = self.feeds.swap(Arc::new(Vec::new()));
        for feed in feeds.iter() {
            self.detach(&mut state, feed);
            feed.dispose();
        }
        state.pending_custom.clear();
        info!(feeds = feeds.len(), "feed manager disposed");
    }
}

fn find(feeds: &[Arc<Feed>], id: i32) -> Option<&Feed> {
    feeds.iter().find(|f| f.unique_id() == id).map(|f| f.as_ref())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
