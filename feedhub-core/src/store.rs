//! Aircraft state store: one per feed.
//!
//! Folds inbound messages into long-lived aircraft records and hands out
//! point-in-time snapshots.
//!
//! The address→record map is copy-on-write: inserting or removing an address
//! publishes a new map, so a reader that loaded the map keeps iterating a
//! complete one while writers move on. Field updates lock only the record
//! being updated. Every update takes one stamp from the store-wide version
//! counter and writes it on each field it changes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::aircraft::{
    geometric_to_pressure_altitude, pressure_to_geometric_altitude, Aircraft, AircraftDetail,
    AltitudeType, TransponderType,
};
use crate::clock::{Clock, SystemClock};
use crate::config::BaseStationSettings;
use crate::detail::DetailFetcher;
use crate::events::{EventHub, SubscriptionId};
use crate::listener::Listener;
use crate::message::{FeedMessage, ListenerEvent, MessageType};
use crate::sanity::{Certainty, DefaultSanityChecker, SanityChecker};
use crate::track::{CurrentTrack, TrackCalculator};
use crate::types::{icao_to_string, is_emergency_squawk, parse_icao24, FeedError};

/// Wait this long before asking again when no air pressure was found.
pub const SECONDS_BEFORE_RETRY_AIR_PRESSURE_LOOKUP: i64 = 5;

/// Refresh a known air pressure this often.
pub const SECONDS_BEFORE_REFRESH_AIR_PRESSURE_LOOKUP: i64 = 120;

type AircraftMap = HashMap<u32, Arc<Mutex<Aircraft>>>;

/// Source of air pressure readings for altitude conversion.
pub trait AirPressureLookup: Send + Sync {
    /// Pressure in inches of mercury at the closest known station.
    fn find_closest(&self, lat: f64, lon: f64) -> Option<f32>;
}

/// Collaborators shared by every store a feed manager builds.
#[derive(Clone)]
pub struct StoreServices {
    pub clock: Arc<dyn Clock>,
    pub detail_fetcher: Option<Arc<dyn DetailFetcher>>,
    pub air_pressure: Option<Arc<dyn AirPressureLookup>>,
}

impl Default for StoreServices {
    fn default() -> Self {
        StoreServices {
            clock: Arc::new(SystemClock),
            detail_fetcher: None,
            air_pressure: None,
        }
    }
}

/// Events raised by a store.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    ExceptionCaught(Arc<FeedError>),
    CountChanged(usize),
}

/// What happened to one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Not a transmission, or not a valid address.
    Ignored,
    /// Dropped by the sanity checker.
    Rejected,
    Applied { is_new: bool },
}

/// Point-in-time copy of the aircraft list.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub aircraft: Vec<Aircraft>,
    pub timestamp: DateTime<Utc>,
    /// Highest record version in the snapshot, -1 when empty.
    pub max_version: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounters {
    pub messages: u64,
    pub altitude_rejected: u64,
    pub position_rejected: u64,
    pub out_of_band_positions_discarded: u64,
}

#[derive(Default)]
struct Counters {
    messages: AtomicU64,
    altitude_rejected: AtomicU64,
    position_rejected: AtomicU64,
    out_of_band_discarded: AtomicU64,
}

struct Hook {
    listener: Arc<dyn Listener>,
    subscription: SubscriptionId,
}

pub struct AircraftStore {
    feed_id: i32,
    clock: Arc<dyn Clock>,
    settings: RwLock<BaseStationSettings>,
    data_version: AtomicI64,
    aircraft: ArcSwap<AircraftMap>,
    map_lock: Mutex<()>,
    tracks: Mutex<TrackCalculator>,
    sanity: Box<dyn SanityChecker>,
    detail_fetcher: Option<Arc<dyn DetailFetcher>>,
    air_pressure: Option<Arc<dyn AirPressureLookup>>,
    hook: Mutex<Option<Hook>>,
    events: EventHub<StoreEvent>,
    counters: Counters,
    last_sweep: Mutex<Option<DateTime<Utc>>>,
}

impl AircraftStore {
    pub fn new(feed_id: i32, settings: BaseStationSettings, services: &StoreServices) -> Self {
        Self::with_sanity_checker(
            feed_id,
            settings,
            services,
            Box::new(DefaultSanityChecker::new()),
        )
    }

    pub fn with_sanity_checker(
        feed_id: i32,
        settings: BaseStationSettings,
        services: &StoreServices,
        sanity: Box<dyn SanityChecker>,
    ) -> Self {
        AircraftStore {
            feed_id,
            clock: services.clock.clone(),
            settings: RwLock::new(settings),
            data_version: AtomicI64::new(0),
            aircraft: ArcSwap::from_pointee(HashMap::new()),
            map_lock: Mutex::new(()),
            tracks: Mutex::new(TrackCalculator::new()),
            sanity,
            detail_fetcher: services.detail_fetcher.clone(),
            air_pressure: services.air_pressure.clone(),
            hook: Mutex::new(None),
            events: EventHub::new(),
            counters: Counters::default(),
            last_sweep: Mutex::new(None),
        }
    }

    pub fn feed_id(&self) -> i32 {
        self.feed_id
    }

    pub fn events(&self) -> &EventHub<StoreEvent> {
        &self.events
    }

    pub fn count(&self) -> usize {
        self.aircraft.load().len()
    }

    /// Last version handed out.
    pub fn data_version(&self) -> i64 {
        self.data_version.load(Ordering::SeqCst)
    }

    pub fn settings(&self) -> BaseStationSettings {
        self.settings.read().clone()
    }

    pub fn apply_settings(&self, settings: &BaseStationSettings) {
        *self.settings.write() = settings.clone();
    }

    pub fn counters(&self) -> StoreCounters {
        StoreCounters {
            messages: self.counters.messages.load(Ordering::Relaxed),
            altitude_rejected: self.counters.altitude_rejected.load(Ordering::Relaxed),
            position_rejected: self.counters.position_rejected.load(Ordering::Relaxed),
            out_of_band_positions_discarded: self.counters.out_of_band_discarded.load(Ordering::Relaxed),
        }
    }

    fn next_version(&self) -> i64 {
        self.data_version.fetch_add(1, Ordering::SeqCst) + 1
    }

    // -----------------------------------------------------------------------
    // Listener hook
    // -----------------------------------------------------------------------

    /// Start tracking messages from the listener.
    ///
    /// The version counter is lifted to at least the current time in
    /// milliseconds so that versions never go backwards for a client that
    /// kept one from before a restart.
    pub fn start(self: &Arc<Self>, listener: Arc<dyn Listener>) {
        let mut hook = self.hook.lock();
        if let Some(old) = hook.take() {
            old.listener.events().unsubscribe(old.subscription);
        }

        let floor = self.clock.now().timestamp_millis();
        let _ = self
            .data_version
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| Some(floor.max(v + 1)));

        let store = Arc::downgrade(self);
        let subscription = listener.events().subscribe(move |event| {
            if let Some(store) = store.upgrade() {
                store.handle_listener_event(event);
            }
        });
        info!(feed_id = self.feed_id, listener = %listener.name(), "aircraft store started");
        *hook = Some(Hook {
            listener,
            subscription,
        });
    }

    /// Stop tracking and discard every aircraft.
    pub fn stop(&self) {
        let hook = self.hook.lock().take();
        if let Some(hook) = hook {
            hook.listener.events().unsubscribe(hook.subscription);
            info!(feed_id = self.feed_id, "aircraft store stopped");
        }
        self.reset();
    }

    pub fn is_tracking(&self) -> bool {
        self.hook.lock().is_some()
    }

    fn handle_listener_event(&self, event: &ListenerEvent) {
        match event {
            ListenerEvent::Message(msg) => {
                self.ingest(msg);
            }
            ListenerEvent::PositionReset(icao) => self.position_reset(*icao),
            ListenerEvent::SourceChanged => self.reset(),
            ListenerEvent::ConnectionStateChanged(_) | ListenerEvent::ExceptionCaught(_) => {}
        }
    }

    // -----------------------------------------------------------------------
    // Ingestion
    // -----------------------------------------------------------------------

    /// Fold one message into the store.
    pub fn ingest(&self, feed_message: &FeedMessage) -> IngestOutcome {
        let msg = &feed_message.message;
        if msg.message_type != MessageType::Transmission {
            return IngestOutcome::Ignored;
        }
        let Some(icao) = parse_icao24(&msg.icao24) else {
            return IngestOutcome::Ignored;
        };
        let now = self.clock.now();
        self.counters.messages.fetch_add(1, Ordering::Relaxed);

        if let Some(altitude) = msg.altitude {
            if !msg.on_ground.unwrap_or(false)
                && self.sanity.check_altitude(icao, now, altitude) == Certainty::CertainlyWrong
            {
                self.counters.altitude_rejected.fetch_add(1, Ordering::Relaxed);
                debug!(feed_id = self.feed_id, icao = %icao_to_string(icao), altitude, "altitude rejected");
                return IngestOutcome::Rejected;
            }
        }
        if let Some((lat, lon)) = msg.position() {
            if self.sanity.check_position(icao, now, lat, lon) == Certainty::CertainlyWrong {
                self.counters.position_rejected.fetch_add(1, Ordering::Relaxed);
                debug!(feed_id = self.feed_id, icao = %icao_to_string(icao), lat, lon, "position rejected");
                return IngestOutcome::Rejected;
            }
        }

        if let Some(record) = self.aircraft.load().get(&icao).cloned() {
            self.apply_to_existing(&record, icao, feed_message, now);
            return IngestOutcome::Applied { is_new: false };
        }

        let detail = self.register_with_fetcher(icao);

        let guard = self.map_lock.lock();
        let current = self.aircraft.load_full();
        if let Some(record) = current.get(&icao).cloned() {
            drop(guard);
            self.apply_to_existing(&record, icao, feed_message, now);
            return IngestOutcome::Applied { is_new: false };
        }

        let mut aircraft = Aircraft::new(icao, now);
        self.apply_message(&mut aircraft, icao, feed_message, now, true, false, detail.as_ref());
        let mut next = AircraftMap::clone(&current);
        next.insert(icao, Arc::new(Mutex::new(aircraft)));
        let count = next.len();
        self.aircraft.store(Arc::new(next));
        drop(guard);

        debug!(feed_id = self.feed_id, icao = %icao_to_string(icao), "new aircraft");
        self.events.publish(&StoreEvent::CountChanged(count));
        IngestOutcome::Applied { is_new: true }
    }

    fn apply_to_existing(
        &self,
        record: &Mutex<Aircraft>,
        icao: u32,
        feed_message: &FeedMessage,
        now: DateTime<Utc>,
    ) {
        let mut aircraft = record.lock();
        // Out-of-band positions never replace one anchored by the aircraft's
        // own receiver.
        let suppress_position = feed_message.is_out_of_band
            && aircraft.position().is_some()
            && !aircraft.position_is_mlat.value
            && aircraft.receiver_id.value == aircraft.position_receiver_id.value;
        if suppress_position {
            self.counters.out_of_band_discarded.fetch_add(1, Ordering::Relaxed);
        }
        self.apply_message(&mut aircraft, icao, feed_message, now, false, suppress_position, None);
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_message(
        &self,
        aircraft: &mut Aircraft,
        icao: u32,
        feed_message: &FeedMessage,
        now: DateTime<Utc>,
        is_new: bool,
        suppress_position: bool,
        detail: Option<&AircraftDetail>,
    ) {
        let msg = &feed_message.message;
        let version = self.next_version();
        let mut changed = false;
        if is_new {
            aircraft.stamp_new(version);
        }

        aircraft.last_update = now;
        if feed_message.is_satcom_feed {
            aircraft.last_satcom_update = Some(now);
        } else {
            aircraft.last_mode_s_update = Some(now);
        }

        if let Some(pressure) = msg.supplementary.as_ref().and_then(|s| s.pressure_setting_inhg) {
            changed |= aircraft.air_pressure_inhg.set(Some(pressure), version);
            aircraft.air_pressure_looked_up_at = Some(now);
        }

        if !suppress_position {
            let current = CurrentTrack {
                track: aircraft.track.value,
                is_transmitting_track: aircraft.is_transmitting_track.value,
            };
            let track = self.tracks.lock().calculate(icao, msg, current, now);
            if msg.track.is_some_and(|t| t != 0.0) {
                changed |= aircraft.is_transmitting_track.set(true, version);
            }
            if track.is_some() {
                changed |= aircraft.track.set(track, version);
            }

            if let Some((lat, lon)) = msg.position() {
                changed |= aircraft.latitude.set(Some(lat), version);
                changed |= aircraft.longitude.set(Some(lon), version);
                changed |= aircraft.position_receiver_id.set(msg.receiver_id, version);
                changed |= aircraft
                    .position_is_mlat
                    .set(msg.is_mlat || feed_message.is_out_of_band, version);
                aircraft.position_time = Some(now);
                let short_trail = self.settings.read().short_trail_length_seconds;
                aircraft.update_coordinates(now, short_trail, version);
                changed |= self.refresh_air_pressure(aircraft, now, version);
            }
        }

        if is_new || !feed_message.is_out_of_band {
            changed |= aircraft.receiver_id.set(msg.receiver_id, version);
            let count = aircraft.count_messages_received.value + 1;
            changed |= aircraft.count_messages_received.set(count, version);

            if let Some(callsign) = msg.callsign.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
                changed |= aircraft.callsign.set(Some(callsign.to_string()), version);
            }
            if msg.ground_speed.is_some() {
                changed |= aircraft.ground_speed.set(msg.ground_speed, version);
            }
            if msg.vertical_rate.is_some() {
                changed |= aircraft.vertical_rate.set(msg.vertical_rate, version);
            }
            if msg.on_ground.is_some() {
                changed |= aircraft.on_ground.set(msg.on_ground, version);
            }
            if let Some(squawk) = msg.squawk {
                changed |= aircraft.squawk.set(Some(squawk), version);
                changed |= aircraft.emergency.set(is_emergency_squawk(squawk), version);
            }

            let transponder = match aircraft.transponder_type.value {
                TransponderType::Adsb => TransponderType::Adsb,
                _ if msg.has_adsb_fields() => TransponderType::Adsb,
                _ => TransponderType::ModeS,
            };
            changed |= aircraft.transponder_type.set(transponder, version);

            if let Some(altitude) = msg.altitude {
                changed |= self.apply_altitude(aircraft, msg.supplementary.as_ref(), altitude, version);
            }
        }

        if let Some(detail) = detail {
            changed |= aircraft.apply_detail(detail, version);
        }

        if changed {
            aircraft.data_version = aircraft.data_version.max(version);
        }
    }

    fn apply_altitude(
        &self,
        aircraft: &mut Aircraft,
        supplementary: Option<&crate::message::Supplementary>,
        altitude: i32,
        version: i64,
    ) -> bool {
        let geometric = supplementary
            .and_then(|s| s.altitude_is_geometric)
            .unwrap_or(false);
        let pressure = aircraft.air_pressure_inhg.value;
        let (barometric, geometric_altitude, kind) = if geometric {
            let baro = pressure.map_or(altitude, |p| geometric_to_pressure_altitude(altitude, p));
            (baro, altitude, AltitudeType::Geometric)
        } else {
            let geo = pressure.map_or(altitude, |p| pressure_to_geometric_altitude(altitude, p));
            (altitude, geo, AltitudeType::Barometric)
        };
        let mut changed = aircraft.altitude_type.set(kind, version);
        changed |= aircraft.altitude.set(Some(barometric), version);
        changed |= aircraft.geometric_altitude.set(Some(geometric_altitude), version);
        changed
    }

    fn refresh_air_pressure(&self, aircraft: &mut Aircraft, now: DateTime<Utc>, version: i64) -> bool {
        let Some(lookup) = &self.air_pressure else {
            return false;
        };
        let Some((lat, lon)) = aircraft.position() else {
            return false;
        };
        let due = match aircraft.air_pressure_looked_up_at {
            None => true,
            Some(at) => {
                let wait = if aircraft.air_pressure_inhg.value.is_some() {
                    SECONDS_BEFORE_REFRESH_AIR_PRESSURE_LOOKUP
                } else {
                    SECONDS_BEFORE_RETRY_AIR_PRESSURE_LOOKUP
                };
                at + Duration::seconds(wait) <= now
            }
        };
        if !due {
            return false;
        }
        aircraft.air_pressure_looked_up_at = Some(now);
        match lookup.find_closest(lat, lon) {
            Some(pressure) => aircraft.air_pressure_inhg.set(Some(pressure), version),
            None => false,
        }
    }

    fn register_with_fetcher(&self, icao: u32) -> Option<AircraftDetail> {
        let fetcher = self.detail_fetcher.as_ref()?;
        match fetcher.register_aircraft(&icao_to_string(icao)) {
            Ok(detail) => detail,
            Err(e) => {
                warn!(feed_id = self.feed_id, icao = %icao_to_string(icao), error = %e, "detail fetcher failed");
                self.events.publish(&StoreEvent::ExceptionCaught(Arc::new(e)));
                None
            }
        }
    }

    /// Apply identity detail that arrived after the aircraft was created.
    /// Returns false when the aircraft is unknown or nothing changed.
    pub fn apply_detail(&self, detail: &AircraftDetail) -> bool {
        let Some(icao) = parse_icao24(&detail.icao24) else {
            return false;
        };
        let Some(record) = self.aircraft.load().get(&icao).cloned() else {
            return false;
        };
        let mut aircraft = record.lock();
        let version = self.next_version();
        aircraft.apply_detail(detail, version)
    }

    /// Forget the trail and sanity history of one aircraft.
    pub fn position_reset(&self, icao: u32) {
        self.sanity.reset_aircraft(icao);
        self.tracks.lock().remove(icao);
        if let Some(record) = self.aircraft.load().get(&icao).cloned() {
            let mut aircraft = record.lock();
            let version = self.next_version();
            aircraft.reset_coordinates(version);
        }
    }

    // -----------------------------------------------------------------------
    // Reading
    // -----------------------------------------------------------------------

    /// Copy of one aircraft.
    pub fn find(&self, icao: u32) -> Option<Aircraft> {
        let record = self.aircraft.load().get(&icao).cloned()?;
        let aircraft = record.lock().clone();
        Some(aircraft)
    }

    /// Copy of every aircraft heard inside the display timeouts.
    pub fn snapshot(&self) -> Snapshot {
        let now = self.clock.now();
        self.remove_old_aircraft(now);

        let settings = self.settings();
        let mode_s_threshold = now - Duration::seconds(settings.display_timeout_seconds);
        let satcom_threshold = now - Duration::minutes(settings.satcom_display_timeout_minutes);

        let map = self.aircraft.load();
        let mut max_version = -1;
        let mut aircraft = Vec::with_capacity(map.len());
        for record in map.values() {
            let record = record.lock();
            if record.is_expired(mode_s_threshold, satcom_threshold) {
                continue;
            }
            max_version = max_version.max(record.data_version);
            aircraft.push(record.clone());
        }
        aircraft.sort_by_key(|a| a.unique_id);

        Snapshot {
            aircraft,
            timestamp: now,
            max_version,
        }
    }

    // -----------------------------------------------------------------------
    // Removal
    // -----------------------------------------------------------------------

    /// Periodic housekeeping. Sweeps at most once per tracking timeout.
    pub fn slow_tick(&self) {
        let now = self.clock.now();
        let interval = Duration::seconds(self.settings().tracking_timeout_seconds);
        {
            let mut last_sweep = self.last_sweep.lock();
            if last_sweep.is_some_and(|at| now < at + interval) {
                return;
            }
            *last_sweep = Some(now);
        }
        self.remove_old_aircraft(now);
    }

    /// Remove aircraft not heard inside the tracking timeouts. Returns the
    /// number removed.
    pub fn remove_old_aircraft(&self, now: DateTime<Utc>) -> usize {
        let settings = self.settings();
        let mode_s_threshold = now - Duration::seconds(settings.tracking_timeout_seconds);
        let satcom_threshold = now - Duration::minutes(settings.satcom_tracking_timeout_minutes);
        let expired = |record: &Arc<Mutex<Aircraft>>| {
            record.lock().is_expired(mode_s_threshold, satcom_threshold)
        };

        if !self.aircraft.load().values().any(expired) {
            return 0;
        }

        let guard = self.map_lock.lock();
        let current = self.aircraft.load_full();
        let removed: Vec<u32> = current
            .iter()
            .filter(|(_, record)| expired(record))
            .map(|(icao, _)| *icao)
            .collect();
        let mut next = AircraftMap::clone(&current);
        for icao in &removed {
            next.remove(icao);
        }
        let count = next.len();
        self.aircraft.store(Arc::new(next));
        drop(guard);

        let mut tracks = self.tracks.lock();
        for icao in &removed {
            tracks.remove(*icao);
            self.sanity.reset_aircraft(*icao);
        }
        drop(tracks);

        debug!(feed_id = self.feed_id, removed = removed.len(), "removed old aircraft");
        self.events.publish(&StoreEvent::CountChanged(count));
        removed.len()
    }

    /// Discard every aircraft.
    pub fn reset(&self) {
        let guard = self.map_lock.lock();
        let had_aircraft = !self.aircraft.load().is_empty();
        self.aircraft.store(Arc::new(HashMap::new()));
        drop(guard);
        self.tracks.lock().clear();
        self.sanity.reset();
        if had_aircraft {
            self.events.publish(&StoreEvent::CountChanged(0));
        }
    }
}

impl std::fmt::Debug for AircraftStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AircraftStore")
            .field("feed_id", &self.feed_id)
            .field("count", &self.count())
            .field("data_version", &self.data_version())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
