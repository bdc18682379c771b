//! Identity detail for aircraft, fetched online and cached.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::debug;

use crate::aircraft::AircraftDetail;
use crate::clock::Clock;
use crate::lookup::{LookupBatch, OnlineLookupQueue};
use crate::types::{normalise_icao24, Result};

/// Addresses the provider said it does not know are not asked about again
/// for this long.
pub const MISSING_RETRY_MINUTES: i64 = 60;

/// Fetched detail is dropped from the cache after this long and looked up
/// again the next time a store registers the aircraft.
pub const DETAIL_CACHE_HOURS: i64 = 12;

/// Called by a store when it first sees an aircraft.
pub trait DetailFetcher: Send + Sync {
    /// Detail already known for the address, if any. Unknown addresses are
    /// looked up in the background and delivered later.
    fn register_aircraft(&self, icao24: &str) -> Result<Option<AircraftDetail>>;
}

struct CachedDetail {
    detail: AircraftDetail,
    fetched_at: DateTime<Utc>,
}

/// Detail fetcher backed by the online lookup queue.
pub struct OnlineDetailFetcher {
    queue: Arc<OnlineLookupQueue>,
    clock: Arc<dyn Clock>,
    cache: DashMap<String, CachedDetail>,
    missing: DashMap<String, DateTime<Utc>>,
}

impl OnlineDetailFetcher {
    pub fn new(queue: Arc<OnlineLookupQueue>, clock: Arc<dyn Clock>) -> Self {
        OnlineDetailFetcher {
            queue,
            clock,
            cache: DashMap::new(),
            missing: DashMap::new(),
        }
    }

    /// Remember the outcome of a lookup batch. Returns the details that
    /// should be pushed into the stores.
    pub fn record_results(&self, batch: &LookupBatch) -> Vec<AircraftDetail> {
        let now = self.clock.now();
        for icao in &batch.missing {
            if let Some(icao) = normalise_icao24(icao) {
                self.missing.insert(icao, now);
            }
        }
        let mut delivered = Vec::with_capacity(batch.found.len());
        for detail in &batch.found {
            let Some(icao) = normalise_icao24(&detail.icao24) else {
                continue;
            };
            let detail = AircraftDetail {
                icao24: icao.clone(),
                ..detail.clone()
            };
            self.missing.remove(&icao);
            self.cache.insert(
                icao,
                CachedDetail {
                    detail: detail.clone(),
                    fetched_at: now,
                },
            );
            delivered.push(detail);
        }
        debug!(found = delivered.len(), missing = batch.missing.len(), "recorded lookup results");
        delivered
    }

    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    pub fn missing_count(&self) -> usize {
        self.missing.len()
    }

    /// Forget cached detail older than [`DETAIL_CACHE_HOURS`] and missing
    /// marks older than [`MISSING_RETRY_MINUTES`]. Returns how many entries
    /// were dropped.
    pub fn slow_tick(&self) -> usize {
        let now = self.clock.now();
        let before = self.cache.len() + self.missing.len();
        let detail_threshold = now - Duration::hours(DETAIL_CACHE_HOURS);
        let missing_threshold = now - Duration::minutes(MISSING_RETRY_MINUTES);
        self.cache.retain(|_, cached| cached.fetched_at > detail_threshold);
        self.missing.retain(|_, at| *at > missing_threshold);
        let dropped = before.saturating_sub(self.cache.len() + self.missing.len());
        if dropped > 0 {
            debug!(dropped, "expired lookup cache entries");
        }
        dropped
    }
}

impl DetailFetcher for OnlineDetailFetcher {
    fn register_aircraft(&self, icao24: &str) -> Result<Option<AircraftDetail>> {
        let Some(icao) = normalise_icao24(icao24) else {
            return Ok(None);
        };
        if let Some(detail) = self.cache.get(&icao) {
            return Ok(Some(detail.value().detail.clone()));
        }
        let recently_missing = self
            .missing
            .get(&icao)
            .is_some_and(|at| *at.value() + Duration::minutes(MISSING_RETRY_MINUTES) > self.clock.now());
        if !recently_missing {
            self.queue.enqueue(&icao);
        }
        Ok(None)
    }
}
