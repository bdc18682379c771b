//! Rate-limited, de-duplicating queue of online aircraft detail lookups.
//!
//! Addresses are queued from the ingestion path and looked up in batches on a
//! timer. At most one batch is in flight. After a transport failure the wait
//! before the next batch grows by the provider's minimum interval, up to its
//! ceiling; a successful batch resets it. Entries that stay queued for 30
//! minutes are dropped without notice.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::aircraft::AircraftDetail;
use crate::clock::Clock;
use crate::events::EventHub;
use crate::types::{normalise_icao24, FeedError, Result};

/// Queued addresses older than this are discarded.
pub const EXPIRE_QUEUE_ENTRY_MINUTES: i64 = 30;

pub const MIN_BATCH_SIZE: usize = 10;

#[derive(Debug, Error)]
pub enum LookupError {
    /// The provider could not be reached. Triggers backoff.
    #[error("transport failure: {0}")]
    Transport(String),
    /// The provider answered but something else went wrong.
    #[error("provider error: {0}")]
    Provider(String),
}

/// Result of one batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LookupBatch {
    pub found: Vec<AircraftDetail>,
    /// Addresses the provider positively does not know.
    pub missing: Vec<String>,
}

#[async_trait]
pub trait LookupProvider: Send + Sync {
    fn max_batch_size(&self) -> usize;
    fn min_seconds_between_requests(&self) -> i64;
    fn max_seconds_after_failed_request(&self) -> i64;
    async fn lookup_batch(&self, icaos: &[String]) -> std::result::Result<LookupBatch, LookupError>;
}

/// Check the limits a provider advertises.
pub fn check_provider(provider: &dyn LookupProvider) -> Result<()> {
    let max_batch = provider.max_batch_size();
    let min_secs = provider.min_seconds_between_requests();
    let max_secs = provider.max_seconds_after_failed_request();
    if max_batch < MIN_BATCH_SIZE {
        return Err(FeedError::InvalidProvider(format!(
            "max batch size {max_batch} is below {MIN_BATCH_SIZE}"
        )));
    }
    if min_secs < 1 {
        return Err(FeedError::InvalidProvider(format!(
            "minimum seconds between requests {min_secs} is below 1"
        )));
    }
    if max_secs < min_secs {
        return Err(FeedError::InvalidProvider(format!(
            "maximum seconds after failure {max_secs} is below the minimum {min_secs}"
        )));
    }
    Ok(())
}

/// Queue statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub queued: usize,
    pub peak: usize,
    pub expired: u64,
    pub batches: u64,
    pub failures: u64,
}

struct QueueState {
    entries: HashMap<String, DateTime<Utc>>,
    last_lookup: Option<DateTime<Utc>>,
    seconds_to_next_lookup: i64,
    peak: usize,
    expired: u64,
}

pub struct OnlineLookupQueue {
    provider: Arc<dyn LookupProvider>,
    clock: Arc<dyn Clock>,
    enabled: AtomicBool,
    halted: AtomicBool,
    in_flight: AtomicBool,
    state: Mutex<QueueState>,
    fetched: EventHub<LookupBatch>,
    batches: AtomicU64,
    failures: AtomicU64,
}

/// Clears the in-flight flag however the batch ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl OnlineLookupQueue {
    pub fn new(provider: Arc<dyn LookupProvider>, clock: Arc<dyn Clock>, enabled: bool) -> Result<Self> {
        check_provider(provider.as_ref())?;
        let seconds_to_next_lookup = provider.min_seconds_between_requests();
        Ok(OnlineLookupQueue {
            provider,
            clock,
            enabled: AtomicBool::new(enabled),
            halted: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
            state: Mutex::new(QueueState {
                entries: HashMap::new(),
                last_lookup: None,
                seconds_to_next_lookup,
                peak: 0,
                expired: 0,
            }),
            fetched: EventHub::new(),
            batches: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        })
    }

    /// Raised after every successful batch that found or ruled out anything.
    pub fn fetched(&self) -> &EventHub<LookupBatch> {
        &self.fetched
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    pub fn enqueue(&self, icao: &str) {
        self.enqueue_many([icao]);
    }

    pub fn enqueue_many<I, S>(&self, icaos: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if !self.is_enabled() {
            return;
        }
        let now = self.clock.now();
        let mut state = self.state.lock();
        for icao in icaos {
            if let Some(icao) = normalise_icao24(icao.as_ref()) {
                state.entries.entry(icao).or_insert(now);
            }
        }
        state.peak = state.peak.max(state.entries.len());
    }

    pub fn contains(&self, icao: &str) -> bool {
        normalise_icao24(icao).is_some_and(|icao| self.state.lock().entries.contains_key(&icao))
    }

    pub fn seconds_to_next_lookup(&self) -> i64 {
        self.state.lock().seconds_to_next_lookup
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        QueueStats {
            queued: state.entries.len(),
            peak: state.peak,
            expired: state.expired,
            batches: self.batches.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    /// Decide whether a batch should start now, claiming the in-flight flag
    /// when it should.
    fn try_begin(&self) -> bool {
        if self.is_halted() {
            return false;
        }
        let mut state = self.state.lock();
        if !self.is_enabled() {
            state.entries.clear();
            return false;
        }
        if state.entries.is_empty() {
            return false;
        }
        let now = self.clock.now();
        let due = state
            .last_lookup
            .map_or(true, |last| now >= last + Duration::seconds(state.seconds_to_next_lookup));
        if !due {
            return false;
        }
        self.in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Run one tick inline. Returns true when a batch was attempted.
    pub async fn tick(&self) -> Result<bool> {
        if !self.try_begin() {
            return Ok(false);
        }
        self.run_batch().await?;
        Ok(true)
    }

    /// Look up one batch. Must only be called after `try_begin` succeeded.
    async fn run_batch(&self) -> Result<()> {
        let _in_flight = InFlight(&self.in_flight);

        if let Err(e) = check_provider(self.provider.as_ref()) {
            self.halted.store(true, Ordering::SeqCst);
            error!(error = %e, "online lookup halted");
            return Err(e);
        }

        let now = self.clock.now();
        let batch = {
            let mut state = self.state.lock();
            let threshold = now - Duration::minutes(EXPIRE_QUEUE_ENTRY_MINUTES);
            let before = state.entries.len();
            state.entries.retain(|_, queued_at| *queued_at > threshold);
            let expired = (before - state.entries.len()) as u64;
            state.expired += expired;
            if expired > 0 {
                debug!(expired, "expired queued lookups");
            }

            let mut oldest: Vec<(&String, &DateTime<Utc>)> = state.entries.iter().collect();
            oldest.sort_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.cmp(b.0)));
            oldest
                .into_iter()
                .take(self.provider.max_batch_size())
                .map(|(icao, _)| icao.clone())
                .collect::<Vec<_>>()
        };
        if batch.is_empty() {
            return Ok(());
        }

        self.batches.fetch_add(1, Ordering::Relaxed);
        let (failed, results) = match self.provider.lookup_batch(&batch).await {
            Ok(results) => (false, results),
            Err(LookupError::Transport(e)) => {
                warn!(error = %e, count = batch.len(), "online lookup failed");
                (true, LookupBatch::default())
            }
            Err(e @ LookupError::Provider(_)) => {
                error!(error = %e, count = batch.len(), "online lookup error");
                (false, LookupBatch::default())
            }
        };

        let min = self.provider.min_seconds_between_requests();
        let max = self.provider.max_seconds_after_failed_request();
        {
            let mut state = self.state.lock();
            state.last_lookup = Some(self.clock.now());
            if failed {
                self.failures.fetch_add(1, Ordering::Relaxed);
                if state.seconds_to_next_lookup + min <= max {
                    state.seconds_to_next_lookup += min;
                }
            } else {
                state.seconds_to_next_lookup = min;
                for icao in &batch {
                    state.entries.remove(icao);
                }
            }
        }

        if !failed && (!results.found.is_empty() || !results.missing.is_empty()) {
            debug!(found = results.found.len(), missing = results.missing.len(), "online lookup fetched");
            self.fetched.publish(&results);
        }
        Ok(())
    }

    /// Drive the queue from a timer. Each batch runs in its own task.
    pub fn spawn(self: Arc<Self>, period: StdDuration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if self.is_halted() {
                    break;
                }
                if self.try_begin() {
                    let queue = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = queue.run_batch().await {
                            error!(error = %e, "online lookup batch aborted");
                        }
                    });
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    struct MockProvider {
        max_batch: usize,
        min_secs: i64,
        max_secs: i64,
        responses: Mutex<VecDeque<std::result::Result<LookupBatch, LookupError>>>,
        requests: Mutex<Vec<Vec<String>>>,
    }

    impl MockProvider {
        fn new() -> Self {
            MockProvider {
                max_batch: 10,
                min_secs: 2,
                max_secs: 7,
                responses: Mutex::new(VecDeque::new()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn respond(&self, result: std::result::Result<LookupBatch, LookupError>) {
            self.responses.lock().push_back(result);
        }

        fn requests(&self) -> Vec<Vec<String>> {
            self.requests.lock().clone()
        }
    }

    #[async_trait]
    impl LookupProvider for MockProvider {
        fn max_batch_size(&self) -> usize {
            self.max_batch
        }
        fn min_seconds_between_requests(&self) -> i64 {
            self.min_secs
        }
        fn max_seconds_after_failed_request(&self) -> i64 {
            self.max_secs
        }
        async fn lookup_batch(&self, icaos: &[String]) -> std::result::Result<LookupBatch, LookupError> {
            self.requests.lock().push(icaos.to_vec());
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(LookupBatch::default()))
        }
    }

    fn make_queue() -> (Arc<OnlineLookupQueue>, Arc<MockProvider>, Arc<ManualClock>) {
        let provider = Arc::new(MockProvider::new());
        let clock = Arc::new(ManualClock::default());
        let queue = OnlineLookupQueue::new(provider.clone(), clock.clone(), true).unwrap();
        (Arc::new(queue), provider, clock)
    }

    fn found(icao: &str) -> AircraftDetail {
        AircraftDetail {
            icao24: icao.into(),
            registration: Some("G-ABCD".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_invalid_providers_rejected() {
        let clock = Arc::new(ManualClock::default());
        let mut p = MockProvider::new();
        p.max_batch = 9;
        assert!(OnlineLookupQueue::new(Arc::new(p), clock.clone(), true).is_err());
        let mut p = MockProvider::new();
        p.min_secs = 0;
        assert!(OnlineLookupQueue::new(Arc::new(p), clock.clone(), true).is_err());
        let mut p = MockProvider::new();
        p.max_secs = 1;
        assert!(matches!(
            OnlineLookupQueue::new(Arc::new(p), clock, true),
            Err(FeedError::InvalidProvider(_))
        ));
    }

    #[test]
    fn test_enqueue_dedupes_and_validates() {
        let (queue, _, _) = make_queue();
        queue.enqueue("4840d6");
        queue.enqueue(" 4840D6 ");
        queue.enqueue("XYZ123");
        queue.enqueue("4840D");
        assert_eq!(queue.stats().queued, 1);
        assert!(queue.contains("4840D6"));
    }

    #[test]
    fn test_enqueue_ignored_when_disabled() {
        let (queue, _, _) = make_queue();
        queue.set_enabled(false);
        queue.enqueue_many(["4840D6", "ABCDEF"]);
        assert_eq!(queue.stats().queued, 0);
    }

    #[tokio::test]
    async fn test_successful_batch_removes_entries_and_notifies() {
        let (queue, provider, _) = make_queue();
        let notified = Arc::new(Mutex::new(Vec::new()));
        let n = notified.clone();
        queue.fetched().subscribe(move |batch: &LookupBatch| n.lock().push(batch.clone()));

        queue.enqueue_many(["4840D6", "ABCDEF"]);
        provider.respond(Ok(LookupBatch {
            found: vec![found("4840D6")],
            missing: vec!["ABCDEF".into()],
        }));

        assert!(queue.tick().await.unwrap());
        assert_eq!(queue.stats().queued, 0);
        let notified = notified.lock();
        assert_eq!(notified.len(), 1);
        assert_eq!(notified[0].found[0].icao24, "4840D6");
        assert_eq!(notified[0].missing, vec!["ABCDEF".to_string()]);
    }

    #[tokio::test]
    async fn test_batches_take_oldest_first() {
        let (queue, provider, clock) = make_queue();
        for i in 0..12u32 {
            queue.enqueue(&format!("{:06X}", 0x100 + i));
            clock.advance(Duration::milliseconds(10));
        }
        assert!(queue.tick().await.unwrap());
        let first = &provider.requests()[0];
        assert_eq!(first.len(), 10);
        assert_eq!(first[0], "000100");
        assert_eq!(first[9], "000109");
        // The two newest wait for the next tick
        assert!(queue.contains("00010A"));
        assert!(queue.contains("00010B"));
    }

    #[tokio::test]
    async fn test_rate_limit_between_batches() {
        let (queue, _, clock) = make_queue();
        queue.enqueue("000001");
        assert!(queue.tick().await.unwrap());
        queue.enqueue("000002");
        clock.advance(Duration::seconds(1));
        assert!(!queue.tick().await.unwrap());
        clock.advance(Duration::seconds(1));
        assert!(queue.tick().await.unwrap());
    }

    #[tokio::test]
    async fn test_linear_backoff_with_cap() {
        let (queue, provider, clock) = make_queue();
        queue.enqueue("000001");
        let mut waits = Vec::new();
        for _ in 0..4 {
            provider.respond(Err(LookupError::Transport("connection refused".into())));
            clock.advance(Duration::seconds(60));
            assert!(queue.tick().await.unwrap());
            waits.push(queue.seconds_to_next_lookup());
        }
        // 2 -> 4 -> 6, then 8 would pass the ceiling of 7
        assert_eq!(waits, vec![4, 6, 6, 6]);
        assert!(queue.contains("000001"));
        assert_eq!(queue.stats().failures, 4);

        clock.advance(Duration::seconds(60));
        assert!(queue.tick().await.unwrap());
        assert_eq!(queue.seconds_to_next_lookup(), 2);
        assert!(!queue.contains("000001"));
    }

    #[tokio::test]
    async fn test_provider_error_treated_as_empty_success() {
        let (queue, provider, _) = make_queue();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        queue.fetched().subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        queue.enqueue("000001");
        provider.respond(Err(LookupError::Provider("bad record".into())));
        assert!(queue.tick().await.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!queue.contains("000001"));
        assert_eq!(queue.seconds_to_next_lookup(), 2);
    }

    #[tokio::test]
    async fn test_expired_entries_vanish_silently() {
        let (queue, provider, clock) = make_queue();
        let named = Arc::new(AtomicUsize::new(0));
        let n = named.clone();
        queue.fetched().subscribe(move |batch: &LookupBatch| {
            if batch.missing.iter().any(|m| m == "000001") || batch.found.iter().any(|f| f.icao24 == "000001") {
                n.fetch_add(1, Ordering::SeqCst);
            }
        });

        queue.enqueue("000001");
        clock.advance(Duration::minutes(EXPIRE_QUEUE_ENTRY_MINUTES));
        queue.enqueue("000002");
        provider.respond(Ok(LookupBatch {
            found: vec![],
            missing: vec!["000002".into()],
        }));
        assert!(queue.tick().await.unwrap());

        assert_eq!(provider.requests()[0], vec!["000002".to_string()]);
        assert!(!queue.contains("000001"));
        assert_eq!(queue.stats().expired, 1);
        assert_eq!(named.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_disabled_tick_clears_queue() {
        let (queue, provider, _) = make_queue();
        queue.enqueue("000001");
        queue.set_enabled(false);
        assert!(!queue.tick().await.unwrap());
        assert_eq!(queue.stats().queued, 0);
        assert!(provider.requests().is_empty());
    }

    #[tokio::test]
    async fn test_only_one_batch_in_flight() {
        let (queue, _, _) = make_queue();
        queue.enqueue("000001");
        assert!(queue.try_begin());
        assert!(!queue.try_begin());
        queue.run_batch().await.unwrap();
        queue.enqueue("000002");
        // Released, but the rate limit still applies
        assert!(!queue.try_begin());
        assert!(!queue.in_flight.load(Ordering::SeqCst));
    }

    struct ShrinkingProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LookupProvider for ShrinkingProvider {
        fn max_batch_size(&self) -> usize {
            if self.calls.fetch_add(1, Ordering::SeqCst) < 1 {
                10
            } else {
                1
            }
        }
        fn min_seconds_between_requests(&self) -> i64 {
            1
        }
        fn max_seconds_after_failed_request(&self) -> i64 {
            1
        }
        async fn lookup_batch(&self, _icaos: &[String]) -> std::result::Result<LookupBatch, LookupError> {
            Ok(LookupBatch::default())
        }
    }

    #[tokio::test]
    async fn test_provider_checked_on_use() {
        let provider = Arc::new(ShrinkingProvider {
            calls: AtomicUsize::new(0),
        });
        let clock = Arc::new(ManualClock::default());
        let queue = OnlineLookupQueue::new(provider, clock, true).unwrap();
        queue.enqueue("000001");
        assert!(matches!(queue.tick().await, Err(FeedError::InvalidProvider(_))));
        assert!(queue.is_halted());
        assert!(!queue.tick().await.unwrap());
    }
}
