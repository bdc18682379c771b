//! Synchronous publish/subscribe used to wire listeners, stores, feeds and
//! the feed manager together.
//!
//! Subscribers run on the publishing thread. The subscriber list is
//! copy-on-write, so a publish never waits on a subscribe or unsubscribe and a
//! subscriber may unsubscribe itself from inside its own callback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Handle returned by [`EventHub::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub struct EventHub<T> {
    next_id: AtomicU64,
    subscribers: ArcSwap<Vec<(u64, Callback<T>)>>,
    write_lock: Mutex<()>,
}

impl<T> EventHub<T> {
    pub fn new() -> Self {
        EventHub {
            next_id: AtomicU64::new(1),
            subscribers: ArcSwap::from_pointee(Vec::new()),
            write_lock: Mutex::new(()),
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let _guard = self.write_lock.lock();
        let mut list = Vec::clone(&self.subscribers.load());
        list.push((id, Arc::new(callback)));
        self.subscribers.store(Arc::new(list));
        SubscriptionId(id)
    }

    /// Returns false when the subscription was not (or no longer) registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let _guard = self.write_lock.lock();
        let current = self.subscribers.load();
        if !current.iter().any(|(sid, _)| *sid == id.0) {
            return false;
        }
        let list: Vec<_> = current
            .iter()
            .filter(|(sid, _)| *sid != id.0)
            .cloned()
            .collect();
        self.subscribers.store(Arc::new(list));
        true
    }

    pub fn publish(&self, event: &T) {
        let subscribers = self.subscribers.load();
        for (_, callback) in subscribers.iter() {
            callback(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.load().len()
    }
}

impl<T> Default for EventHub<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for EventHub<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
