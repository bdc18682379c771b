//! feedhub-core: live aggregation engine for BaseStation-format ADS-B feeds.
//!
//! Per-feed aircraft stores fold messages into versioned records, the feed
//! manager keeps receiver, merged and custom feeds in step with
//! configuration, and the online lookup queue enriches aircraft with identity
//! detail in the background. No sockets or HTTP here; the server crate
//! supplies listeners and the lookup provider.

pub mod aircraft;
pub mod clock;
pub mod config;
pub mod detail;
pub mod events;
pub mod feed;
pub mod geo;
pub mod listener;
pub mod lookup;
pub mod manager;
pub mod merged;
pub mod message;
pub mod reconcile;
pub mod sanity;
pub mod store;
pub mod track;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export commonly used types at crate root
pub use aircraft::{Aircraft, AircraftDetail, Versioned};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Configuration, MergedFeedConfig, ReceiverConfig, ReceiverUsage};
pub use events::{EventHub, SubscriptionId};
pub use feed::{CustomFeed, Feed, FeedEvent};
pub use listener::{Listener, ListenerFactory};
pub use lookup::{LookupBatch, LookupError, LookupProvider, OnlineLookupQueue};
pub use manager::{FeedManager, FeedManagerEvent};
pub use message::{BaseStationMessage, FeedMessage, ListenerEvent, MessageType};
pub use store::{AircraftStore, Snapshot, StoreServices};
pub use types::*;
