//! The raw message source behind a feed.
//!
//! A listener owns the connection to one source (a receiver socket, or for
//! merged feeds a set of other listeners) and publishes [`ListenerEvent`]s.
//! Stores and feeds subscribe to those events; they never poll.

use std::sync::Arc;

use crate::config::ReceiverConfig;
use crate::events::EventHub;
use crate::message::ListenerEvent;
use crate::types::{ConnectionStatus, Result};

pub trait Listener: Send + Sync {
    fn receiver_id(&self) -> i32;
    fn name(&self) -> String;
    fn is_satcom_feed(&self) -> bool;
    fn connection_status(&self) -> ConnectionStatus;
    fn connect(&self);
    fn disconnect(&self);
    /// Apply an edited receiver entry whose endpoint did not change.
    fn apply_configuration(&self, receiver: &ReceiverConfig);
    fn events(&self) -> &EventHub<ListenerEvent>;
}

/// Builds listeners for configured receivers.
pub trait ListenerFactory: Send + Sync {
    fn create_listener(&self, receiver: &ReceiverConfig) -> Result<Arc<dyn Listener>>;
}

/// True when both handles point at the same listener instance.
pub fn same_listener(a: &Arc<dyn Listener>, b: &Arc<dyn Listener>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
