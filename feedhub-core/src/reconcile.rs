//! Work out what a configuration change means for the live feeds.
//!
//! Planning is pure so the feed manager only has to carry the plan out.

use std::collections::HashMap;

use crate::config::{Configuration, MergedFeedConfig, ReceiverConfig};

/// A live feed as the planner sees it.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveFeed {
    Receiver(ReceiverConfig),
    Merged(MergedFeedConfig),
    Custom(i32),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilePlan {
    /// Receiver and merged feeds to dispose, by id.
    pub dispose: Vec<i32>,
    pub create_receivers: Vec<ReceiverConfig>,
    pub update_receivers: Vec<ReceiverConfig>,
    pub create_merged: Vec<MergedFeedConfig>,
    /// Every surviving merged feed; their components are rebuilt against
    /// the receivers that exist after the receiver pass.
    pub update_merged: Vec<MergedFeedConfig>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.dispose.is_empty()
            && self.create_receivers.is_empty()
            && self.update_receivers.is_empty()
            && self.create_merged.is_empty()
            && self.update_merged.is_empty()
    }
}

/// Plan the move from `live` to the enabled feeds of `config`.
///
/// A receiver whose endpoint changed is disposed and created again; any
/// other edit is applied in place. Unchanged receivers are left alone.
/// Custom feeds never appear in the plan.
pub fn plan_reconciliation(live: &[LiveFeed], config: &Configuration) -> ReconcilePlan {
    let mut live_receivers: HashMap<i32, &ReceiverConfig> = HashMap::new();
    let mut live_merged: HashMap<i32, &MergedFeedConfig> = HashMap::new();
    for feed in live {
        match feed {
            LiveFeed::Receiver(r) => {
                live_receivers.insert(r.unique_id, r);
            }
            LiveFeed::Merged(m) => {
                live_merged.insert(m.unique_id, m);
            }
            LiveFeed::Custom(_) => {}
        }
    }

    let receivers: Vec<&ReceiverConfig> = config.receivers.iter().filter(|r| r.enabled).collect();
    let merged: Vec<&MergedFeedConfig> = config.merged_feeds.iter().filter(|m| m.enabled).collect();

    let mut plan = ReconcilePlan::default();

    for feed in live {
        match feed {
            LiveFeed::Receiver(current) => {
                match receivers.iter().find(|r| r.unique_id == current.unique_id) {
                    None => plan.dispose.push(current.unique_id),
                    Some(next) if !current.same_source(next) => plan.dispose.push(current.unique_id),
                    Some(_) => {}
                }
            }
            LiveFeed::Merged(current) => {
                if !merged.iter().any(|m| m.unique_id == current.unique_id) {
                    plan.dispose.push(current.unique_id);
                }
            }
            LiveFeed::Custom(_) => {}
        }
    }

    for next in receivers {
        match live_receivers.get(&next.unique_id) {
            None => plan.create_receivers.push(next.clone()),
            Some(current) if !current.same_source(next) => plan.create_receivers.push(next.clone()),
            Some(current) if *current != next => plan.update_receivers.push(next.clone()),
            Some(_) => {}
        }
    }

    for next in merged {
        if live_merged.contains_key(&next.unique_id) {
            plan.update_merged.push(next.clone());
        } else {
            plan.create_merged.push(next.clone());
        }
    }

    plan
}
