//! Snapshot - a point-in-time view of a monitoring session.

use std::collections::BTreeMap;

use crate::{
    ControllerState, SchemaVersion, SubscriberStatus, SubscriberStatusBuilder, UnixMillis,
};

/// A point-in-time view of a subscription controller.
///
/// Snapshots are what status displays and the periodic reporter consume.
/// They are detached copies, so holding one never blocks message receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "minicbor", derive(minicbor::Encode, minicbor::Decode))]
pub struct StatusSnapshot {
    #[cfg_attr(feature = "minicbor", n(0))]
    pub version: SchemaVersion,

    /// When the snapshot was taken.
    #[cfg_attr(feature = "minicbor", n(1))]
    pub timestamp: UnixMillis,

    #[cfg_attr(feature = "minicbor", n(2))]
    pub state: ControllerState,

    /// Messages seen by the controller across all topics, including ones
    /// that could not be attributed to a topic.
    #[cfg_attr(feature = "minicbor", n(3))]
    pub receipt_count: u64,

    /// Per-topic statistics keyed by topic name.
    #[cfg_attr(feature = "minicbor", n(4))]
    pub subscribers: BTreeMap<String, SubscriberStatus>,
}

impl StatusSnapshot {
    pub fn new() -> Self {
        Self::with_timestamp(UnixMillis::now())
    }

    pub fn with_timestamp(timestamp: UnixMillis) -> Self {
        Self {
            version: SchemaVersion::current(),
            timestamp,
            state: ControllerState::default(),
            receipt_count: 0,
            subscribers: BTreeMap::new(),
        }
    }

    pub fn builder() -> StatusSnapshotBuilder {
        StatusSnapshotBuilder::new()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Number of subscribed topics.
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn get(&self, topic: &str) -> Option<&SubscriberStatus> {
        self.subscribers.get(topic)
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.subscribers.keys().map(String::as_str)
    }

    /// Sum of per-topic receive counts.
    pub fn total_received(&self) -> u64 {
        self.subscribers.values().map(|s| s.received).sum()
    }

    pub fn total_discards(&self) -> u64 {
        self.subscribers.values().map(|s| s.total_discards()).sum()
    }

    /// The most recent receive time across all topics.
    pub fn latest_receive(&self) -> Option<UnixMillis> {
        self.subscribers.values().filter_map(|s| s.last_receive).max()
    }

    /// The worst last-message lag across all topics.
    pub fn longest_lag_ms(&self) -> u64 {
        self.subscribers
            .values()
            .map(|s| s.last_lag_ms)
            .max()
            .unwrap_or(0)
    }
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for constructing `StatusSnapshot` instances.
#[derive(Debug, Default)]
pub struct StatusSnapshotBuilder {
    timestamp: Option<UnixMillis>,
    state: ControllerState,
    receipt_count: u64,
    subscribers: BTreeMap<String, SubscriberStatus>,
}

impl StatusSnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timestamp(mut self, at: UnixMillis) -> Self {
        self.timestamp = Some(at);
        self
    }

    pub fn state(mut self, state: ControllerState) -> Self {
        self.state = state;
        self
    }

    pub fn receipt_count(mut self, count: u64) -> Self {
        self.receipt_count = count;
        self
    }

    /// Add a topic whose status is built with a closure.
    pub fn subscriber<F>(mut self, topic: impl Into<String>, f: F) -> Self
    where
        F: FnOnce(SubscriberStatusBuilder) -> SubscriberStatusBuilder,
    {
        let status = f(SubscriberStatusBuilder::new()).build();
        self.subscribers.insert(topic.into(), status);
        self
    }

    /// Add a topic with a pre-built status.
    pub fn subscriber_status(mut self, topic: impl Into<String>, status: SubscriberStatus) -> Self {
        self.subscribers.insert(topic.into(), status);
        self
    }

    pub fn build(self) -> StatusSnapshot {
        StatusSnapshot {
            version: SchemaVersion::current(),
            timestamp: self.timestamp.unwrap_or_else(UnixMillis::now),
            state: self.state,
            receipt_count: self.receipt_count,
            subscribers: self.subscribers,
        }
    }
}
