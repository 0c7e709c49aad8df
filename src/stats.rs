//! Per-topic receive statistics.
//!
//! Counters are atomics so concurrent delivery threads never wait on each
//! other for the common fields. Only the per-source sequence table sits
//! behind a mutex, and each topic has its own.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chill_bus::{BusError, Envelope, MessageListener};
use chill_types::{discard_key, SubscriberStatus, UnixMillis};
use parking_lot::{Mutex, RwLock};
use tracing::debug;

#[derive(Debug, Clone, Copy)]
struct SequenceTrack {
    last: u64,
    discards: u64,
}

/// Receive statistics for one topic.
#[derive(Debug, Default)]
pub struct SubscriberStats {
    received: AtomicU64,
    /// Zero until the first receive.
    last_receive_ms: AtomicU64,
    last_lag_ms: AtomicU64,
    sequences: Mutex<BTreeMap<String, SequenceTrack>>,
}

impl SubscriberStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one message into the statistics.
    ///
    /// A sequence jump from `n` to `m > n + 1` counts the `m - n - 1` missing
    /// messages as discarded for that `key`. A sequence that does not advance
    /// means the publisher restarted and becomes the new baseline.
    pub fn record(&self, key: &str, sequence: u64, published: UnixMillis, received: UnixMillis) {
        self.received.fetch_add(1, Ordering::Relaxed);
        self.last_receive_ms
            .store(received.as_millis(), Ordering::Relaxed);
        self.last_lag_ms
            .store(received.saturating_since(published), Ordering::Relaxed);

        let mut sequences = self.sequences.lock();
        match sequences.get_mut(key) {
            Some(track) => {
                if sequence > track.last.saturating_add(1) {
                    track.discards += sequence - track.last - 1;
                }
                track.last = sequence;
            }
            None => {
                sequences.insert(
                    key.to_string(),
                    SequenceTrack {
                        last: sequence,
                        discards: 0,
                    },
                );
            }
        }
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn discards(&self, key: &str) -> u64 {
        self.sequences.lock().get(key).map_or(0, |t| t.discards)
    }

    pub fn total_discards(&self) -> u64 {
        self.sequences.lock().values().map(|t| t.discards).sum()
    }

    /// Zero every counter and forget all sequence baselines.
    pub fn reset(&self) {
        self.received.store(0, Ordering::Relaxed);
        self.last_receive_ms.store(0, Ordering::Relaxed);
        self.last_lag_ms.store(0, Ordering::Relaxed);
        self.sequences.lock().clear();
    }

    pub fn status(&self) -> SubscriberStatus {
        let last_receive = match self.last_receive_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(UnixMillis::from_millis(ms)),
        };
        let discards = self
            .sequences
            .lock()
            .iter()
            .map(|(key, track)| (key.clone(), track.discards))
            .collect();

        SubscriberStatus {
            received: self.received(),
            last_receive,
            last_lag_ms: self.last_lag_ms.load(Ordering::Relaxed),
            discards,
        }
    }
}

/// Counts every inbound message and routes it to its topic's statistics.
///
/// This is the listener the subscription controller attaches to each of its
/// subscriptions.
#[derive(Debug, Default)]
pub struct ReceiptTracker {
    receipts: AtomicU64,
    subscribers: RwLock<BTreeMap<String, Arc<SubscriberStats>>>,
}

impl ReceiptTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a topic, or return its existing statistics.
    pub fn track(&self, topic: &str) -> Arc<SubscriberStats> {
        // Fast path: check if it exists
        {
            let subscribers = self.subscribers.read();
            if let Some(stats) = subscribers.get(topic) {
                return stats.clone();
            }
        }

        // Slow path: double-check under the write lock
        let mut subscribers = self.subscribers.write();
        subscribers
            .entry(topic.to_string())
            .or_insert_with(|| Arc::new(SubscriberStats::default()))
            .clone()
    }

    pub fn get(&self, topic: &str) -> Option<Arc<SubscriberStats>> {
        self.subscribers.read().get(topic).cloned()
    }

    pub fn receipt_count(&self) -> u64 {
        self.receipts.load(Ordering::Relaxed)
    }

    /// Zero the receipt count and every topic's statistics.
    pub fn reset(&self) {
        self.receipts.store(0, Ordering::Relaxed);
        for stats in self.subscribers.read().values() {
            stats.reset();
        }
    }

    pub fn topics(&self) -> Vec<String> {
        self.subscribers.read().keys().cloned().collect()
    }

    pub fn statuses(&self) -> BTreeMap<String, SubscriberStatus> {
        self.subscribers
            .read()
            .iter()
            .map(|(topic, stats)| (topic.clone(), stats.status()))
            .collect()
    }

    /// Fold a message into its topic's statistics.
    ///
    /// Every header field is read before anything is updated, so a malformed
    /// envelope leaves all statistics untouched.
    pub fn observe(&self, envelope: &Envelope) -> Result<(), BusError> {
        let message_type = envelope.message_type()?;
        let source_pid = envelope.source_pid()?;
        let sequence = envelope.sequence()?;
        let published = envelope.publish_time()?;

        let Some(stats) = self.get(&envelope.topic) else {
            debug!(topic = %envelope.topic, "message on untracked topic");
            return Ok(());
        };
        stats.record(
            &discard_key(message_type, source_pid),
            sequence,
            published,
            UnixMillis::now(),
        );
        Ok(())
    }
}

impl MessageListener for ReceiptTracker {
    fn on_message(&self, envelope: &Envelope) {
        self.receipts.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = self.observe(envelope) {
            debug!(topic = %envelope.topic, error = %e, "dropping unreadable message");
        }
    }
}
