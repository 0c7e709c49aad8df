//! Distributor for session, command and other non-channel traffic.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chill_bus::{Distributor, Envelope, MessageListener};
use parking_lot::RwLock;
use tracing::{debug, info};

/// Counts messages per type and hands them to listeners registered for that
/// type, on the delivering thread.
#[derive(Default)]
pub struct GeneralDistributor {
    counts: RwLock<BTreeMap<String, Arc<AtomicU64>>>,
    listeners: RwLock<BTreeMap<String, Vec<Arc<dyn MessageListener>>>>,
    total: AtomicU64,
    shut_down: AtomicBool,
}

impl GeneralDistributor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for one message type.
    pub fn add_listener(&self, message_type: impl Into<String>, listener: Arc<dyn MessageListener>) {
        self.listeners
            .write()
            .entry(message_type.into())
            .or_default()
            .push(listener);
    }

    /// Drop every listener registered for `message_type`.
    pub fn remove_listeners(&self, message_type: &str) {
        self.listeners.write().remove(message_type);
    }

    /// Messages received so far, by type.
    pub fn counts(&self) -> BTreeMap<String, u64> {
        self.counts
            .read()
            .iter()
            .map(|(t, c)| (t.clone(), c.load(Ordering::Relaxed)))
            .collect()
    }

    pub fn count(&self, message_type: &str) -> u64 {
        self.counts
            .read()
            .get(message_type)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn counter(&self, message_type: &str) -> Arc<AtomicU64> {
        {
            let counts = self.counts.read();
            if let Some(counter) = counts.get(message_type) {
                return counter.clone();
            }
        }

        let mut counts = self.counts.write();
        counts
            .entry(message_type.to_string())
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .clone()
    }
}

impl MessageListener for GeneralDistributor {
    fn on_message(&self, envelope: &Envelope) {
        if self.is_shut_down() {
            return;
        }
        let message_type = match envelope.message_type() {
            Ok(t) => t,
            Err(e) => {
                debug!(topic = %envelope.topic, error = %e, "general distributor skipping message");
                return;
            }
        };

        self.total.fetch_add(1, Ordering::Relaxed);
        self.counter(message_type).fetch_add(1, Ordering::Relaxed);

        let listeners = self.listeners.read().get(message_type).cloned();
        for listener in listeners.into_iter().flatten() {
            listener.on_message(envelope);
        }
    }
}

impl Distributor for GeneralDistributor {
    fn start(&self) {
        if self.shut_down.swap(false, Ordering::SeqCst) {
            debug!("general distributor restarted");
        }
    }

    fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        for (message_type, count) in self.counts() {
            debug!(message_type = %message_type, count, "general distributor received");
        }
        info!(total = self.total(), "general distributor shut down");
    }
}
