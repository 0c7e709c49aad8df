//! Bus heartbeat: liveness detection by periodic publishing.
//!
//! A heartbeat publisher sends a small message to the client topic on a fixed
//! interval. The first failed publish marks the bus as lost; the first
//! success after that marks it as regained. Listeners hear about each
//! transition exactly once.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use chill_types::UnixMillis;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::{BusError, Envelope, MessageBus};

/// Message type of heartbeat envelopes.
pub const HEARTBEAT_MESSAGE_TYPE: &str = "ClientHeartbeat";

/// Notified when bus connectivity is lost and regained.
///
/// Callbacks run on the heartbeat thread.
pub trait HeartbeatListener: Send + Sync {
    fn heartbeat_lost(&self);
    fn heartbeat_regained(&self);
}

/// Something that publishes heartbeats and reports connectivity changes.
pub trait HeartbeatPublisher: Send + Sync {
    /// Start publishing. Returns whether the bus was reachable on the first
    /// attempt; that attempt is not reported to listeners, but a later
    /// success after it failed is. A second call does not start a second
    /// publisher.
    fn start_publishing(&self) -> bool;

    /// Ask the publisher to stop. Does not wait for it, so it is safe to call
    /// from a listener callback.
    fn stop_publishing(&self);

    /// Listeners are held weakly and dropped once they go away.
    fn add_listener(&self, listener: Weak<dyn HeartbeatListener>);
}

struct HeartbeatState {
    bus: Arc<dyn MessageBus>,
    topic: String,
    interval: Duration,
    listeners: Mutex<Vec<Weak<dyn HeartbeatListener>>>,
    lost: AtomicBool,
    sequence: AtomicU64,
}

impl HeartbeatState {
    fn publish(&self) -> Result<(), BusError> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let envelope = Envelope::builder(HEARTBEAT_MESSAGE_TYPE)
            .source_pid(std::process::id())
            .sequence(sequence)
            .publish_time(UnixMillis::now())
            .build();
        self.bus.publish(&self.topic, envelope)
    }

    /// Publish one heartbeat and notify listeners on a transition.
    fn beat(&self) -> bool {
        match self.publish() {
            Ok(()) => {
                if self.lost.swap(false, Ordering::SeqCst) {
                    info!(topic = %self.topic, "heartbeat regained");
                    self.notify(|l| l.heartbeat_regained());
                }
                true
            }
            Err(e) => {
                if !self.lost.swap(true, Ordering::SeqCst) {
                    warn!(topic = %self.topic, error = %e, "heartbeat lost");
                    self.notify(|l| l.heartbeat_lost());
                }
                false
            }
        }
    }

    fn notify(&self, f: impl Fn(&dyn HeartbeatListener)) {
        let listeners: Vec<Arc<dyn HeartbeatListener>> = {
            let mut registered = self.listeners.lock();
            registered.retain(|l| l.strong_count() > 0);
            registered.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in listeners {
            f(listener.as_ref());
        }
    }
}

/// Heartbeat publisher over any [`MessageBus`], on a dedicated thread.
pub struct BusHeartbeat {
    state: Arc<HeartbeatState>,
    running: AtomicBool,
    stop: Mutex<Option<Sender<()>>>,
}

impl BusHeartbeat {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

    pub fn new(bus: Arc<dyn MessageBus>, topic: impl Into<String>) -> Self {
        Self::with_interval(bus, topic, Self::DEFAULT_INTERVAL)
    }

    pub fn with_interval(
        bus: Arc<dyn MessageBus>,
        topic: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            state: Arc::new(HeartbeatState {
                bus,
                topic: topic.into(),
                interval,
                listeners: Mutex::new(Vec::new()),
                lost: AtomicBool::new(false),
                sequence: AtomicU64::new(1),
            }),
            running: AtomicBool::new(false),
            stop: Mutex::new(None),
        }
    }

    pub fn topic(&self) -> &str {
        &self.state.topic
    }

    pub fn is_publishing(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// True between a failed publish and the next successful one.
    pub fn is_lost(&self) -> bool {
        self.state.lost.load(Ordering::SeqCst)
    }

    /// Heartbeats attempted so far.
    pub fn beats(&self) -> u64 {
        self.state.sequence.load(Ordering::Relaxed) - 1
    }
}

impl HeartbeatPublisher for BusHeartbeat {
    fn start_publishing(&self) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!(topic = %self.state.topic, "heartbeat already publishing");
            return !self.is_lost();
        }

        // Reported through the return value, not to listeners.
        let reachable = match self.state.publish() {
            Ok(()) => true,
            Err(e) => {
                warn!(topic = %self.state.topic, error = %e, "bus unreachable on first heartbeat");
                false
            }
        };
        self.state.lost.store(!reachable, Ordering::SeqCst);

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let state = self.state.clone();
        let spawned = thread::Builder::new()
            .name("chill-heartbeat".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(state.interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        state.beat();
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            });

        match spawned {
            Ok(_) => {
                *self.stop.lock() = Some(stop_tx);
                info!(
                    topic = %self.state.topic,
                    interval_ms = self.state.interval.as_millis() as u64,
                    "heartbeat publishing started"
                );
                reachable
            }
            Err(e) => {
                error!(error = %e, "failed to spawn heartbeat thread");
                self.running.store(false, Ordering::SeqCst);
                false
            }
        }
    }

    fn stop_publishing(&self) {
        if let Some(stop) = self.stop.lock().take() {
            let _ = stop.try_send(());
            self.running.store(false, Ordering::SeqCst);
            info!(topic = %self.state.topic, "heartbeat publishing stopped");
        }
    }

    fn add_listener(&self, listener: Weak<dyn HeartbeatListener>) {
        self.state.listeners.lock().push(listener);
    }
}

impl Drop for BusHeartbeat {
    fn drop(&mut self) {
        self.stop_publishing();
    }
}
