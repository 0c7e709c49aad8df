//! In-process message bus.
//!
//! `MemoryBus` routes published envelopes to open subscriptions on the same
//! topic through bounded crossbeam queues, one delivery thread per started
//! subscription. Outages and per-topic subscribe failures can be simulated,
//! which makes it the bus of choice for tests and the demo binary.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::{
    BusError, Envelope, Filter, MessageBus, MessageListener, ShutdownMode, Subscription,
    SubscriptionSpec,
};

#[derive(Debug)]
struct Route {
    topic: String,
    filter: Filter,
    tx: Sender<Envelope>,
    dropped: AtomicU64,
}

#[derive(Debug, Default)]
struct BusState {
    available: AtomicBool,
    routes: RwLock<BTreeMap<u64, Arc<Route>>>,
    next_id: AtomicU64,
    failing_topics: Mutex<BTreeSet<String>>,
    published: AtomicU64,
    dropped: AtomicU64,
}

/// An in-process bus. Clones share the same routing table.
#[derive(Debug, Clone)]
pub struct MemoryBus {
    state: Arc<BusState>,
}

impl MemoryBus {
    pub fn new() -> Self {
        let state = BusState::default();
        state.available.store(true, Ordering::SeqCst);
        Self {
            state: Arc::new(state),
        }
    }

    /// Bring the bus up or down. While down, `open` and `publish` fail.
    pub fn set_available(&self, available: bool) {
        let was = self.state.available.swap(available, Ordering::SeqCst);
        if was != available {
            debug!(available, "memory bus availability changed");
        }
    }

    pub fn is_available(&self) -> bool {
        self.state.available.load(Ordering::SeqCst)
    }

    /// Make every later `open` on `topic` fail.
    pub fn fail_topic(&self, topic: impl Into<String>) {
        self.state.failing_topics.lock().insert(topic.into());
    }

    pub fn clear_failures(&self) {
        self.state.failing_topics.lock().clear();
    }

    /// Number of subscriptions currently open.
    pub fn open_subscriptions(&self) -> usize {
        self.state.routes.read().len()
    }

    /// Distinct topics with at least one open subscription.
    pub fn subscribed_topics(&self) -> Vec<String> {
        let topics: BTreeSet<String> = self
            .state
            .routes
            .read()
            .values()
            .map(|r| r.topic.clone())
            .collect();
        topics.into_iter().collect()
    }

    /// Envelopes accepted by `publish`.
    pub fn published(&self) -> u64 {
        self.state.published.load(Ordering::Relaxed)
    }

    /// Deliveries dropped because a subscription queue was full.
    pub fn dropped(&self) -> u64 {
        self.state.dropped.load(Ordering::Relaxed)
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus for MemoryBus {
    fn open(
        &self,
        spec: SubscriptionSpec,
        listeners: Vec<Arc<dyn MessageListener>>,
    ) -> Result<Box<dyn Subscription>, BusError> {
        if !self.is_available() {
            return Err(BusError::Unavailable);
        }
        if self.state.failing_topics.lock().contains(&spec.topic) {
            return Err(BusError::subscribe(&spec.topic, "subscription refused by bus"));
        }

        let filter = match spec.filter.as_deref() {
            Some(expression) => Filter::parse(expression)?,
            None => Filter::all(),
        };

        let (tx, rx) = bounded(spec.queue_depth.max(1));
        let route = Arc::new(Route {
            topic: spec.topic.clone(),
            filter,
            tx,
            dropped: AtomicU64::new(0),
        });

        let id = self.state.next_id.fetch_add(1, Ordering::Relaxed);
        self.state.routes.write().insert(id, route.clone());
        debug!(topic = %spec.topic, queue_depth = spec.queue_depth, "opened memory subscription");

        Ok(Box::new(MemorySubscription {
            id,
            topic: spec.topic,
            bus: Arc::downgrade(&self.state),
            route: Some(route),
            rx: Some(rx),
            listeners: Arc::new(listeners),
            abort: Arc::new(AtomicBool::new(false)),
            worker: None,
            closed: false,
        }))
    }

    fn publish(&self, topic: &str, mut envelope: Envelope) -> Result<(), BusError> {
        if !self.is_available() {
            return Err(BusError::Unavailable);
        }
        envelope.topic = topic.to_string();
        self.state.published.fetch_add(1, Ordering::Relaxed);

        let routes: Vec<Arc<Route>> = self
            .state
            .routes
            .read()
            .values()
            .filter(|r| r.topic == topic && r.filter.matches(&envelope))
            .cloned()
            .collect();

        for route in routes {
            match route.tx.try_send(envelope.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    let dropped = route.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    self.state.dropped.fetch_add(1, Ordering::Relaxed);
                    if dropped.is_power_of_two() {
                        warn!(topic, dropped, "subscription queue full, dropping messages");
                    }
                }
                Err(TrySendError::Disconnected(_)) => {}
            }
        }
        Ok(())
    }
}

/// A subscription opened on a [`MemoryBus`].
pub struct MemorySubscription {
    id: u64,
    topic: String,
    bus: Weak<BusState>,
    route: Option<Arc<Route>>,
    rx: Option<Receiver<Envelope>>,
    listeners: Arc<Vec<Arc<dyn MessageListener>>>,
    abort: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    closed: bool,
}

impl MemorySubscription {
    /// Deliveries to this subscription dropped on a full queue.
    pub fn dropped(&self) -> u64 {
        self.route
            .as_ref()
            .map_or(0, |r| r.dropped.load(Ordering::Relaxed))
    }

    fn detach(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.routes.write().remove(&self.id);
        }
        // The route owns the sending half. Once every clone is gone the
        // delivery thread sees a disconnect after the queue empties.
        self.route = None;
    }
}

impl Subscription for MemorySubscription {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn start(&mut self) -> Result<(), BusError> {
        if self.closed {
            return Err(BusError::Closed);
        }
        let Some(rx) = self.rx.take() else {
            return Ok(());
        };

        let listeners = self.listeners.clone();
        let abort = self.abort.clone();
        let worker = thread::Builder::new()
            .name(format!("chill-sub-{}", self.id))
            .spawn(move || deliver(rx, listeners, abort))?;
        self.worker = Some(worker);
        Ok(())
    }

    fn shutdown(&mut self, mode: ShutdownMode) {
        if self.closed {
            return;
        }
        self.closed = true;

        if mode == ShutdownMode::Abort {
            self.abort.store(true, Ordering::SeqCst);
        }
        self.detach();
        // Never started: nothing was delivered and nothing will be.
        self.rx = None;

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!(topic = %self.topic, "subscription delivery thread panicked");
            }
        }
        debug!(topic = %self.topic, ?mode, "memory subscription closed");
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        self.shutdown(ShutdownMode::Abort);
    }
}

fn deliver(
    rx: Receiver<Envelope>,
    listeners: Arc<Vec<Arc<dyn MessageListener>>>,
    abort: Arc<AtomicBool>,
) {
    while let Ok(envelope) = rx.recv() {
        if abort.load(Ordering::SeqCst) {
            break;
        }
        for listener in listeners.iter() {
            listener.on_message(&envelope);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Envelope>>,
    }

    impl MessageListener for Recorder {
        fn on_message(&self, envelope: &Envelope) {
            self.seen.lock().push(envelope.clone());
        }
    }

    fn wait_for(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn open(bus: &MemoryBus, topic: &str, depth: usize) -> (Box<dyn Subscription>, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let sub = bus
            .open(SubscriptionSpec::new(topic, depth), vec![recorder.clone() as Arc<dyn MessageListener>])
            .unwrap();
        (sub, recorder)
    }

    #[test]
    fn delivers_to_matching_topic_after_start() {
        let bus = MemoryBus::new();
        let (mut sub, recorder) = open(&bus, "a", 16);

        bus.publish("a", Envelope::builder("Log").build()).unwrap();
        bus.publish("b", Envelope::builder("Log").build()).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert!(recorder.seen.lock().is_empty());

        sub.start().unwrap();
        wait_for(|| recorder.seen.lock().len() == 1);
        let seen = recorder.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].topic, "a");
    }

    #[test]
    fn filter_selects_session() {
        let bus = MemoryBus::new();
        let recorder = Arc::new(Recorder::default());
        let mut sub = bus
            .open(
                SubscriptionSpec::new("a", 16).with_filter("session_id = '1'"),
                vec![recorder.clone() as Arc<dyn MessageListener>],
            )
            .unwrap();
        sub.start().unwrap();

        bus.publish("a", Envelope::builder("Log").property("session_id", 2).build())
            .unwrap();
        bus.publish("a", Envelope::builder("Log").property("session_id", 1).build())
            .unwrap();
        sub.shutdown(ShutdownMode::Graceful);

        assert_eq!(recorder.seen.lock().len(), 1);
    }

    #[test]
    fn graceful_shutdown_drains_the_queue() {
        let bus = MemoryBus::new();
        let (mut sub, recorder) = open(&bus, "a", 1024);
        for _ in 0..200 {
            bus.publish("a", Envelope::builder("Log").build()).unwrap();
        }
        sub.start().unwrap();
        sub.shutdown(ShutdownMode::Graceful);

        assert_eq!(recorder.seen.lock().len(), 200);
        assert_eq!(bus.open_subscriptions(), 0);
    }

    #[test]
    fn abort_stops_without_draining() {
        let bus = MemoryBus::new();
        let (mut sub, recorder) = open(&bus, "a", 1024);
        for _ in 0..200 {
            bus.publish("a", Envelope::builder("Log").build()).unwrap();
        }
        sub.shutdown(ShutdownMode::Abort);

        assert!(recorder.seen.lock().is_empty());
        assert_eq!(bus.open_subscriptions(), 0);
        assert!(matches!(sub.start(), Err(BusError::Closed)));
    }

    #[test]
    fn full_queue_drops_and_counts() {
        let bus = MemoryBus::new();
        let (_sub, _recorder) = open(&bus, "a", 2);
        for _ in 0..5 {
            bus.publish("a", Envelope::builder("Log").build()).unwrap();
        }
        assert_eq!(bus.published(), 5);
        assert_eq!(bus.dropped(), 3);
    }

    #[test]
    fn outage_fails_open_and_publish() {
        let bus = MemoryBus::new();
        bus.set_available(false);
        assert!(matches!(
            bus.open(SubscriptionSpec::new("a", 1), Vec::new()),
            Err(BusError::Unavailable)
        ));
        assert!(matches!(
            bus.publish("a", Envelope::new()),
            Err(BusError::Unavailable)
        ));

        bus.set_available(true);
        assert!(bus.open(SubscriptionSpec::new("a", 1), Vec::new()).is_ok());
    }

    #[test]
    fn injected_failure_is_per_topic() {
        let bus = MemoryBus::new();
        bus.fail_topic("bad");
        assert!(matches!(
            bus.open(SubscriptionSpec::new("bad", 1), Vec::new()),
            Err(BusError::Subscribe { .. })
        ));
        let _ok = bus.open(SubscriptionSpec::new("good", 1), Vec::new()).unwrap();
        assert_eq!(bus.subscribed_topics(), ["good"]);

        bus.clear_failures();
        assert!(bus.open(SubscriptionSpec::new("bad", 1), Vec::new()).is_ok());
    }

    #[test]
    fn dropping_a_subscription_detaches_it() {
        let bus = MemoryBus::new();
        {
            let (mut sub, _recorder) = open(&bus, "a", 4);
            sub.start().unwrap();
            assert_eq!(bus.open_subscriptions(), 1);
        }
        assert_eq!(bus.open_subscriptions(), 0);
    }
}
