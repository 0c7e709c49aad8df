//! End-to-end controller behavior over the in-process bus.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chill_bus::{
    BusError, Envelope, MemoryBus, MessageBus, MessageListener, ShutdownMode, Subscription,
    SubscriptionSpec,
};
use chill_monitor::{ControllerError, MonitorConfig, SubscriptionController};
use chill_types::{ControllerState, TopicNameToken, UnixMillis, VenueType};
use parking_lot::Mutex;

const EHA: &str = "mpcs.msl.testbed.mstb.lv.eha";
const EVR: &str = "mpcs.msl.testbed.mstb.lv.evr";
const PRODUCT: &str = "mpcs.msl.testbed.mstb.lv.product";
const GENERAL: &str = "mpcs.msl.testbed.general";

fn config() -> MonitorConfig {
    let mut config = MonitorConfig::default();
    config.context.venue = VenueType::Testbed;
    config.context.testbed_name = "MSTB".to_string();
    config.context.downlink_stream = Some("LV".to_string());
    config.subscriber.topic_tokens = vec![
        TopicNameToken::ApplicationEha,
        TopicNameToken::ApplicationEvr,
        TopicNameToken::ApplicationProduct,
        TopicNameToken::General,
    ];
    config.heartbeat.interval_ms = 10;
    config
}

fn receiving(bus: &MemoryBus) -> Arc<SubscriptionController> {
    let controller = SubscriptionController::builder(config(), Arc::new(bus.clone())).build();
    controller.create_subscriptions().unwrap();
    controller.start_message_receipt().unwrap();
    controller
}

fn message(message_type: &str, pid: u32, sequence: u64) -> Envelope {
    Envelope::builder(message_type)
        .source_pid(pid)
        .sequence(sequence)
        .publish_time(UnixMillis::now())
        .build()
}

fn wait_for(done: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        if Instant::now() > deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
    true
}

#[test]
fn subscribes_to_every_configured_topic() {
    let bus = MemoryBus::new();
    let controller = receiving(&bus);

    assert_eq!(controller.state(), ControllerState::Receiving);
    assert_eq!(controller.subscribed_topics(), [GENERAL, EHA, EVR, PRODUCT]);
    assert_eq!(bus.open_subscriptions(), 4);

    controller.start_message_receipt().unwrap();
    assert_eq!(bus.open_subscriptions(), 4);
    controller.close_subscriptions();
    assert_eq!(bus.open_subscriptions(), 0);
}

#[test]
fn sequence_gap_is_counted_as_discards() {
    let bus = MemoryBus::new();
    let controller = receiving(&bus);

    for sequence in [1, 2, 5] {
        bus.publish(EVR, message("X", 7, sequence)).unwrap();
    }
    controller.close_subscriptions();

    let subscribers = controller.subscribers();
    let evr = &subscribers[EVR];
    assert_eq!(evr.received, 3);
    assert_eq!(evr.discard_count("X/7"), 2);
    assert!(evr.last_receive.is_some());
}

#[test]
fn malformed_messages_only_bump_the_receipt_count() {
    let bus = MemoryBus::new();
    let controller = receiving(&bus);

    bus.publish(EHA, Envelope::new()).unwrap();
    bus.publish(EHA, Envelope::builder("EhaChannel").source_pid(7).build())
        .unwrap();
    controller.close_subscriptions();

    assert_eq!(controller.receipt_count(), 2);
    assert!(controller.subscribers().values().all(|s| s.received == 0));
}

#[test]
fn reset_counts_starts_from_scratch() {
    let bus = MemoryBus::new();
    let controller = receiving(&bus);

    for sequence in [1, 4] {
        bus.publish(EVR, message("Evr", 7, sequence)).unwrap();
    }
    assert!(wait_for(|| controller.receipt_count() == 2));

    controller.reset_counts();
    assert_eq!(controller.receipt_count(), 0);
    let evr = &controller.subscribers()[EVR];
    assert_eq!(evr.received, 0);
    assert_eq!(evr.total_discards(), 0);

    bus.publish(EVR, message("Evr", 7, 9)).unwrap();
    controller.close_subscriptions();

    assert_eq!(controller.receipt_count(), 1);
    let evr = &controller.subscribers()[EVR];
    assert_eq!(evr.received, 1);
    assert_eq!(evr.total_discards(), 0);
}

#[test]
fn concurrent_publishers_are_all_counted() {
    const PER_TOPIC: u64 = 500;

    let bus = MemoryBus::new();
    let controller = receiving(&bus);

    let publishers: Vec<_> = [EHA, EVR, PRODUCT, GENERAL]
        .into_iter()
        .map(|topic| {
            let bus = bus.clone();
            thread::spawn(move || {
                for sequence in 1..=PER_TOPIC {
                    bus.publish(topic, message("X", 7, sequence)).unwrap();
                }
            })
        })
        .collect();
    for publisher in publishers {
        publisher.join().unwrap();
    }
    controller.close_subscriptions();

    assert_eq!(bus.dropped(), 0);
    assert_eq!(controller.receipt_count(), 4 * PER_TOPIC);
    for status in controller.subscribers().values() {
        assert_eq!(status.received, PER_TOPIC);
        assert_eq!(status.total_discards(), 0);
    }
}

#[test]
fn heartbeat_loss_and_regain_resubscribes() {
    let bus = MemoryBus::new();
    let controller = receiving(&bus);
    let topics = controller.subscribed_topics();

    bus.publish(EVR, message("Evr", 7, 1)).unwrap();
    assert!(wait_for(|| controller.receipt_count() == 1));

    bus.set_available(false);
    assert!(wait_for(|| controller.state() == ControllerState::Uninitialized));
    assert!(controller.subscribed_topics().is_empty());
    assert_eq!(bus.open_subscriptions(), 0);

    bus.set_available(true);
    assert!(wait_for(|| controller.state() == ControllerState::Receiving));
    assert_eq!(controller.subscribed_topics(), topics);
    assert_eq!(bus.open_subscriptions(), topics.len());

    bus.publish(EVR, message("Evr", 7, 2)).unwrap();
    controller.close_subscriptions();

    // Statistics carry across the outage.
    assert_eq!(controller.subscribers()[EVR].received, 2);
    assert!(controller.take_fatal_error().is_none());
}

#[test]
fn failed_resubscribe_is_kept_as_the_fatal_error() {
    let bus = MemoryBus::new();
    let controller = receiving(&bus);

    bus.fail_topic(PRODUCT);
    bus.set_available(false);
    assert!(wait_for(|| controller.state() == ControllerState::Uninitialized));
    bus.set_available(true);

    let deadline = Instant::now() + Duration::from_secs(5);
    let fatal = loop {
        if let Some(e) = controller.take_fatal_error() {
            break e;
        }
        assert!(Instant::now() < deadline, "no fatal error reported");
        thread::sleep(Duration::from_millis(5));
    };

    assert!(matches!(fatal, ControllerError::Subscribe { ref topic, .. } if topic == PRODUCT));
    assert_eq!(controller.state(), ControllerState::Uninitialized);
    controller.close_subscriptions();
}

#[test]
fn close_stops_the_heartbeat() {
    let bus = MemoryBus::new();
    let controller = receiving(&bus);
    assert!(wait_for(|| bus.published() >= 2));

    controller.close_subscriptions();
    thread::sleep(Duration::from_millis(30));
    let published = bus.published();
    thread::sleep(Duration::from_millis(50));

    assert_eq!(bus.published(), published);
    assert_eq!(controller.state(), ControllerState::Uninitialized);
}

#[derive(Default)]
struct Count(AtomicU64);

impl MessageListener for Count {
    fn on_message(&self, _envelope: &Envelope) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn messages_reach_the_domain_distributors() {
    let bus = MemoryBus::new();
    let controller = SubscriptionController::builder(config(), Arc::new(bus.clone())).build();
    let channel_sink = Arc::new(Count::default());
    let evr_listener = Arc::new(Count::default());
    controller.distributors().channel.add_sink(channel_sink.clone());
    controller
        .distributors()
        .general
        .add_listener("Evr", evr_listener.clone());

    controller.create_subscriptions().unwrap();
    controller.start_message_receipt().unwrap();

    bus.publish(EHA, message("EhaChannel", 7, 1)).unwrap();
    bus.publish(EHA, message("EhaChannel", 7, 2)).unwrap();
    bus.publish(EVR, message("Evr", 7, 1)).unwrap();
    bus.publish(GENERAL, message("SessionHeartbeat", 7, 1)).unwrap();
    controller.close_subscriptions();

    assert_eq!(channel_sink.0.load(Ordering::SeqCst), 2);
    assert_eq!(evr_listener.0.load(Ordering::SeqCst), 1);
    let general = &controller.distributors().general;
    assert_eq!(general.count("Evr"), 1);
    assert_eq!(general.count("SessionHeartbeat"), 1);
    assert_eq!(general.count("EhaChannel"), 0);
}

#[test]
fn session_filter_selects_only_this_sessions_traffic() {
    let bus = MemoryBus::new();
    let mut config = config();
    config.context.session_host = Some("gse-1".to_string());
    config.context.session_id = Some(42);
    let controller = SubscriptionController::builder(config, Arc::new(bus.clone())).build();
    controller.create_subscriptions().unwrap();
    controller.start_message_receipt().unwrap();

    let ours = message("Evr", 7, 1)
        .with_property("session_host", "gse-1")
        .with_property("session_id", 42);
    let theirs = message("Evr", 8, 1)
        .with_property("session_host", "gse-2")
        .with_property("session_id", 42);
    bus.publish(EVR, ours).unwrap();
    bus.publish(EVR, theirs).unwrap();
    bus.publish(EVR, message("Evr", 9, 1)).unwrap();
    controller.close_subscriptions();

    assert_eq!(controller.receipt_count(), 1);
}

#[test]
fn closed_controller_can_subscribe_again() {
    let bus = MemoryBus::new();
    let controller = SubscriptionController::builder(config(), Arc::new(bus.clone())).build();
    let channel_sink = Arc::new(Count::default());
    let evr_listener = Arc::new(Count::default());
    controller.distributors().channel.add_sink(channel_sink.clone());
    controller
        .distributors()
        .general
        .add_listener("Evr", evr_listener.clone());

    controller.create_subscriptions().unwrap();
    controller.start_message_receipt().unwrap();
    controller.close_subscriptions();
    assert!(!controller.distributors().channel.is_running());

    controller.create_subscriptions().unwrap();
    controller.start_message_receipt().unwrap();
    assert_eq!(controller.state(), ControllerState::Receiving);
    assert!(controller.distributors().channel.is_running());

    bus.publish(EHA, message("EhaChannel", 7, 1)).unwrap();
    bus.publish(EVR, message("Evr", 7, 1)).unwrap();
    controller.close_subscriptions();

    assert_eq!(controller.receipt_count(), 2);
    assert_eq!(channel_sink.0.load(Ordering::SeqCst), 1);
    assert_eq!(evr_listener.0.load(Ordering::SeqCst), 1);
}

type Shutdowns = Arc<Mutex<Vec<(String, ShutdownMode)>>>;

/// A memory bus that records how each subscription is shut down, and can
/// refuse to start one topic.
struct RecordingBus {
    inner: MemoryBus,
    shutdowns: Shutdowns,
    fail_start: Option<&'static str>,
}

struct RecordingSubscription {
    inner: Box<dyn Subscription>,
    shutdowns: Shutdowns,
    fail_start: bool,
}

impl Subscription for RecordingSubscription {
    fn topic(&self) -> &str {
        self.inner.topic()
    }

    fn start(&mut self) -> Result<(), BusError> {
        if self.fail_start {
            return Err(BusError::Unavailable);
        }
        self.inner.start()
    }

    fn shutdown(&mut self, mode: ShutdownMode) {
        self.shutdowns
            .lock()
            .push((self.inner.topic().to_string(), mode));
        self.inner.shutdown(mode);
    }
}

impl MessageBus for RecordingBus {
    fn open(
        &self,
        spec: SubscriptionSpec,
        listeners: Vec<Arc<dyn MessageListener>>,
    ) -> Result<Box<dyn Subscription>, BusError> {
        let fail_start = self.fail_start == Some(spec.topic.as_str());
        let inner = self.inner.open(spec, listeners)?;
        Ok(Box::new(RecordingSubscription {
            inner,
            shutdowns: self.shutdowns.clone(),
            fail_start,
        }))
    }

    fn publish(&self, topic: &str, envelope: Envelope) -> Result<(), BusError> {
        self.inner.publish(topic, envelope)
    }
}

fn recording(fail_start: Option<&'static str>) -> (MemoryBus, Shutdowns, Arc<SubscriptionController>) {
    let bus = MemoryBus::new();
    let shutdowns = Shutdowns::default();
    let recording = RecordingBus {
        inner: bus.clone(),
        shutdowns: shutdowns.clone(),
        fail_start,
    };
    let controller = SubscriptionController::builder(config(), Arc::new(recording)).build();
    (bus, shutdowns, controller)
}

fn modes(shutdowns: &Shutdowns) -> Vec<ShutdownMode> {
    shutdowns.lock().drain(..).map(|(_, mode)| mode).collect()
}

#[test]
fn heartbeat_loss_aborts_and_close_drains() {
    let (_bus, shutdowns, controller) = recording(None);
    controller.create_subscriptions().unwrap();
    controller.start_message_receipt().unwrap();

    controller.on_heartbeat_lost();
    assert_eq!(modes(&shutdowns), [ShutdownMode::Abort; 4]);

    controller.on_heartbeat_regained();
    assert_eq!(controller.state(), ControllerState::Receiving);
    assert!(controller.take_fatal_error().is_none());

    controller.close_subscriptions();
    assert_eq!(modes(&shutdowns), [ShutdownMode::Graceful; 4]);
}

#[test]
fn failed_start_aborts_every_subscription() {
    let (bus, shutdowns, controller) = recording(Some(PRODUCT));
    controller.create_subscriptions().unwrap();

    let err = controller.start_message_receipt().unwrap_err();
    assert!(matches!(err, ControllerError::Start { ref topic, .. } if topic == PRODUCT));
    assert_eq!(controller.state(), ControllerState::Uninitialized);
    assert!(controller.subscribed_topics().is_empty());
    assert_eq!(bus.open_subscriptions(), 0);
    assert_eq!(modes(&shutdowns), [ShutdownMode::Abort; 4]);
    assert!(!controller.distributors().channel.is_running());

    controller.close_subscriptions();
    assert!(modes(&shutdowns).is_empty());
}
