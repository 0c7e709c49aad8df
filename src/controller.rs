//! The subscription controller.
//!
//! Owns the bus subscriptions of one monitoring session and keeps message
//! flow alive across bus outages:
//!
//! ```text
//! Uninitialized --create--> Subscribed --start--> Receiving
//!       ^                                             |
//!       +-------------- heartbeat lost ---------------+
//!       +---- heartbeat regained (create + start) ---->
//! ```
//!
//! Lifecycle operations and heartbeat callbacks are serialized by one mutex.
//! Message receipt never takes it: each subscription delivers straight into
//! the [`ReceiptTracker`], whose per-topic statistics are independent.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Weak};

use chill_bus::{
    BusError, BusHeartbeat, Envelope, HeartbeatListener, HeartbeatPublisher, MessageBus,
    MessageListener, ShutdownMode, Subscription, SubscriptionSpec,
};
use chill_types::topic::{check_topic, TopicClass, TopicError};
use chill_types::{ControllerState, StatusSnapshot, SubscriberStatus};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::MonitorConfig;
use crate::distributor::Distributors;
use crate::stats::ReceiptTracker;
use crate::topics::resolve_topics;

/// Errors from controller lifecycle operations.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Neither subscription topics nor topic tokens produced a topic.
    #[error("No subscription topics are configured")]
    NoTopics,

    /// Message receipt was started before subscriptions were created.
    #[error("Subscriptions have not been created")]
    NotSubscribed,

    #[error("Failed to subscribe to {topic}: {source}")]
    Subscribe {
        topic: String,
        #[source]
        source: BusError,
    },

    #[error("Failed to start message receipt on {topic}: {source}")]
    Start {
        topic: String,
        #[source]
        source: BusError,
    },

    #[error("Invalid subscription topic: {0}")]
    Topic(#[from] TopicError),
}

#[derive(Default)]
struct Lifecycle {
    state: ControllerState,
    subscriptions: BTreeMap<String, Box<dyn Subscription>>,
    listening: bool,
    heartbeat_started: bool,
}

/// What readers see without taking the lifecycle lock.
#[derive(Debug, Default)]
struct View {
    state: ControllerState,
    topics: BTreeSet<String>,
}

/// Manages the bus subscriptions of one monitoring session.
///
/// Always handled through an `Arc`, since the controller registers itself
/// with the heartbeat publisher.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use chill_bus::MemoryBus;
/// use chill_monitor::{MonitorConfig, SubscriptionController};
/// use chill_types::{ControllerState, TopicNameToken};
///
/// let mut config = MonitorConfig::default();
/// config.subscriber.topic_tokens = vec![TopicNameToken::ApplicationEha];
///
/// let controller = SubscriptionController::builder(config, Arc::new(MemoryBus::new())).build();
/// controller.create_subscriptions().unwrap();
/// controller.start_message_receipt().unwrap();
/// assert_eq!(controller.state(), ControllerState::Receiving);
///
/// controller.close_subscriptions();
/// assert_eq!(controller.state(), ControllerState::Uninitialized);
/// ```
pub struct SubscriptionController {
    me: Weak<SubscriptionController>,
    config: MonitorConfig,
    bus: Arc<dyn MessageBus>,
    heartbeat: Arc<dyn HeartbeatPublisher>,
    distributors: Distributors,
    tracker: Arc<ReceiptTracker>,
    lifecycle: Mutex<Lifecycle>,
    view: RwLock<View>,
    fatal: Mutex<Option<ControllerError>>,
}

impl SubscriptionController {
    pub fn builder(config: MonitorConfig, bus: Arc<dyn MessageBus>) -> ControllerBuilder {
        ControllerBuilder::new(config, bus)
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn distributors(&self) -> &Distributors {
        &self.distributors
    }

    pub fn tracker(&self) -> &Arc<ReceiptTracker> {
        &self.tracker
    }

    /// Open a subscription for every configured topic not yet subscribed.
    ///
    /// Does nothing once subscribed. The first call also registers for and
    /// starts heartbeats. If any subscription fails to open, those opened by
    /// this call are aborted and the controller stays uninitialized.
    pub fn create_subscriptions(&self) -> Result<(), ControllerError> {
        let mut lifecycle = self.lifecycle.lock();
        let result = self.create_locked(&mut lifecycle);
        self.publish_view(&lifecycle);
        result
    }

    /// Start delivery on every open subscription.
    ///
    /// Fails without starting anything unless subscriptions were created.
    /// Does nothing when already receiving. If any subscription fails to
    /// start, all of them are aborted and the controller is uninitialized.
    pub fn start_message_receipt(&self) -> Result<(), ControllerError> {
        let mut lifecycle = self.lifecycle.lock();
        let result = self.start_locked(&mut lifecycle);
        self.publish_view(&lifecycle);
        result
    }

    /// Stop heartbeats, drain and close every subscription, and shut down
    /// the distributors.
    pub fn close_subscriptions(&self) {
        let mut lifecycle = self.lifecycle.lock();

        self.heartbeat.stop_publishing();
        lifecycle.heartbeat_started = false;

        let subscriptions = std::mem::take(&mut lifecycle.subscriptions);
        let count = subscriptions.len();
        for (topic, mut subscription) in subscriptions {
            subscription.shutdown(ShutdownMode::Graceful);
            self.log_discards(&topic);
        }
        lifecycle.state = ControllerState::Uninitialized;
        self.publish_view(&lifecycle);

        self.distributors.shutdown();
        info!(count, "subscriptions closed");
    }

    /// Abort every subscription without draining. The heartbeat publisher
    /// keeps running so it can report when the bus comes back.
    pub fn on_heartbeat_lost(&self) {
        let mut lifecycle = self.lifecycle.lock();
        warn!(
            count = lifecycle.subscriptions.len(),
            "message bus heartbeat lost, aborting subscriptions"
        );
        self.abort_all(&mut lifecycle);
        self.publish_view(&lifecycle);
    }

    /// Re-create and restart subscriptions in one step.
    ///
    /// A failure here has no caller to return to; it is logged and kept for
    /// [`take_fatal_error`](Self::take_fatal_error).
    pub fn on_heartbeat_regained(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if !lifecycle.heartbeat_started {
            debug!("ignoring heartbeat regained after close");
            return;
        }
        info!("message bus heartbeat regained, resubscribing");

        let result = self
            .create_locked(&mut lifecycle)
            .and_then(|()| self.start_locked(&mut lifecycle));
        self.publish_view(&lifecycle);

        if let Err(e) = result {
            error!(error = %e, "failed to resubscribe after heartbeat regained");
            *self.fatal.lock() = Some(e);
        }
    }

    /// Count and fold one inbound message into its topic's statistics.
    ///
    /// Never fails: unreadable messages are counted and dropped.
    pub fn on_message(&self, envelope: &Envelope) {
        self.tracker.on_message(envelope);
    }

    /// Per-topic statistics.
    ///
    /// Statistics outlive the subscriptions they were collected on, so counts
    /// carry across a heartbeat outage.
    pub fn subscribers(&self) -> BTreeMap<String, SubscriberStatus> {
        self.tracker.statuses()
    }

    /// Topics with an open subscription.
    pub fn subscribed_topics(&self) -> Vec<String> {
        self.view.read().topics.iter().cloned().collect()
    }

    /// Messages seen across all topics, readable or not.
    pub fn receipt_count(&self) -> u64 {
        self.tracker.receipt_count()
    }

    /// Zero the receipt count and every topic's statistics.
    pub fn reset_counts(&self) {
        self.tracker.reset();
        info!("receive counts reset");
    }

    pub fn state(&self) -> ControllerState {
        self.view.read().state
    }

    pub fn status(&self) -> StatusSnapshot {
        let state = self.state();
        self.tracker
            .statuses()
            .into_iter()
            .fold(
                StatusSnapshot::builder()
                    .state(state)
                    .receipt_count(self.receipt_count()),
                |builder, (topic, status)| builder.subscriber_status(topic, status),
            )
            .build()
    }

    /// The failure of the last heartbeat-triggered resubscribe, if any.
    pub fn take_fatal_error(&self) -> Option<ControllerError> {
        self.fatal.lock().take()
    }

    fn create_locked(&self, lifecycle: &mut Lifecycle) -> Result<(), ControllerError> {
        if lifecycle.state.is_subscribed() {
            debug!(state = %lifecycle.state, "subscriptions already created");
            return Ok(());
        }

        if !lifecycle.listening {
            let me: Weak<dyn HeartbeatListener> = self.me.clone();
            self.heartbeat.add_listener(me);
            lifecycle.listening = true;
        }
        if !lifecycle.heartbeat_started {
            lifecycle.heartbeat_started = true;
            if !self.heartbeat.start_publishing() {
                warn!("message bus did not accept the first heartbeat");
            }
        }

        for topic in &self.config.context.subscription_topics {
            check_topic(topic, false)?;
        }
        let topics = resolve_topics(&self.config);
        if topics.is_empty() {
            error!("no subscription topics configured");
            return Err(ControllerError::NoTopics);
        }

        let filter = self.config.session_filter().to_string();
        let mut opened = Vec::new();
        for topic in topics {
            if lifecycle.subscriptions.contains_key(&topic) {
                continue;
            }

            let depth = self.config.subscriber.queue_depth(TopicClass::of(&topic));
            let spec = SubscriptionSpec::new(topic.as_str(), depth).with_filter(filter.as_str());
            let mut listeners = self.distributors.for_topic(&topic);
            let tracker: Arc<dyn MessageListener> = self.tracker.clone();
            listeners.push(tracker);

            match self.bus.open(spec, listeners) {
                Ok(subscription) => {
                    debug!(topic = %topic, queue_depth = depth, "subscribed");
                    self.tracker.track(&topic);
                    lifecycle.subscriptions.insert(topic.clone(), subscription);
                    opened.push(topic);
                }
                Err(source) => {
                    error!(topic = %topic, error = %source, "failed to subscribe");
                    for topic in opened {
                        if let Some(mut subscription) = lifecycle.subscriptions.remove(&topic) {
                            subscription.shutdown(ShutdownMode::Abort);
                        }
                    }
                    return Err(ControllerError::Subscribe { topic, source });
                }
            }
        }

        lifecycle.state = ControllerState::Subscribed;
        info!(
            count = lifecycle.subscriptions.len(),
            filter = %filter,
            "subscriptions created"
        );
        Ok(())
    }

    fn start_locked(&self, lifecycle: &mut Lifecycle) -> Result<(), ControllerError> {
        match lifecycle.state {
            ControllerState::Uninitialized => {
                error!("message receipt started before subscriptions were created");
                return Err(ControllerError::NotSubscribed);
            }
            ControllerState::Receiving => return Ok(()),
            ControllerState::Subscribed => {}
        }

        let mut failed = None;
        for (topic, subscription) in lifecycle.subscriptions.iter_mut() {
            if let Err(source) = subscription.start() {
                failed = Some(ControllerError::Start {
                    topic: topic.clone(),
                    source,
                });
                break;
            }
        }
        if let Some(e) = failed {
            error!(error = %e, "aborting partially started subscriptions");
            self.abort_all(lifecycle);
            return Err(e);
        }
        self.distributors.start();

        lifecycle.state = ControllerState::Receiving;
        info!(count = lifecycle.subscriptions.len(), "message receipt started");
        Ok(())
    }

    fn abort_all(&self, lifecycle: &mut Lifecycle) {
        for (_, mut subscription) in std::mem::take(&mut lifecycle.subscriptions) {
            subscription.shutdown(ShutdownMode::Abort);
        }
        lifecycle.state = ControllerState::Uninitialized;
    }

    fn publish_view(&self, lifecycle: &Lifecycle) {
        let mut view = self.view.write();
        view.state = lifecycle.state;
        view.topics = lifecycle.subscriptions.keys().cloned().collect();
    }

    fn log_discards(&self, topic: &str) {
        let Some(stats) = self.tracker.get(topic) else {
            return;
        };
        let status = stats.status();
        for (key, discards) in status.discards.iter().filter(|(_, d)| **d > 0) {
            info!(topic, key = %key, discards, "messages discarded upstream");
        }
        debug!(topic, received = status.received, "subscriber closed");
    }
}

impl HeartbeatListener for SubscriptionController {
    fn heartbeat_lost(&self) {
        self.on_heartbeat_lost();
    }

    fn heartbeat_regained(&self) {
        self.on_heartbeat_regained();
    }
}

impl MessageListener for SubscriptionController {
    fn on_message(&self, envelope: &Envelope) {
        SubscriptionController::on_message(self, envelope);
    }
}

/// Builder for [`SubscriptionController`].
pub struct ControllerBuilder {
    config: MonitorConfig,
    bus: Arc<dyn MessageBus>,
    heartbeat: Option<Arc<dyn HeartbeatPublisher>>,
    distributors: Option<Distributors>,
}

impl ControllerBuilder {
    pub fn new(config: MonitorConfig, bus: Arc<dyn MessageBus>) -> Self {
        Self {
            config,
            bus,
            heartbeat: None,
            distributors: None,
        }
    }

    /// Use this heartbeat publisher instead of a [`BusHeartbeat`] on the
    /// client topic.
    pub fn heartbeat(mut self, heartbeat: Arc<dyn HeartbeatPublisher>) -> Self {
        self.heartbeat = Some(heartbeat);
        self
    }

    pub fn distributors(mut self, distributors: Distributors) -> Self {
        self.distributors = Some(distributors);
        self
    }

    pub fn build(self) -> Arc<SubscriptionController> {
        let config = self.config;
        let bus = self.bus;
        let heartbeat = self.heartbeat.unwrap_or_else(|| {
            Arc::new(BusHeartbeat::with_interval(
                bus.clone(),
                config.topic_context().client_topic(),
                config.heartbeat.interval(),
            ))
        });
        let distributors = self
            .distributors
            .unwrap_or_else(|| Distributors::new(config.subscriber.channel_queue_size));

        Arc::new_cyclic(|me| SubscriptionController {
            me: me.clone(),
            config,
            bus,
            heartbeat,
            distributors,
            tracker: Arc::new(ReceiptTracker::new()),
            lifecycle: Mutex::new(Lifecycle::default()),
            view: RwLock::new(View::default()),
            fatal: Mutex::new(None),
        })
    }
}
