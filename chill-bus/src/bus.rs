//! Collaborator interfaces between the subscription controller and a bus.

use std::sync::Arc;

use crate::{BusError, Envelope};

/// Receives every message delivered on a subscription.
///
/// Called from bus delivery threads, possibly concurrently for different
/// subscriptions, so implementations must not block for long.
pub trait MessageListener: Send + Sync {
    fn on_message(&self, envelope: &Envelope);
}

/// A message listener with a processing lifecycle of its own.
///
/// Both calls are idempotent. `start` after `shutdown` resumes processing.
pub trait Distributor: MessageListener {
    fn start(&self);
    fn shutdown(&self);
}

/// How a subscription stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Deliver everything already queued, then stop.
    Graceful,
    /// Discard the queue and stop immediately.
    Abort,
}

/// What to subscribe to and how deep the inbound queue is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSpec {
    pub topic: String,
    /// Selector filter expression, see [`crate::Filter`].
    pub filter: Option<String>,
    pub queue_depth: usize,
}

impl SubscriptionSpec {
    pub fn new(topic: impl Into<String>, queue_depth: usize) -> Self {
        Self {
            topic: topic.into(),
            filter: None,
            queue_depth,
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        let filter = filter.into();
        self.filter = (!filter.trim().is_empty()).then_some(filter);
        self
    }
}

/// One live bus consumer bound to a topic.
///
/// Messages are queued from the moment the subscription is opened but only
/// reach listeners after `start`.
pub trait Subscription: Send {
    fn topic(&self) -> &str;

    fn start(&mut self) -> Result<(), BusError>;

    /// Stop the consumer and release its resources. Safe to call twice.
    fn shutdown(&mut self, mode: ShutdownMode);
}

/// A message bus the controller can subscribe to and publish on.
pub trait MessageBus: Send + Sync {
    fn open(
        &self,
        spec: SubscriptionSpec,
        listeners: Vec<Arc<dyn MessageListener>>,
    ) -> Result<Box<dyn Subscription>, BusError>;

    fn publish(&self, topic: &str, envelope: Envelope) -> Result<(), BusError>;
}
