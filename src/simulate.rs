//! Synthetic traffic for running the monitor without a real bus.

use std::time::Duration;

use chill_bus::filter::{SESSION_HOST, SESSION_ID};
use chill_bus::{Envelope, MemoryBus, MessageBus};
use chill_types::{TopicClass, UnixMillis};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;

/// Source pid stamped on every synthetic message.
const SIMULATED_PID: u32 = 4021;

/// Message type a publisher would send on a topic of `class`.
fn message_type(class: TopicClass) -> &'static str {
    match class {
        TopicClass::Channel => "EhaChannel",
        TopicClass::Evr => "Evr",
        TopicClass::Product => "ProductMetadata",
        TopicClass::General => "SessionHeartbeat",
    }
}

/// A bus outage to inject: the bus goes down `after` the start and stays
/// down for `length`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outage {
    pub after: Duration,
    pub length: Duration,
}

/// Publishes messages on a fixed set of topics at a fixed rate, stamped the
/// way the session filter expects.
#[derive(Debug, Clone)]
pub struct TrafficGenerator {
    bus: MemoryBus,
    topics: Vec<String>,
    rate: u32,
    session_host: Option<String>,
    session_id: Option<u64>,
}

impl TrafficGenerator {
    /// `rate` is messages per second per topic; zero publishes nothing.
    pub fn new(bus: MemoryBus, topics: Vec<String>, rate: u32) -> Self {
        Self {
            bus,
            topics,
            rate,
            session_host: None,
            session_id: None,
        }
    }

    /// Stamp messages with the session properties from `config`.
    pub fn for_session(mut self, config: &MonitorConfig) -> Self {
        self.session_host = config
            .context
            .session_host
            .clone()
            .filter(|host| !host.is_empty());
        self.session_id = config.context.session_id.filter(|id| *id != 0);
        self
    }

    /// One message for `topic` with the given sequence number.
    pub fn message(&self, topic: &str, sequence: u64) -> Envelope {
        let mut builder = Envelope::builder(message_type(TopicClass::of(topic)))
            .source_pid(SIMULATED_PID)
            .sequence(sequence)
            .publish_time(UnixMillis::now())
            .topic(topic);
        if let Some(host) = &self.session_host {
            builder = builder.property(SESSION_HOST, host);
        }
        if let Some(id) = self.session_id {
            builder = builder.property(SESSION_ID, id);
        }
        builder.build()
    }

    /// Publish one message per topic. Sequence numbers advance even while
    /// the bus is down, so the gap shows up as discards once it is back.
    pub fn tick(&self, sequence: u64) -> usize {
        let mut sent = 0;
        for topic in &self.topics {
            match self.bus.publish(topic, self.message(topic, sequence)) {
                Ok(()) => sent += 1,
                Err(e) => debug!(topic = %topic, error = %e, "synthetic publish failed"),
            }
        }
        sent
    }

    /// Publish until the task is aborted.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            if self.rate == 0 || self.topics.is_empty() {
                return;
            }
            info!(
                topics = self.topics.len(),
                rate = self.rate,
                "publishing synthetic traffic"
            );
            let period = (Duration::from_secs(1) / self.rate).max(Duration::from_micros(1));
            let mut timer = tokio::time::interval(period);
            let mut sequence = 0u64;
            loop {
                timer.tick().await;
                sequence += 1;
                self.tick(sequence);
            }
        })
    }
}

/// Take `bus` down for the outage window.
pub fn schedule_outage(bus: MemoryBus, outage: Outage) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(outage.after).await;
        warn!(length_ms = outage.length.as_millis() as u64, "simulating bus outage");
        bus.set_available(false);
        tokio::time::sleep(outage.length).await;
        bus.set_available(true);
        info!("simulated bus outage over");
    })
}
