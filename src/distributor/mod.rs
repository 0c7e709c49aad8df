//! Distributors: where inbound messages go after the bus delivers them.
//!
//! Every subscription gets one domain distributor chosen by its topic class
//! (channel telemetry or general), plus the capture distributor.

mod capture;
mod channel;
mod general;

use std::sync::Arc;

pub use capture::CaptureDistributor;
pub use channel::ChannelDistributor;
pub use general::GeneralDistributor;

use chill_bus::{Distributor, MessageListener};
use chill_types::TopicClass;

/// The distributors shared by all of a controller's subscriptions.
#[derive(Clone)]
pub struct Distributors {
    pub general: Arc<GeneralDistributor>,
    pub channel: Arc<ChannelDistributor>,
    pub capture: Arc<CaptureDistributor>,
}

impl Distributors {
    pub fn new(channel_queue_size: usize) -> Self {
        Self {
            general: Arc::new(GeneralDistributor::new()),
            channel: Arc::new(ChannelDistributor::new(channel_queue_size)),
            capture: Arc::new(CaptureDistributor::disabled()),
        }
    }

    pub fn with_capture(mut self, capture: CaptureDistributor) -> Self {
        self.capture = Arc::new(capture);
        self
    }

    /// Listeners for a subscription on `topic`.
    pub fn for_topic(&self, topic: &str) -> Vec<Arc<dyn MessageListener>> {
        let domain: Arc<dyn MessageListener> = match TopicClass::of(topic) {
            TopicClass::Channel => self.channel.clone(),
            TopicClass::Evr | TopicClass::Product | TopicClass::General => self.general.clone(),
        };
        let capture: Arc<dyn MessageListener> = self.capture.clone();
        vec![domain, capture]
    }

    /// Start every distributor, including ones shut down by an earlier close.
    pub fn start(&self) {
        self.capture.start();
        self.general.start();
        self.channel.start();
    }

    pub fn shutdown(&self) {
        self.capture.shutdown();
        self.general.shutdown();
        self.channel.shutdown();
    }
}

impl Default for Distributors {
    fn default() -> Self {
        Self::new(ChannelDistributor::DEFAULT_QUEUE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chill_bus::Envelope;

    #[test]
    fn channel_topics_route_to_the_channel_distributor() {
        let distributors = Distributors::new(16);
        for listener in distributors.for_topic("mpcs.msl.testbed.mstb.lv.alarm") {
            listener.on_message(&Envelope::builder("AlarmedEhaChannel").build());
        }
        for listener in distributors.for_topic("mpcs.msl.testbed.mstb.lv.evr") {
            listener.on_message(&Envelope::builder("Evr").build());
        }

        assert_eq!(distributors.channel.queued(), 1);
        assert_eq!(distributors.general.count("Evr"), 1);
        assert_eq!(distributors.general.count("AlarmedEhaChannel"), 0);
    }

    #[test]
    fn every_topic_is_captured() {
        let distributors = Distributors::default();
        assert_eq!(distributors.for_topic("mpcs.msl.testbed.general").len(), 2);
    }
}
