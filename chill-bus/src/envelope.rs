//! Inbound message envelope.

use std::collections::BTreeMap;
use std::str::FromStr;

use chill_types::UnixMillis;
use serde::{Deserialize, Serialize};

use crate::BusError;

/// Property naming the message type, e.g. `EhaChannel`.
pub const MESSAGE_TYPE: &str = "message_type";
/// Property carrying the publishing process id.
pub const SOURCE_PID: &str = "source_pid";
/// Property carrying the publisher's per-type sequence number.
pub const SEQUENCE: &str = "sequence";
/// Property carrying the publish time in milliseconds since the epoch.
pub const PUBLISH_TIME: &str = "publish_time";

/// A message as delivered by the bus: header properties plus an opaque body.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Envelope {
    /// Topic the message arrived on. Stamped by the bus on publish.
    #[serde(default)]
    pub topic: String,

    #[serde(default)]
    pub properties: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub body: Vec<u8>,
}

impl Envelope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a fully-stamped telemetry envelope.
    pub fn builder(message_type: impl Into<String>) -> EnvelopeBuilder {
        EnvelopeBuilder::new(message_type)
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.properties.insert(name.into(), value.to_string());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    pub fn message_type(&self) -> Result<&str, BusError> {
        self.property(MESSAGE_TYPE)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| BusError::Malformed(format!("missing {MESSAGE_TYPE} property")))
    }

    pub fn source_pid(&self) -> Result<u32, BusError> {
        self.parsed(SOURCE_PID)
    }

    pub fn sequence(&self) -> Result<u64, BusError> {
        self.parsed(SEQUENCE)
    }

    pub fn publish_time_ms(&self) -> Result<u64, BusError> {
        self.parsed(PUBLISH_TIME)
    }

    pub fn publish_time(&self) -> Result<UnixMillis, BusError> {
        self.publish_time_ms().map(UnixMillis::from_millis)
    }

    fn parsed<T: FromStr>(&self, name: &str) -> Result<T, BusError> {
        let raw = self
            .property(name)
            .ok_or_else(|| BusError::Malformed(format!("missing {name} property")))?;
        raw.trim()
            .parse()
            .map_err(|_| BusError::Malformed(format!("bad {name} property {raw:?}")))
    }
}

/// Builder for telemetry envelopes with the standard header properties.
#[derive(Debug)]
pub struct EnvelopeBuilder {
    envelope: Envelope,
}

impl EnvelopeBuilder {
    fn new(message_type: impl Into<String>) -> Self {
        let envelope = Envelope::new().with_property(MESSAGE_TYPE, message_type.into());
        Self { envelope }
    }

    pub fn source_pid(mut self, pid: u32) -> Self {
        self.envelope = self.envelope.with_property(SOURCE_PID, pid);
        self
    }

    pub fn sequence(mut self, sequence: u64) -> Self {
        self.envelope = self.envelope.with_property(SEQUENCE, sequence);
        self
    }

    pub fn publish_time(mut self, at: UnixMillis) -> Self {
        self.envelope = self.envelope.with_property(PUBLISH_TIME, at.as_millis());
        self
    }

    pub fn property(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.envelope = self.envelope.with_property(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.envelope.body = body.into();
        self
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.envelope.topic = topic.into();
        self
    }

    pub fn build(self) -> Envelope {
        self.envelope
    }
}
