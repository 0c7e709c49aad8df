//! Per-topic receive statistics as seen by status consumers.

use std::collections::BTreeMap;

use crate::UnixMillis;

/// Separator between message type and source process id in discard keys.
pub const DISCARD_KEY_SEPARATOR: char = '/';

/// Build the discard-table key for a message type and source process.
///
/// Same-typed messages from different publishing processes are counted
/// separately, so the key carries both.
pub fn discard_key(message_type: &str, source_pid: u32) -> String {
    format!("{message_type}{DISCARD_KEY_SEPARATOR}{source_pid}")
}

/// Receive statistics for one subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "minicbor", derive(minicbor::Encode, minicbor::Decode))]
pub struct SubscriberStatus {
    /// Messages received on the topic.
    #[cfg_attr(feature = "minicbor", n(0))]
    pub received: u64,

    /// Wall time of the most recent receive.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    #[cfg_attr(feature = "minicbor", n(1))]
    pub last_receive: Option<UnixMillis>,

    /// Receive time minus publish time of the most recent message.
    #[cfg_attr(feature = "minicbor", n(2))]
    pub last_lag_ms: u64,

    /// Messages known to be lost upstream, keyed by `"<type>/<pid>"`.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "BTreeMap::is_empty"))]
    #[cfg_attr(feature = "minicbor", n(3))]
    pub discards: BTreeMap<String, u64>,
}

impl SubscriberStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> SubscriberStatusBuilder {
        SubscriberStatusBuilder::new()
    }

    /// Discard count for one `"<type>/<pid>"` key, zero when absent.
    pub fn discard_count(&self, key: &str) -> u64 {
        self.discards.get(key).copied().unwrap_or(0)
    }

    pub fn total_discards(&self) -> u64 {
        self.discards.values().sum()
    }

    /// Discard counts folded by message type across source processes.
    pub fn discards_by_type(&self) -> BTreeMap<&str, u64> {
        let mut by_type = BTreeMap::new();
        for (key, count) in &self.discards {
            let message_type = key
                .split_once(DISCARD_KEY_SEPARATOR)
                .map_or(key.as_str(), |(t, _)| t);
            *by_type.entry(message_type).or_insert(0) += count;
        }
        by_type
    }

    /// True if the last message arrived later than `max_lag_ms` after it was
    /// published.
    pub fn is_lagging(&self, max_lag_ms: u64) -> bool {
        self.last_lag_ms > max_lag_ms
    }
}

/// Builder for `SubscriberStatus`.
#[derive(Debug, Default)]
pub struct SubscriberStatusBuilder {
    status: SubscriberStatus,
}

impl SubscriberStatusBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn received(mut self, count: u64) -> Self {
        self.status.received = count;
        self
    }

    pub fn last_receive(mut self, at: UnixMillis) -> Self {
        self.status.last_receive = Some(at);
        self
    }

    pub fn last_lag_ms(mut self, lag: u64) -> Self {
        self.status.last_lag_ms = lag;
        self
    }

    /// Set the discard count for a `"<type>/<pid>"` key.
    pub fn discard(mut self, key: impl Into<String>, count: u64) -> Self {
        self.status.discards.insert(key.into(), count);
        self
    }

    pub fn build(self) -> SubscriberStatus {
        self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discard_key_joins_type_and_pid() {
        assert_eq!(discard_key("Evr", 7), "Evr/7");
    }

    #[test]
    fn discard_count_defaults_to_zero() {
        let status = SubscriberStatus::builder().discard("Evr/7", 3).build();
        assert_eq!(status.discard_count("Evr/7"), 3);
        assert_eq!(status.discard_count("Evr/8"), 0);
    }

    #[test]
    fn discards_by_type_folds_source_processes() {
        let status = SubscriberStatus::builder()
            .discard("Evr/7", 3)
            .discard("Evr/9", 1)
            .discard("AlarmedEhaChannel/7", 4)
            .build();

        let by_type = status.discards_by_type();
        assert_eq!(by_type.get("Evr"), Some(&4));
        assert_eq!(by_type.get("AlarmedEhaChannel"), Some(&4));
        assert_eq!(status.total_discards(), 8);
    }

    #[test]
    fn lagging_threshold_is_exclusive() {
        let status = SubscriberStatus::builder().last_lag_ms(45_000).build();
        assert!(!status.is_lagging(45_000));
        assert!(status.is_lagging(44_999));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn empty_discards_are_omitted_from_json() {
        let status = SubscriberStatus::builder().received(4).build();
        let json = serde_json::to_string(&status).unwrap();
        assert!(!json.contains("discards"));
        assert!(!json.contains("last_receive"));

        let parsed: SubscriberStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, status);
    }
}
