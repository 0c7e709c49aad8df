//! Effective subscription topic set for a session.

use std::collections::BTreeSet;

use chill_types::topic::{is_data_topic, is_sse_topic, TopicNameToken, DELIMITER};
use tracing::debug;

use crate::config::MonitorConfig;

/// Compute the sorted, de-duplicated topics a session subscribes to.
///
/// An explicit `context.subscription_topics` list wins. Each root in it is
/// kept and expanded into the data topics the mission produces; data topics in
/// the list are taken as they are. Without a list, `subscriber.topic_tokens`
/// are resolved against the session context.
pub fn resolve_topics(config: &MonitorConfig) -> Vec<String> {
    let topics = if config.context.subscription_topics.is_empty() {
        from_tokens(config)
    } else {
        from_override_list(config)
    };
    debug!(count = topics.len(), "resolved subscription topics");
    topics.into_iter().collect()
}

fn from_override_list(config: &MonitorConfig) -> BTreeSet<String> {
    let mission = &config.context.mission;
    let flags = &config.mission;
    let mut topics = BTreeSet::new();

    for root in &config.context.subscription_topics {
        topics.insert(root.clone());
        if is_data_topic(root) {
            continue;
        }

        let mut components = vec!["eha"];
        if is_sse_topic(root, mission) {
            if !config.sse_supported() {
                continue;
            }
            if flags.enable_evr {
                components.push("evr");
            }
            if flags.enable_uplink {
                components.push("cmd");
            }
            components.extend(["packet", "alarm"]);
        } else {
            if flags.enable_evr {
                components.push("evr");
            }
            if flags.enable_product {
                components.push("product");
            }
            if flags.enable_uplink {
                components.push("cmd");
            }
        }

        topics.extend(
            components
                .into_iter()
                .map(|component| format!("{root}{DELIMITER}{component}")),
        );
    }
    topics
}

fn from_tokens(config: &MonitorConfig) -> BTreeSet<String> {
    let context = config.topic_context();
    let skip_sse = config.context.venue.is_ops_venue() && !config.sse_supported();

    config
        .subscriber
        .topic_tokens
        .iter()
        .copied()
        .filter(|token| !(skip_sse && token.is_sse()))
        .filter_map(|token: TopicNameToken| context.topic_for(token))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chill_types::VenueType;

    fn testbed() -> MonitorConfig {
        let mut config = MonitorConfig::default();
        config.context.venue = VenueType::Testbed;
        config.context.testbed_name = "mstb".to_string();
        config.context.downlink_stream = Some("lv".to_string());
        config
    }

    #[test]
    fn override_root_expands_by_mission_flags() {
        let mut config = testbed();
        config.context.subscription_topics = vec!["mpcs.msl.testbed.mstb.lv".to_string()];
        config.mission.enable_product = false;

        assert_eq!(
            resolve_topics(&config),
            [
                "mpcs.msl.testbed.mstb.lv",
                "mpcs.msl.testbed.mstb.lv.eha",
                "mpcs.msl.testbed.mstb.lv.evr",
            ]
        );

        config.mission.enable_uplink = true;
        assert!(resolve_topics(&config).contains(&"mpcs.msl.testbed.mstb.lv.cmd".to_string()));
    }

    #[test]
    fn override_data_topic_is_not_expanded() {
        let mut config = testbed();
        config.context.subscription_topics = vec!["mpcs.msl.testbed.mstb.lv.evr".to_string()];
        assert_eq!(resolve_topics(&config), ["mpcs.msl.testbed.mstb.lv.evr"]);
    }

    #[test]
    fn override_sse_root_needs_sse_support() {
        let mut config = testbed();
        config.context.subscription_topics = vec!["mpcs.mslsse.testbed.mstb".to_string()];
        assert_eq!(resolve_topics(&config), ["mpcs.mslsse.testbed.mstb"]);

        config.mission.has_sse = true;
        let topics = resolve_topics(&config);
        assert!(topics.contains(&"mpcs.mslsse.testbed.mstb.eha".to_string()));
        assert!(topics.contains(&"mpcs.mslsse.testbed.mstb.alarm".to_string()));
        assert!(!topics.iter().any(|t| t.ends_with(".product")));
    }

    #[test]
    fn tokens_resolve_against_context() {
        let mut config = testbed();
        config.subscriber.topic_tokens = vec![
            TopicNameToken::ApplicationEha,
            TopicNameToken::ApplicationEvr,
            TopicNameToken::General,
            TopicNameToken::ApplicationEha,
        ];
        assert_eq!(
            resolve_topics(&config),
            [
                "mpcs.msl.testbed.general",
                "mpcs.msl.testbed.mstb.lv.eha",
                "mpcs.msl.testbed.mstb.lv.evr",
            ]
        );
    }

    #[test]
    fn ops_venue_without_sse_skips_sse_tokens() {
        let mut config = MonitorConfig::default();
        config.context.venue = VenueType::Ops;
        config.context.subtopic = Some("ops1".to_string());
        config.subscriber.topic_tokens =
            vec![TopicNameToken::ApplicationEha, TopicNameToken::ApplicationSseEha];

        assert_eq!(resolve_topics(&config), ["mpcs.msl.ops.ops1.eha"]);

        config.mission.has_sse = true;
        assert_eq!(
            resolve_topics(&config),
            ["mpcs.msl.ops.ops1.eha", "mpcs.mslsse.ops.ops1.eha"]
        );
    }

    #[test]
    fn empty_configuration_resolves_nothing() {
        assert!(resolve_topics(&MonitorConfig::default()).is_empty());
    }
}
