//! Session configuration.
//!
//! A `MonitorConfig` is read from an optional TOML file and overlaid with
//! `CHILL__`-prefixed environment variables, `__` separating sections from
//! keys:
//!
//! ```bash
//! CHILL__CONTEXT__VENUE=ops CHILL__CONTEXT__SUBTOPIC=ops1 chill-monitor --config session.toml
//! ```

use std::path::Path;
use std::time::Duration;

use chill_bus::Filter;
use chill_types::topic::{check_topic, TopicClass, TopicContext, TopicError, TopicNameToken, VenueType};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "CHILL";

const ENV_SEPARATOR: &str = "__";

/// Errors loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Invalid subscription topic: {0}")]
    Topic(#[from] TopicError),
}

/// Complete configuration of a monitoring session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub context: ContextConfig,
    pub mission: MissionConfig,
    pub subscriber: SubscriberConfig,
    pub heartbeat: HeartbeatConfig,
}

/// Who and where this session is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub mission: String,
    pub venue: VenueType,
    pub testbed_name: String,
    pub downlink_stream: Option<String>,
    pub subtopic: Option<String>,
    pub venue_id: Option<String>,
    pub host: String,
    pub user: String,
    /// This application processes SSE rather than flight data.
    pub application_sse: bool,
    pub session_host: Option<String>,
    pub session_id: Option<u64>,
    /// Explicit root topics. Overrides `subscriber.topic_tokens` when set.
    pub subscription_topics: Vec<String>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            mission: "msl".to_string(),
            venue: VenueType::Testset,
            testbed_name: String::new(),
            downlink_stream: None,
            subtopic: None,
            venue_id: None,
            host: "localhost".to_string(),
            user: "monitor".to_string(),
            application_sse: false,
            session_host: None,
            session_id: None,
            subscription_topics: Vec::new(),
        }
    }
}

/// Mission capabilities that shape the topic set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MissionConfig {
    pub has_sse: bool,
    pub enable_evr: bool,
    pub enable_product: bool,
    pub enable_uplink: bool,
    pub default_subtopic: Option<String>,
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            has_sse: false,
            enable_evr: true,
            enable_product: true,
            enable_uplink: false,
            default_subtopic: None,
        }
    }
}

/// Subscription topics and inbound queue depths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriberConfig {
    pub topic_tokens: Vec<TopicNameToken>,
    pub channel_queue_size: usize,
    pub evr_queue_size: usize,
    pub product_queue_size: usize,
    pub general_queue_size: usize,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            topic_tokens: Vec::new(),
            channel_queue_size: 8192,
            evr_queue_size: 4096,
            product_queue_size: 1024,
            general_queue_size: 2048,
        }
    }
}

impl SubscriberConfig {
    /// Inbound queue depth for a topic of the given class.
    pub fn queue_depth(&self, class: TopicClass) -> usize {
        match class {
            TopicClass::Channel => self.channel_queue_size,
            TopicClass::Evr => self.evr_queue_size,
            TopicClass::Product => self.product_queue_size,
            TopicClass::General => self.general_queue_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub interval_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self { interval_ms: 5000 }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl MonitorConfig {
    /// Load from an optional TOML file plus process environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        Self::finish(builder.add_source(environment()))
    }

    /// Parse TOML text, without environment overrides.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Self::finish(Config::builder().add_source(File::from_str(text, FileFormat::Toml)))
    }

    /// Parse TOML text with overrides from an explicit variable map instead of
    /// the process environment.
    pub fn from_toml_with_env(
        text: &str,
        vars: config::Map<String, String>,
    ) -> Result<Self, ConfigError> {
        Self::finish(
            Config::builder()
                .add_source(File::from_str(text, FileFormat::Toml))
                .add_source(environment().source(Some(vars))),
        )
    }

    fn finish(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, ConfigError> {
        let config: MonitorConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let context = &self.context;
        if context.mission.trim().is_empty() {
            return Err(ConfigError::Invalid("context.mission is empty".to_string()));
        }
        if context.venue.has_testbed_name() && context.testbed_name.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "context.testbed_name is required for venue {}",
                context.venue
            )));
        }

        let subscriber = &self.subscriber;
        for (name, size) in [
            ("channel_queue_size", subscriber.channel_queue_size),
            ("evr_queue_size", subscriber.evr_queue_size),
            ("product_queue_size", subscriber.product_queue_size),
            ("general_queue_size", subscriber.general_queue_size),
        ] {
            if size == 0 {
                return Err(ConfigError::Invalid(format!("subscriber.{name} must be positive")));
            }
        }

        if self.heartbeat.interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "heartbeat.interval_ms must be positive".to_string(),
            ));
        }

        for topic in &context.subscription_topics {
            check_topic(topic, false)?;
        }
        Ok(())
    }

    /// Whether SSE topics exist for this session.
    pub fn sse_supported(&self) -> bool {
        self.context.application_sse || self.mission.has_sse
    }

    /// The naming context topics are built from.
    pub fn topic_context(&self) -> TopicContext {
        let context = &self.context;
        let venue_name = if context.venue.has_testbed_name() {
            context.testbed_name.clone()
        } else if context.venue.is_ops_venue() {
            String::new()
        } else {
            match context.venue_id.as_deref().filter(|id| !id.is_empty()) {
                Some(id) => id.to_string(),
                None => format!("{}.{}", context.host, context.user),
            }
        };

        let subtopic = context
            .subtopic
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.mission.default_subtopic.as_deref())
            .unwrap_or_default()
            .to_string();

        TopicContext {
            mission: context.mission.clone(),
            venue: context.venue,
            venue_name,
            downlink_stream: context.downlink_stream.clone(),
            subtopic,
            application_sse: context.application_sse,
            mission_has_sse: self.mission.has_sse,
        }
    }

    /// Selector for this session's traffic on every subscription.
    pub fn session_filter(&self) -> Filter {
        Filter::for_session(self.context.session_host.as_deref(), self.context.session_id)
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .try_parsing(true)
}
