//! Message-bus topic naming.
//!
//! Topics are derived from the mission and session context:
//!
//! ```text
//! mpcs.<mission>.<venue delimiter>.<venue specific part>[.<data component>]
//! ```
//!
//! A *root* (application) topic carries session-level traffic; each root has
//! *data* subtopics (`eha`, `evr`, `product`, ...) that carry one category of
//! telemetry. SSE (simulation support equipment) topics use the SSE mission
//! name, `<mission>sse`, in place of the flight mission name.

use core::fmt;
use core::str::FromStr;

use thiserror::Error;

/// Leading component of every topic.
pub const TOPIC_PREFIX: &str = "mpcs";

/// Separator between topic components.
pub const DELIMITER: char = '.';

const NOT_APPLICABLE_STREAM: &str = "not_applicable";

/// Errors from topic validation and token parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopicError {
    #[error("topic name is empty")]
    Empty,

    #[error("topic {0:?} can only contain letters, digits, and the period, dash, and underscore characters")]
    InvalidCharacter(String),

    #[error("topic {0:?} must start with prefix \"mpcs.\"")]
    MissingPrefix(String),

    #[error("topic {0:?} is a data subtopic, but needs to be a root topic")]
    NotRoot(String),

    #[error("unknown {kind} {value:?}")]
    Unknown { kind: &'static str, value: String },
}

/// Kind of test or operations environment the session runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum VenueType {
    #[default]
    Testset,
    Testbed,
    Atlo,
    Cruise,
    Surface,
    Orbit,
    Ops,
}

impl VenueType {
    pub const ALL: [VenueType; 7] = [
        VenueType::Testset,
        VenueType::Testbed,
        VenueType::Atlo,
        VenueType::Cruise,
        VenueType::Surface,
        VenueType::Orbit,
        VenueType::Ops,
    ];

    /// Component inserted after the mission in topic names, if any.
    pub fn topic_name_delimiter(&self) -> Option<&'static str> {
        match self {
            VenueType::Testset => None,
            VenueType::Testbed => Some("testbed"),
            VenueType::Atlo => Some("atlo"),
            VenueType::Cruise => Some("cruise"),
            VenueType::Surface => Some("surface"),
            VenueType::Orbit => Some("orbit"),
            VenueType::Ops => Some("ops"),
        }
    }

    /// Flight operations venues. SSE is normally absent here.
    pub fn is_ops_venue(&self) -> bool {
        matches!(
            self,
            VenueType::Cruise | VenueType::Surface | VenueType::Orbit | VenueType::Ops
        )
    }

    /// Venues identified by a testbed name.
    pub fn has_testbed_name(&self) -> bool {
        matches!(self, VenueType::Testbed | VenueType::Atlo)
    }

    fn name(&self) -> &'static str {
        match self {
            VenueType::Testset => "testset",
            VenueType::Testbed => "testbed",
            VenueType::Atlo => "atlo",
            VenueType::Cruise => "cruise",
            VenueType::Surface => "surface",
            VenueType::Orbit => "orbit",
            VenueType::Ops => "ops",
        }
    }
}

impl fmt::Display for VenueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for VenueType {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VenueType::ALL
            .into_iter()
            .find(|v| v.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| TopicError::Unknown {
                kind: "venue type",
                value: s.to_string(),
            })
    }
}

/// Configuration tokens naming the topics a client may subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum TopicNameToken {
    Application,
    ApplicationEha,
    ApplicationEvr,
    ApplicationProduct,
    ApplicationCommand,
    ApplicationFrame,
    ApplicationPacket,
    ApplicationPdu,
    ApplicationCfdp,
    ApplicationAlarm,
    ApplicationStation,
    ApplicationSse,
    ApplicationSseEha,
    ApplicationSseEvr,
    ApplicationSseCommand,
    ApplicationSsePacket,
    ApplicationSseAlarm,
    General,
    Perspective,
    Client,
}

impl TopicNameToken {
    const FLIGHT_DATA: [TopicNameToken; 10] = [
        TopicNameToken::ApplicationEha,
        TopicNameToken::ApplicationEvr,
        TopicNameToken::ApplicationProduct,
        TopicNameToken::ApplicationCommand,
        TopicNameToken::ApplicationFrame,
        TopicNameToken::ApplicationPacket,
        TopicNameToken::ApplicationPdu,
        TopicNameToken::ApplicationCfdp,
        TopicNameToken::ApplicationAlarm,
        TopicNameToken::ApplicationStation,
    ];

    const SSE_DATA: [TopicNameToken; 5] = [
        TopicNameToken::ApplicationSseEha,
        TopicNameToken::ApplicationSseEvr,
        TopicNameToken::ApplicationSseCommand,
        TopicNameToken::ApplicationSsePacket,
        TopicNameToken::ApplicationSseAlarm,
    ];

    /// Data tokens for a flight or an SSE root topic.
    pub fn data_tokens(sse: bool) -> &'static [TopicNameToken] {
        if sse {
            &Self::SSE_DATA
        } else {
            &Self::FLIGHT_DATA
        }
    }

    /// Component appended to a root topic to form this token's data topic.
    pub fn data_component(&self) -> Option<&'static str> {
        use TopicNameToken::*;
        match self {
            ApplicationEha | ApplicationSseEha => Some("eha"),
            ApplicationEvr | ApplicationSseEvr => Some("evr"),
            ApplicationProduct => Some("product"),
            ApplicationCommand | ApplicationSseCommand => Some("cmd"),
            ApplicationFrame => Some("frame"),
            ApplicationPacket | ApplicationSsePacket => Some("packet"),
            ApplicationPdu => Some("pdu"),
            ApplicationCfdp => Some("cfdp"),
            ApplicationAlarm | ApplicationSseAlarm => Some("alarm"),
            ApplicationStation => Some("station"),
            Application | ApplicationSse | General | Perspective | Client => None,
        }
    }

    pub fn is_data(&self) -> bool {
        self.data_component().is_some()
    }

    pub fn is_sse(&self) -> bool {
        use TopicNameToken::*;
        matches!(
            self,
            ApplicationSse
                | ApplicationSseEha
                | ApplicationSseEvr
                | ApplicationSseCommand
                | ApplicationSsePacket
                | ApplicationSseAlarm
        )
    }

    /// The data topic for this token under `root`, if this is a data token.
    pub fn application_data_topic(&self, root: &str) -> Option<String> {
        self.data_component()
            .map(|component| format!("{root}{DELIMITER}{component}"))
    }
}

/// True if the last component of `topic` names a data category.
pub fn is_data_topic(topic: &str) -> bool {
    let last = last_component(topic);
    TopicNameToken::FLIGHT_DATA
        .iter()
        .any(|t| t.data_component() == Some(last))
}

fn last_component(topic: &str) -> &str {
    topic.rsplit(DELIMITER).next().unwrap_or(topic)
}

/// Category of traffic a topic carries.
///
/// Selects both the inbound queue depth and which distributor a topic's
/// messages are routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicClass {
    /// Channel telemetry (EHA and alarms).
    Channel,
    /// Event records.
    Evr,
    /// Data products.
    Product,
    /// Session, command and everything else.
    General,
}

impl TopicClass {
    pub fn of(topic: &str) -> Self {
        match last_component(topic) {
            "eha" | "alarm" => TopicClass::Channel,
            "evr" => TopicClass::Evr,
            "product" => TopicClass::Product,
            _ => TopicClass::General,
        }
    }
}

/// Session facts that topic names are built from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TopicContext {
    /// Flight mission name, e.g. `msl`.
    pub mission: String,
    pub venue: VenueType,
    /// Testbed name, venue id or `<host>.<user>`, depending on venue.
    pub venue_name: String,
    /// Downlink stream id for testbed/ATLO venues.
    pub downlink_stream: Option<String>,
    /// Messaging subtopic for operations venues.
    pub subtopic: String,
    /// The application itself is an SSE application.
    pub application_sse: bool,
    /// The mission has SSE data at all.
    pub mission_has_sse: bool,
}

impl TopicContext {
    /// Whether SSE topics exist for this session.
    pub fn sse_supported(&self) -> bool {
        self.application_sse || self.mission_has_sse
    }

    /// The flight venue topic for this session.
    pub fn venue_topic(&self) -> String {
        let mission = if self.application_sse {
            sse_mission_name(&self.mission)
        } else {
            self.mission.to_lowercase()
        };

        let mut topic = topic_prefix(Some(self.venue), &mission);
        match self.venue {
            VenueType::Testset => topic.push_str(&self.venue_name),
            VenueType::Testbed | VenueType::Atlo => {
                topic.push_str(&self.venue_name);
                topic.push(DELIMITER);
                topic.push_str(
                    self.downlink_stream
                        .as_deref()
                        .filter(|s| !s.is_empty())
                        .unwrap_or(NOT_APPLICABLE_STREAM),
                );
            }
            VenueType::Cruise | VenueType::Surface | VenueType::Orbit | VenueType::Ops => {
                topic.push_str(&self.subtopic)
            }
        }
        format_topic(&topic)
    }

    /// The SSE venue topic for this session.
    pub fn sse_venue_topic(&self) -> String {
        let mut topic = topic_prefix(Some(self.venue), &sse_mission_name(&self.mission));
        if self.venue.is_ops_venue() {
            topic.push_str(&self.subtopic);
        } else {
            topic.push_str(&self.venue_name);
        }
        format_topic(&topic)
    }

    /// The mission-wide general topic for this venue.
    pub fn general_topic(&self) -> String {
        let mut topic = topic_prefix(Some(self.venue), &self.mission.to_lowercase());
        topic.push_str("general");
        format_topic(&topic)
    }

    pub fn perspective_topic(&self) -> String {
        let mut topic = topic_prefix(Some(self.venue), &self.mission.to_lowercase());
        topic.push_str("perspective");
        format_topic(&topic)
    }

    /// Topic that clients publish their own messages (heartbeats) to.
    pub fn client_topic(&self) -> String {
        let mut topic = topic_prefix(None, &self.mission.to_lowercase());
        topic.push_str("client");
        format_topic(&topic)
    }

    /// Resolve a configuration token to a topic name.
    ///
    /// Returns `None` for SSE tokens when the session has no SSE.
    pub fn topic_for(&self, token: TopicNameToken) -> Option<String> {
        use TopicNameToken::*;
        match token {
            Application => Some(if self.application_sse {
                self.sse_venue_topic()
            } else {
                self.venue_topic()
            }),
            ApplicationSse => self.sse_supported().then(|| self.sse_venue_topic()),
            General => Some(self.general_topic()),
            Perspective => Some(self.perspective_topic()),
            Client => Some(self.client_topic()),
            t if t.is_sse() => {
                if self.sse_supported() {
                    t.application_data_topic(&self.sse_venue_topic())
                } else {
                    None
                }
            }
            t => {
                let root = if self.application_sse {
                    self.sse_venue_topic()
                } else {
                    self.venue_topic()
                };
                t.application_data_topic(&root)
            }
        }
    }

    /// True if `topic` belongs to this mission's SSE.
    pub fn is_sse_topic(&self, topic: &str) -> bool {
        is_sse_topic(topic, &self.mission)
    }
}

/// The SSE flavour of a mission name.
pub fn sse_mission_name(mission: &str) -> String {
    format!("{}sse", mission.to_lowercase())
}

/// True if `topic` is named with the SSE mission name.
pub fn is_sse_topic(topic: &str, mission: &str) -> bool {
    let sse = sse_mission_name(mission);
    topic.split(DELIMITER).any(|c| c == sse)
}

/// `mpcs.<mission>.[<venue delimiter>.]`
pub fn topic_prefix(venue: Option<VenueType>, mission: &str) -> String {
    let mut prefix = String::with_capacity(64);
    prefix.push_str(TOPIC_PREFIX);
    prefix.push(DELIMITER);
    prefix.push_str(mission);
    prefix.push(DELIMITER);
    if let Some(delimiter) = venue.and_then(|v| v.topic_name_delimiter()) {
        prefix.push_str(delimiter);
        prefix.push(DELIMITER);
    }
    prefix
}

/// Lower-case a topic, turn runs of spaces into `_` and drop a dangling
/// trailing delimiter left by an empty venue name or subtopic.
pub fn format_topic(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_spaces = false;
    for c in input.chars() {
        if c == ' ' {
            if !in_spaces {
                out.push('_');
            }
            in_spaces = true;
        } else {
            in_spaces = false;
            out.extend(c.to_lowercase());
        }
    }
    while out.ends_with(DELIMITER) {
        out.pop();
    }
    out
}

/// Validate a user-supplied topic name.
pub fn check_topic(topic: &str, should_be_root: bool) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::Empty);
    }
    if !topic
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == DELIMITER || c == '-' || c == '_')
    {
        return Err(TopicError::InvalidCharacter(topic.to_string()));
    }
    let required = format!("{TOPIC_PREFIX}{DELIMITER}");
    if !topic.starts_with(&required) {
        return Err(TopicError::MissingPrefix(topic.to_string()));
    }
    if should_be_root && is_data_topic(topic) {
        return Err(TopicError::NotRoot(topic.to_string()));
    }
    Ok(())
}

/// All data subtopics of a root topic. The root itself is not included, and
/// a data topic expands to nothing.
pub fn expand_application_topic(root: &str, mission: &str) -> Vec<String> {
    if is_data_topic(root) {
        return Vec::new();
    }
    TopicNameToken::data_tokens(is_sse_topic(root, mission))
        .iter()
        .filter_map(|t| t.application_data_topic(root))
        .collect()
}

/// Sorted, de-duplicated union of `topics` and all their data subtopics.
pub fn expand_topics<S: AsRef<str>>(topics: &[S], mission: &str) -> Vec<String> {
    let mut all = std::collections::BTreeSet::new();
    for topic in topics {
        let topic = topic.as_ref();
        all.insert(topic.to_string());
        all.extend(expand_application_topic(topic, mission));
    }
    all.into_iter().collect()
}
