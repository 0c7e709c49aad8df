//! Subscription controller lifecycle state.

use core::fmt;

/// Where a subscription controller is in its lifecycle.
///
/// ```text
/// Uninitialized --create--> Subscribed --start--> Receiving
///       ^                        |                    |
///       +------ close / heartbeat lost ---------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[cfg_attr(feature = "minicbor", derive(minicbor::Encode, minicbor::Decode))]
#[cfg_attr(feature = "minicbor", cbor(index_only))]
pub enum ControllerState {
    /// No subscriptions exist.
    #[default]
    #[cfg_attr(feature = "minicbor", n(0))]
    Uninitialized,

    /// Subscriptions are open but their consumers are not started.
    #[cfg_attr(feature = "minicbor", n(1))]
    Subscribed,

    /// Subscriptions are open and delivering messages.
    #[cfg_attr(feature = "minicbor", n(2))]
    Receiving,
}

impl ControllerState {
    /// True once subscriptions have been opened.
    pub fn is_subscribed(&self) -> bool {
        !matches!(self, ControllerState::Uninitialized)
    }

    pub fn is_receiving(&self) -> bool {
        matches!(self, ControllerState::Receiving)
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControllerState::Uninitialized => "uninitialized",
            ControllerState::Subscribed => "subscribed",
            ControllerState::Receiving => "receiving",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_uninitialized() {
        assert_eq!(ControllerState::default(), ControllerState::Uninitialized);
        assert!(!ControllerState::default().is_subscribed());
    }

    #[test]
    fn subscribed_and_receiving() {
        assert!(ControllerState::Subscribed.is_subscribed());
        assert!(!ControllerState::Subscribed.is_receiving());
        assert!(ControllerState::Receiving.is_subscribed());
        assert!(ControllerState::Receiving.is_receiving());
    }

    #[test]
    fn display_names() {
        assert_eq!(ControllerState::Receiving.to_string(), "receiving");
        assert_eq!(ControllerState::Uninitialized.to_string(), "uninitialized");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&ControllerState::Subscribed).unwrap();
        assert_eq!(json, "\"subscribed\"");
    }
}
