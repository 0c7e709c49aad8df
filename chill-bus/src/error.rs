//! Error types for bus operations.

use thiserror::Error;

/// Errors raised by a message bus, its subscriptions and inbound envelopes.
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus cannot be reached.
    #[error("Message bus unavailable")]
    Unavailable,

    /// A subscription could not be created.
    #[error("Failed to subscribe to {topic}: {reason}")]
    Subscribe { topic: String, reason: String },

    /// The subscription or bus has been shut down.
    #[error("Subscription closed")]
    Closed,

    /// An inbound message is missing a property or has an unparsable one.
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// A selector filter could not be parsed.
    #[error("Invalid filter: {0}")]
    Filter(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BusError {
    pub(crate) fn subscribe(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        BusError::Subscribe {
            topic: topic.into(),
            reason: reason.into(),
        }
    }

    /// True for errors that a later retry may not hit.
    pub fn is_transient(&self) -> bool {
        matches!(self, BusError::Unavailable | BusError::Io(_))
    }
}
