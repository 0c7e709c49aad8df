//! # chill-types
//!
//! Shared types for the chill monitor. This crate holds the plain data that
//! the subscription controller, the bus collaborators and any status consumer
//! agree on:
//!
//! - **Topic naming**: venue types, topic name tokens and the rules that turn
//!   a mission/session context into message-bus topic names
//! - **Controller state**: the `Uninitialized -> Subscribed -> Receiving`
//!   lifecycle
//! - **Status snapshots**: per-topic receive statistics and the point-in-time
//!   view of a whole monitoring session
//!
//! ## Features
//!
//! - `serde`: JSON (or any serde format) serialization of snapshots and
//!   deserialization of configuration enums
//! - `minicbor`: compact binary serialization of snapshots via CBOR
//! - `all`: enable all serialization formats
//!
//! ## Example
//!
//! ```rust
//! use chill_types::{ControllerState, StatusSnapshot};
//!
//! let snapshot = StatusSnapshot::builder()
//!     .state(ControllerState::Receiving)
//!     .receipt_count(12)
//!     .subscriber("mpcs.msl.testbed.mstb.lv.eha", |s| {
//!         s.received(10).last_lag_ms(250).discard("EhaChannel/4021", 2)
//!     })
//!     .subscriber("mpcs.msl.testbed.mstb.lv.evr", |s| s.received(2))
//!     .build();
//!
//! assert_eq!(snapshot.total_received(), 12);
//! assert_eq!(snapshot.total_discards(), 2);
//! ```

mod snapshot;
mod state;
mod status;
mod time;
pub mod topic;
mod version;

pub use snapshot::*;
pub use state::*;
pub use status::*;
pub use time::*;
pub use topic::{TopicClass, TopicContext, TopicError, TopicNameToken, VenueType};
pub use version::*;

/// Current status schema version.
///
/// Increment this when making breaking changes to the snapshot format.
pub const STATUS_SCHEMA_VERSION: u32 = 1;
