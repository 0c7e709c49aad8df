//! # chill-monitor
//!
//! Message-bus subscription management for a ground-system telemetry
//! monitor.
//!
//! A monitoring session subscribes to the topics its mission and venue
//! produce, hands every inbound message to a per-domain distributor, keeps
//! per-topic receive statistics, and recovers on its own when the bus drops
//! out and comes back.
//!
//! ## Architecture
//!
//! ```text
//!            ┌──────────────┐   heartbeat lost / regained
//!            │ BusHeartbeat │──────────────────────────────┐
//!            └──────────────┘                              ▼
//! ┌────────────┐  topics  ┌─────────────────────────────────────────┐
//! │MonitorConfig│────────▶│          SubscriptionController          │
//! └────────────┘          │  create → start → (lost) → create+start  │
//!                         └───────────────────┬─────────────────────┘
//!                                             │ one Subscription per topic
//!                                             ▼
//!          ┌───────────────┬──────────────────┬───────────────────┐
//!          │ ReceiptTracker│ Channel/General  │ CaptureDistributor│
//!          │   (stats)     │  Distributor     │   (JSON lines)    │
//!          └───────────────┴──────────────────┴───────────────────┘
//! ```
//!
//! - **[`config`]**: session context loading (TOML plus `CHILL__` environment
//!   overrides)
//! - **[`topics`]**: the effective topic set for a session
//! - **[`controller`]**: the [`SubscriptionController`] lifecycle
//! - **[`stats`]**: per-topic receive counts, lag and discard detection
//! - **[`distributor`]**: where messages go after the bus delivers them
//! - **[`reporter`]**: periodic [`StatusSnapshot`](chill_types::StatusSnapshot)
//!   emission to files, TCP or channels
//!
//! ## Usage
//!
//! ```
//! use std::sync::Arc;
//! use chill_bus::{Envelope, MemoryBus, MessageBus};
//! use chill_monitor::{MonitorConfig, SubscriptionController};
//! use chill_types::UnixMillis;
//!
//! let config = MonitorConfig::from_toml(r#"
//!     [context]
//!     mission = "msl"
//!     venue = "testbed"
//!     testbed_name = "mstb"
//!     downlink_stream = "lv"
//!
//!     [subscriber]
//!     topic_tokens = ["application_eha", "application_evr"]
//! "#).unwrap();
//!
//! let bus = MemoryBus::new();
//! let controller = SubscriptionController::builder(config, Arc::new(bus.clone())).build();
//! controller.create_subscriptions().unwrap();
//! controller.start_message_receipt().unwrap();
//!
//! let message = Envelope::builder("Evr")
//!     .source_pid(7)
//!     .sequence(1)
//!     .publish_time(UnixMillis::now())
//!     .build();
//! bus.publish("mpcs.msl.testbed.mstb.lv.evr", message).unwrap();
//!
//! controller.close_subscriptions();
//! assert_eq!(controller.receipt_count(), 1);
//! ```

pub mod config;
pub mod controller;
pub mod distributor;
pub mod duration;
pub mod output;
pub mod reporter;
pub mod simulate;
pub mod stats;
pub mod topics;

pub use config::{ConfigError, MonitorConfig};
pub use controller::{ControllerBuilder, ControllerError, SubscriptionController};
pub use distributor::{CaptureDistributor, ChannelDistributor, Distributors, GeneralDistributor};
pub use output::Output;
pub use reporter::{EmissionHandle, StatusReporter, StatusReporterBuilder};
pub use stats::{ReceiptTracker, SubscriberStats};
pub use topics::resolve_topics;
