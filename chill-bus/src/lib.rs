//! # chill-bus
//!
//! Message bus plumbing for the chill monitor.
//!
//! The subscription controller never talks to a concrete bus client. It sees
//! the traits in this crate:
//!
//! - [`MessageBus`] opens [`Subscription`]s and publishes envelopes
//! - [`MessageListener`] and [`Distributor`] receive inbound [`Envelope`]s
//! - [`HeartbeatPublisher`] and [`HeartbeatListener`] carry connectivity
//!   loss and recovery
//!
//! [`MemoryBus`] and [`BusHeartbeat`] implement them in-process.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use chill_bus::{Envelope, MemoryBus, MessageBus, MessageListener, ShutdownMode, SubscriptionSpec};
//!
//! struct Print;
//!
//! impl MessageListener for Print {
//!     fn on_message(&self, envelope: &Envelope) {
//!         println!("{} on {}", envelope.message_type().unwrap_or("?"), envelope.topic);
//!     }
//! }
//!
//! let bus = MemoryBus::new();
//! let listener: Arc<dyn MessageListener> = Arc::new(Print);
//! let mut sub = bus
//!     .open(SubscriptionSpec::new("mpcs.msl.testbed.mstb.lv.evr", 64), vec![listener])
//!     .unwrap();
//! sub.start().unwrap();
//!
//! bus.publish("mpcs.msl.testbed.mstb.lv.evr", Envelope::builder("Evr").build()).unwrap();
//! sub.shutdown(ShutdownMode::Graceful);
//! ```

mod bus;
pub mod envelope;
pub mod error;
pub mod filter;
pub mod heartbeat;
pub mod memory;

pub use bus::{Distributor, MessageBus, MessageListener, ShutdownMode, Subscription, SubscriptionSpec};
pub use envelope::{Envelope, EnvelopeBuilder};
pub use error::BusError;
pub use filter::Filter;
pub use heartbeat::{BusHeartbeat, HeartbeatListener, HeartbeatPublisher};
pub use memory::{MemoryBus, MemorySubscription};
