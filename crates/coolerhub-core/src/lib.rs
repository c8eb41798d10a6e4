//! Core traits and types for CoolerHub.
//!
//! This crate defines the foundational abstractions shared by the storage,
//! device and API crates: the error taxonomy, configuration, domain events,
//! wire messages, the topic router and the transport interface.

pub mod config;
pub mod error;
pub mod event;
pub mod eventbus;
pub mod message;
pub mod topic;
pub mod transport;

pub use error::{Error, Result};

// Event exports
pub use event::{CoolerEvent, EventMetadata};

// Event bus exports
pub use eventbus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventBusReceiver, SharedEventBus};

// Topic router exports
pub use topic::{Route, Scope, TopicDialect, TopicKind};

// Transport exports
pub use transport::{DynTransport, InboundMessage, Outbox, SubscriberTable, Subscription, Transport};
