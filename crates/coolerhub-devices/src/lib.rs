//! Water cooler state aggregation and command protocol engine.
//!
//! ## Architecture
//!
//! - **CoolerService**: classifies transport deliveries and routes them
//! - **CommandValidator**: schema-checks commands and emits domain events
//! - **Aggregator**: single owner of every `DeviceStatus`, fed by one queue
//! - **QueryResponder**: answers reading/data/list requests from storage
//! - **Transports**: MQTT (slash topics) and an in-process topic exchange
//!   (dot topics) behind the `Transport` trait
//!
//! `CoolerHub` wires all of them on one transport.

pub mod aggregator;
pub mod command;
pub mod report;
pub mod responder;
pub mod service;
pub mod simulator;
pub mod state;
pub mod transport;

pub use aggregator::{Aggregator, AggregatorHandle, Applied, Intake, Rejected, StatusView};
pub use command::{CommandValidator, ValidatedCommand, validate_command};
pub use report::StatusReport;
pub use responder::{QueryResponder, ResponderHandle};
pub use service::{CoolerHub, CoolerService};
pub use simulator::{VirtualCooler, VirtualSensor};
pub use state::{DeviceSlot, DeviceStateStore, DeviceStatus, StatsSnapshot};
pub use transport::MemoryExchange;
#[cfg(feature = "mqtt")]
pub use transport::MqttTransport;
