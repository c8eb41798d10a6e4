//! HTTP ingress for the cooler hub.
//!
//! Exposes the reading store over REST (`/devices`, with `/water_coolers`
//! kept as an alias), the aggregator snapshot and a health probe.

pub mod handlers;
pub mod models;
pub mod server;

pub use models::{ErrorResponse, HandlerResult};
pub use server::{ServerState, create_router, run};
