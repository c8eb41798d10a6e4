//! API handlers.

pub mod basic;
pub mod devices;

pub use crate::server::ServerState;

pub use basic::{health_handler, health_status_handler};
pub use devices::{get_device_handler, list_devices_handler, post_reading_handler, statuses_handler};
