//! Transport adapters.
//!
//! - [`MemoryExchange`]: in-process topic exchange, dot dialect
//! - [`MqttTransport`]: MQTT broker connection, slash dialect (feature `mqtt`)

pub mod memory;
#[cfg(feature = "mqtt")]
pub mod mqtt;

pub use memory::MemoryExchange;
#[cfg(feature = "mqtt")]
pub use mqtt::MqttTransport;

use coolerhub_core::config::{TransportConfig, TransportKind};
use coolerhub_core::{DynTransport, Result};

/// Build the transport selected by the configuration.
pub fn connect(config: &TransportConfig) -> Result<DynTransport> {
    let transport: DynTransport = match config.kind {
        TransportKind::Memory => MemoryExchange::new("water_coolers"),
        #[cfg(feature = "mqtt")]
        TransportKind::Mqtt => MqttTransport::connect(config)?,
        #[cfg(not(feature = "mqtt"))]
        TransportKind::Mqtt => {
            return Err(coolerhub_core::Error::Config(
                "built without MQTT support".to_string(),
            ));
        }
    };
    Ok(transport)
}
