//! Typed domain events.
//!
//! The command validator turns accepted commands into these events. Power
//! changes are consumed by the device state aggregator; every event is also
//! published on the [`EventBus`](crate::eventbus::EventBus) for observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event emitted for an accepted command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoolerEvent {
    /// The device was switched on or off. The only way `isPoweredOn` changes.
    PowerStateChanged { device_id: String, state: bool },
    /// Night light toggled. Observability only.
    NightLightChanged { device_id: String, state: bool },
    /// Maintenance mode toggled. Observability only.
    MaintenanceModeChanged { device_id: String, enabled: bool },
}

impl CoolerEvent {
    /// Device the event refers to.
    pub fn device_id(&self) -> &str {
        match self {
            CoolerEvent::PowerStateChanged { device_id, .. }
            | CoolerEvent::NightLightChanged { device_id, .. }
            | CoolerEvent::MaintenanceModeChanged { device_id, .. } => device_id,
        }
    }

    /// Event type name, used in logs.
    pub fn type_name(&self) -> &'static str {
        match self {
            CoolerEvent::PowerStateChanged { .. } => "PowerStateChanged",
            CoolerEvent::NightLightChanged { .. } => "NightLightChanged",
            CoolerEvent::MaintenanceModeChanged { .. } => "MaintenanceModeChanged",
        }
    }
}

/// Metadata attached to every published event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Component that published the event.
    pub source: String,
}

impl EventMetadata {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
        }
    }
}
