//! Command validation and dispatch.
//!
//! A command travels `received → parsed → validated → dispatched`, or stops
//! at `rejected`. Rejected commands are logged and dropped; no response is
//! published for them. The device id always comes from the topic.

use coolerhub_core::message::{CommandAction, DeviceCommand};
use coolerhub_core::{CoolerEvent, Error, Result, SharedEventBus};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::aggregator::{AggregatorHandle, Intake};

/// Source name used for events published on the bus.
const EVENT_SOURCE: &str = "command_validator";

/// A command that passed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedCommand<'a> {
    pub device_id: &'a str,
    pub command: DeviceCommand,
}

impl ValidatedCommand<'_> {
    pub fn into_event(self) -> CoolerEvent {
        let device_id = self.device_id.to_string();
        match self.command {
            DeviceCommand::Power { state } => CoolerEvent::PowerStateChanged { device_id, state },
            DeviceCommand::NightLight { state } => CoolerEvent::NightLightChanged { device_id, state },
            DeviceCommand::Maintenance { enabled } => {
                CoolerEvent::MaintenanceModeChanged { device_id, enabled }
            }
        }
    }
}

/// Parse a payload into a JSON object.
pub fn parse_command(payload: &[u8]) -> Result<Map<String, Value>> {
    match serde_json::from_slice::<Value>(payload)? {
        Value::Object(map) => Ok(map),
        other => Err(Error::MalformedPayload(format!(
            "command must be a JSON object, got {}",
            json_type(&other)
        ))),
    }
}

/// Check the parsed envelope against the schema of its action.
pub fn validate_envelope(envelope: &Map<String, Value>) -> Result<DeviceCommand> {
    let action = match envelope.get("action") {
        Some(Value::String(name)) => {
            CommandAction::from_name(name).ok_or_else(|| Error::UnrecognizedAction(name.clone()))?
        }
        Some(other) => return Err(Error::UnrecognizedAction(other.to_string())),
        None => return Err(Error::UnrecognizedAction("<missing>".to_string())),
    };

    let field = action.payload_field();
    match envelope.get(field) {
        Some(Value::Bool(value)) => Ok(DeviceCommand::new(action, *value)),
        Some(other) => Err(Error::invalid_field(
            action.as_str(),
            field,
            format!("must be a boolean, got {}", json_type(other)),
        )),
        None => Err(Error::invalid_field(action.as_str(), field, "missing, must be a boolean")),
    }
}

/// Parse and validate a command addressed to `device_id`.
pub fn validate_command<'a>(device_id: &'a str, payload: &[u8]) -> Result<ValidatedCommand<'a>> {
    let envelope = parse_command(payload)?;
    let command = validate_envelope(&envelope)?;
    Ok(ValidatedCommand { device_id, command })
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Validates inbound commands and dispatches the resulting events.
#[derive(Clone)]
pub struct CommandValidator {
    intake: AggregatorHandle,
    event_bus: Option<SharedEventBus>,
}

impl CommandValidator {
    pub fn new(intake: AggregatorHandle) -> Self {
        Self {
            intake,
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: SharedEventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Validate and dispatch one command.
    ///
    /// Power commands reach the aggregator as `PowerStateChanged`; the other
    /// actions only ensure the device record exists. Every accepted command
    /// is published on the event bus.
    pub async fn handle(&self, device_id: &str, payload: &[u8]) -> Result<CoolerEvent> {
        let validated = validate_command(device_id, payload).inspect_err(|e| {
            warn!(
                device_id = %device_id,
                kind = e.kind(),
                error = %e,
                "command rejected"
            );
        })?;

        let event = validated.into_event();
        match &event {
            CoolerEvent::PowerStateChanged { state, .. } => {
                info!(device_id = %device_id, "power command received: {}", if *state { "ON" } else { "OFF" });
            }
            CoolerEvent::NightLightChanged { state, .. } => {
                info!(device_id = %device_id, "night light command received: {}", if *state { "ON" } else { "OFF" });
            }
            CoolerEvent::MaintenanceModeChanged { enabled, .. } => {
                info!(
                    device_id = %device_id,
                    "maintenance command received: {}",
                    if *enabled { "ENABLED" } else { "DISABLED" }
                );
            }
        }

        let intake = match &event {
            CoolerEvent::PowerStateChanged { device_id, state } => Intake::PowerStateChanged {
                device_id: device_id.clone(),
                state: *state,
            },
            other => Intake::DeviceObserved {
                device_id: other.device_id().to_string(),
            },
        };
        self.intake.submit(intake).await?;

        if let Some(bus) = &self.event_bus {
            bus.publish(event.clone(), EVENT_SOURCE);
        }
        Ok(event)
    }
}
