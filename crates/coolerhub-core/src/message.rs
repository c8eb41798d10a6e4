//! Wire messages.
//!
//! Payloads are JSON objects with camelCase field names. Readings identify
//! their device as `coolerId`; `deviceId` is accepted as an alias on input.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Decode a JSON payload.
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(payload)?)
}

/// Encode a value as a JSON payload.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| Error::Serialization(e.to_string()))
}

/// ISO-8601 timestamps.
///
/// Serialized as RFC 3339 in UTC. On input, offsets are honoured and a
/// timestamp without offset is taken to be UTC.
pub mod timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn parse(s: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub fn format(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(dt))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse(&s).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{}'", s)))
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            dt: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match dt {
                Some(dt) => serializer.serialize_str(&format(dt)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            match Option::<String>::deserialize(deserializer)? {
                Some(s) => parse(&s)
                    .map(Some)
                    .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{}'", s))),
                None => Ok(None),
            }
        }
    }
}

/// A single timestamped measurement emitted by a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Empty when the id is carried by the topic or path instead.
    #[serde(rename = "coolerId", alias = "deviceId", default)]
    pub device_id: String,
    pub measurement: String,
    pub value: f64,
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    pub fn new(
        device_id: impl Into<String>,
        measurement: impl Into<String>,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            measurement: measurement.into(),
            value,
            timestamp,
        }
    }
}

/// `status` field of every response envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
    /// Absent or any other value. Never produced here.
    #[default]
    #[serde(other)]
    Unknown,
}

impl ResponseStatus {
    pub fn is_success(self) -> bool {
        self == ResponseStatus::Success
    }
}

/// Windowed statistics of one measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementStats {
    pub average: f64,
    pub min: f64,
    pub max: f64,
    pub last_value: f64,
}

/// Body of a query request. Queries normally carry no body at all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl QueryRequest {
    /// Read the optional correlation token. Empty or non-object bodies carry none.
    pub fn from_payload(payload: &[u8]) -> Self {
        if payload.iter().all(u8::is_ascii_whitespace) {
            return Self::default();
        }
        serde_json::from_slice(payload).unwrap_or_default()
    }
}

/// Answer to a reading: `water_coolers/{id}/readings/response`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingResponse {
    #[serde(default)]
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reading: Option<Reading>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl ReadingResponse {
    pub fn success(reading: Reading) -> Self {
        Self {
            status: ResponseStatus::Success,
            reading: Some(reading),
            error: None,
            correlation_id: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            reading: None,
            error: Some(message.into()),
            correlation_id: None,
        }
    }
}

/// Answer to a data query: `water_coolers/{id}/data/response`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataResponse {
    #[serde(default)]
    pub status: ResponseStatus,
    #[serde(
        rename = "coolerId",
        alias = "deviceId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub cooler_id: Option<String>,
    #[serde(
        default,
        with = "timestamp::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_update: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stats: BTreeMap<String, MeasurementStats>,
    #[serde(default)]
    pub readings: Vec<Reading>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl DataResponse {
    pub fn success(
        cooler_id: impl Into<String>,
        stats: BTreeMap<String, MeasurementStats>,
        readings: Vec<Reading>,
    ) -> Self {
        let last_update = readings.iter().map(|r| r.timestamp).max();
        Self {
            status: ResponseStatus::Success,
            cooler_id: Some(cooler_id.into()),
            last_update,
            stats,
            readings,
            error: None,
            correlation_id: None,
        }
    }

    pub fn error(cooler_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            cooler_id: Some(cooler_id.into()),
            last_update: None,
            stats: BTreeMap::new(),
            readings: Vec::new(),
            error: Some(message.into()),
            correlation_id: None,
        }
    }

    pub fn with_correlation(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }
}

/// Answer to a list query: `water_coolers/list/response`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse {
    #[serde(default)]
    pub status: ResponseStatus,
    #[serde(default)]
    pub total: usize,
    #[serde(default)]
    pub coolers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl ListResponse {
    pub fn success(coolers: Vec<String>) -> Self {
        Self {
            status: ResponseStatus::Success,
            total: coolers.len(),
            coolers,
            error: None,
            correlation_id: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            total: 0,
            coolers: Vec::new(),
            error: Some(message.into()),
            correlation_id: None,
        }
    }

    pub fn with_correlation(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }
}

/// Command actions understood by a cooler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandAction {
    Power,
    NightLight,
    Maintenance,
}

impl CommandAction {
    /// Look up an action by name, ignoring ASCII case.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "power" => Some(CommandAction::Power),
            "night_light" => Some(CommandAction::NightLight),
            "maintenance" => Some(CommandAction::Maintenance),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CommandAction::Power => "power",
            CommandAction::NightLight => "night_light",
            CommandAction::Maintenance => "maintenance",
        }
    }

    /// Name of the boolean field the action carries.
    pub fn payload_field(self) -> &'static str {
        match self {
            CommandAction::Power | CommandAction::NightLight => "state",
            CommandAction::Maintenance => "enabled",
        }
    }
}

impl std::fmt::Display for CommandAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outbound command envelope, as sent to `commands/{id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DeviceCommand {
    Power { state: bool },
    NightLight { state: bool },
    Maintenance { enabled: bool },
}

impl DeviceCommand {
    pub fn action(&self) -> CommandAction {
        match self {
            DeviceCommand::Power { .. } => CommandAction::Power,
            DeviceCommand::NightLight { .. } => CommandAction::NightLight,
            DeviceCommand::Maintenance { .. } => CommandAction::Maintenance,
        }
    }

    pub fn new(action: CommandAction, value: bool) -> Self {
        match action {
            CommandAction::Power => DeviceCommand::Power { state: value },
            CommandAction::NightLight => DeviceCommand::NightLight { state: value },
            CommandAction::Maintenance => DeviceCommand::Maintenance { enabled: value },
        }
    }
}
