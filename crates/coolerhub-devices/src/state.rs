//! Per-device runtime state.
//!
//! Records live in an arena owned by the aggregator. A record is created the
//! first time an id is observed and keeps its slot for the lifetime of the
//! process, so iteration follows first-observation order.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use coolerhub_core::message::MeasurementStats;
use serde::{Deserialize, Serialize};

/// Statistics of one measurement as last received in a data response.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub average: f64,
    pub min: f64,
    pub max: f64,
    pub last_value: f64,
    /// Local time the snapshot was absorbed.
    pub observed_at: DateTime<Utc>,
}

impl StatsSnapshot {
    pub fn from_stats(stats: &MeasurementStats, observed_at: DateTime<Utc>) -> Self {
        Self {
            average: stats.average,
            min: stats.min,
            max: stats.max,
            last_value: stats.last_value,
            observed_at,
        }
    }
}

/// Authoritative state of one cooler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    pub device_id: String,
    pub is_powered_on: bool,
    pub total_liters_dispensed: f64,
    /// Most recent value per measurement.
    pub last_readings: BTreeMap<String, f64>,
    pub stats: BTreeMap<String, StatsSnapshot>,
    /// Timestamp carried by the last absorbed payload; creation time before that.
    pub last_update_time: DateTime<Utc>,
}

impl DeviceStatus {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            is_powered_on: true,
            total_liters_dispensed: 0.0,
            last_readings: BTreeMap::new(),
            stats: BTreeMap::new(),
            last_update_time: Utc::now(),
        }
    }
}

/// Stable handle to a record in a [`DeviceStateStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceSlot(usize);

impl DeviceSlot {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Arena of device records keyed by id.
#[derive(Debug, Default)]
pub struct DeviceStateStore {
    records: Vec<DeviceStatus>,
    index: HashMap<String, usize>,
}

impl DeviceStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot of `device_id`, creating the record on first sight.
    ///
    /// The flag is `true` when the record was created by this call.
    pub fn ensure(&mut self, device_id: &str) -> (DeviceSlot, bool) {
        if let Some(&i) = self.index.get(device_id) {
            return (DeviceSlot(i), false);
        }
        let i = self.records.len();
        self.records.push(DeviceStatus::new(device_id));
        self.index.insert(device_id.to_string(), i);
        (DeviceSlot(i), true)
    }

    pub fn slot_of(&self, device_id: &str) -> Option<DeviceSlot> {
        self.index.get(device_id).copied().map(DeviceSlot)
    }

    pub fn get(&self, slot: DeviceSlot) -> &DeviceStatus {
        &self.records[slot.0]
    }

    pub fn get_mut(&mut self, slot: DeviceSlot) -> &mut DeviceStatus {
        &mut self.records[slot.0]
    }

    pub fn by_id(&self, device_id: &str) -> Option<&DeviceStatus> {
        self.slot_of(device_id).map(|slot| self.get(slot))
    }

    /// Records in first-observation order.
    pub fn iter(&self) -> impl Iterator<Item = &DeviceStatus> {
        self.records.iter()
    }

    pub fn ids(&self) -> Vec<String> {
        self.records.iter().map(|r| r.device_id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
