//! Device state aggregator.
//!
//! The aggregator is the only writer of [`DeviceStatus`] records. Every
//! mutating input (power changes, reading responses, data responses, list
//! responses) goes through one bounded `mpsc` intake queue drained by a
//! single task, so updates are applied one at a time in arrival order.
//!
//! Readers take a [`StatusView`], a cloneable read-only handle.

use std::sync::Arc;

use chrono::Utc;
use coolerhub_core::config::{VolumePolicy, defaults, topics};
use coolerhub_core::message::{DataResponse, ListResponse, ReadingResponse, ResponseStatus};
use coolerhub_core::topic::is_valid_device_id;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::state::{DeviceSlot, DeviceStateStore, DeviceStatus, StatsSnapshot};

/// Smallest statistic change worth logging.
const STATS_LOG_THRESHOLD: f64 = 0.01;

/// Input of the aggregator.
#[derive(Debug, Clone, PartialEq)]
pub enum Intake {
    /// Accepted power command.
    PowerStateChanged { device_id: String, state: bool },
    /// Accepted command that does not change state; only ensures the record.
    DeviceObserved { device_id: String },
    ReadingResponse(ReadingResponse),
    DataResponse(DataResponse),
    ListResponse(ListResponse),
}

impl Intake {
    pub fn kind(&self) -> &'static str {
        match self {
            Intake::PowerStateChanged { .. } => "power_state_changed",
            Intake::DeviceObserved { .. } => "device_observed",
            Intake::ReadingResponse(_) => "reading_response",
            Intake::DataResponse(_) => "data_response",
            Intake::ListResponse(_) => "list_response",
        }
    }
}

/// Why an input was dropped.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejected {
    #[error("response status is {status:?}: {}", .error.as_deref().unwrap_or("no error message"))]
    FailureStatus {
        status: ResponseStatus,
        error: Option<String>,
    },

    #[error("reading response carries no reading")]
    MissingReading,

    #[error("missing or invalid device id '{0}'")]
    MissingDeviceId(String),
}

/// Result of applying one input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Applied {
    /// Records created by this input.
    pub created: usize,
}

/// Read-only view of the aggregator state.
#[derive(Clone)]
pub struct StatusView {
    inner: Arc<RwLock<DeviceStateStore>>,
}

impl StatusView {
    /// Snapshot of every record, in first-observation order.
    pub fn current_statuses(&self) -> Vec<DeviceStatus> {
        self.inner.read().iter().cloned().collect()
    }

    pub fn get(&self, device_id: &str) -> Option<DeviceStatus> {
        self.inner.read().by_id(device_id).cloned()
    }

    pub fn device_ids(&self) -> Vec<String> {
        self.inner.read().ids()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sending side of the intake queue.
#[derive(Clone)]
pub struct AggregatorHandle {
    tx: mpsc::Sender<Intake>,
}

impl AggregatorHandle {
    /// Queue an input. Waits for capacity; fails only when the aggregator is gone.
    pub async fn submit(&self, intake: Intake) -> coolerhub_core::Result<()> {
        self.tx
            .send(intake)
            .await
            .map_err(|_| coolerhub_core::Error::Transport("aggregator stopped".to_string()))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Owner of all device records.
pub struct Aggregator {
    store: Arc<RwLock<DeviceStateStore>>,
    policy: VolumePolicy,
}

impl Aggregator {
    pub fn new(policy: VolumePolicy) -> Self {
        if policy == VolumePolicy::FromStatsLastValue {
            warn!("volume policy from_stats_last_value double-counts litres when reading responses are consumed too");
        }
        Self {
            store: Arc::new(RwLock::new(DeviceStateStore::new())),
            policy,
        }
    }

    /// Pre-create records for a configured roster.
    pub fn with_roster<I, S>(self, roster: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        {
            let mut store = self.store.write();
            for id in roster {
                let id = id.as_ref();
                if is_valid_device_id(id) {
                    store.ensure(id);
                } else {
                    warn!(device_id = %id, "ignoring invalid roster entry");
                }
            }
        }
        self
    }

    pub fn view(&self) -> StatusView {
        StatusView {
            inner: Arc::clone(&self.store),
        }
    }

    /// Start the aggregator task.
    ///
    /// Dropping every handle closes the queue; the task drains what is
    /// queued and exits.
    pub fn spawn(self, capacity: usize) -> (AggregatorHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(self.run(rx));
        (AggregatorHandle { tx }, task)
    }

    /// Start with the default queue capacity.
    pub fn spawn_default(self) -> (AggregatorHandle, JoinHandle<()>) {
        self.spawn(defaults::INTAKE_CAPACITY)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Intake>) {
        info!(policy = ?self.policy, "aggregator started");
        while let Some(intake) = rx.recv().await {
            let kind = intake.kind();
            if let Err(rejected) = self.apply(intake) {
                warn!(intake = kind, reason = %rejected, "input dropped");
            }
        }
        info!("aggregator stopped");
    }

    /// Apply one input.
    pub fn apply(&mut self, intake: Intake) -> Result<Applied, Rejected> {
        let mut store = self.store.write();
        match intake {
            Intake::PowerStateChanged { device_id, state } => {
                let (slot, created) = ensure(&mut store, &device_id)?;
                let status = store.get_mut(slot);
                if status.is_powered_on != state {
                    info!(device_id = %device_id, state = if state { "ON" } else { "OFF" }, "power state changed");
                }
                status.is_powered_on = state;
                Ok(Applied { created: created as usize })
            }
            Intake::DeviceObserved { device_id } => {
                let (_, created) = ensure(&mut store, &device_id)?;
                Ok(Applied { created: created as usize })
            }
            Intake::ReadingResponse(response) => apply_reading(&mut store, response),
            Intake::DataResponse(response) => apply_data(&mut store, response, self.policy),
            Intake::ListResponse(response) => apply_list(&mut store, response),
        }
    }
}

fn ensure(store: &mut DeviceStateStore, device_id: &str) -> Result<(DeviceSlot, bool), Rejected> {
    if !is_valid_device_id(device_id) {
        return Err(Rejected::MissingDeviceId(device_id.to_string()));
    }
    let (slot, created) = store.ensure(device_id);
    if created {
        info!(device_id = %device_id, "created status record");
    }
    Ok((slot, created))
}

fn check_status(status: ResponseStatus, error: &Option<String>) -> Result<(), Rejected> {
    if status.is_success() {
        Ok(())
    } else {
        Err(Rejected::FailureStatus {
            status,
            error: error.clone(),
        })
    }
}

/// Add dispensed volume if the cooler is on and the flow is positive.
fn accumulate(status: &mut DeviceStatus, value: f64) {
    if !status.is_powered_on {
        info!(device_id = %status.device_id, value, "flow ignored while powered off");
    } else if value > 0.0 {
        let previous = status.total_liters_dispensed;
        status.total_liters_dispensed += value;
        info!(
            device_id = %status.device_id,
            "litres dispensed {:.2}L -> {:.2}L (+{:.2}L)",
            previous,
            status.total_liters_dispensed,
            value
        );
    } else {
        debug!(device_id = %status.device_id, value, "zero or negative flow ignored");
    }
}

fn apply_reading(store: &mut DeviceStateStore, response: ReadingResponse) -> Result<Applied, Rejected> {
    check_status(response.status, &response.error)?;
    let reading = response.reading.ok_or(Rejected::MissingReading)?;
    let (slot, created) = ensure(store, &reading.device_id)?;

    let status = store.get_mut(slot);
    status
        .last_readings
        .insert(reading.measurement.clone(), reading.value);
    status.last_update_time = reading.timestamp;
    if reading.measurement == topics::WATER_FLOW {
        accumulate(status, reading.value);
    }

    debug!(
        device_id = %reading.device_id,
        measurement = %reading.measurement,
        value = reading.value,
        "reading absorbed"
    );
    Ok(Applied { created: created as usize })
}

fn apply_data(
    store: &mut DeviceStateStore,
    response: DataResponse,
    policy: VolumePolicy,
) -> Result<Applied, Rejected> {
    check_status(response.status, &response.error)?;
    let device_id = response.cooler_id.unwrap_or_default();
    let (slot, created) = ensure(store, &device_id)?;

    let status = store.get_mut(slot);
    let observed_at = Utc::now();
    for (measurement, stats) in &response.stats {
        let snapshot = StatsSnapshot::from_stats(stats, observed_at);
        match status.stats.get(measurement) {
            Some(old) => log_stats_diff(&device_id, measurement, old, &snapshot),
            None => info!(
                device_id = %device_id,
                measurement = %measurement,
                average = snapshot.average,
                min = snapshot.min,
                max = snapshot.max,
                last_value = snapshot.last_value,
                "first statistics"
            ),
        }
        status.stats.insert(measurement.clone(), snapshot);
        status
            .last_readings
            .insert(measurement.clone(), snapshot.last_value);

        if policy == VolumePolicy::FromStatsLastValue && measurement == topics::WATER_FLOW {
            accumulate(status, snapshot.last_value);
        }
    }
    if let Some(last_update) = response.last_update {
        status.last_update_time = last_update;
    }
    Ok(Applied { created: created as usize })
}

fn apply_list(store: &mut DeviceStateStore, response: ListResponse) -> Result<Applied, Rejected> {
    check_status(response.status, &response.error)?;
    let mut applied = Applied::default();
    for id in &response.coolers {
        match ensure(store, id) {
            Ok((_, true)) => applied.created += 1,
            Ok(_) => {}
            Err(rejected) => warn!(reason = %rejected, "skipping list entry"),
        }
    }
    Ok(applied)
}

fn log_stats_diff(device_id: &str, measurement: &str, old: &StatsSnapshot, new: &StatsSnapshot) {
    let fields = [
        ("average", old.average, new.average),
        ("min", old.min, new.min),
        ("max", old.max, new.max),
        ("last_value", old.last_value, new.last_value),
    ];
    for (field, before, after) in fields {
        if (before - after).abs() > STATS_LOG_THRESHOLD {
            info!(
                device_id = %device_id,
                measurement = %measurement,
                field,
                "statistic changed {:.2} -> {:.2}",
                before,
                after
            );
        }
    }
}
