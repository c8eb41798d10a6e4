//! Windowed statistics.
//!
//! Statistics are recomputed on every query from the newest readings of a
//! device. Nothing is maintained incrementally.

use std::collections::BTreeMap;
use std::sync::Arc;

use coolerhub_core::config::defaults;
use coolerhub_core::message::{DataResponse, MeasurementStats, Reading};

use crate::error::Result;
use crate::readings::ReadingStore;

/// Group readings by measurement and compute average/min/max/last.
///
/// `readings` must be ordered newest first; `lastValue` is the first value
/// seen for each measurement.
pub fn compute_stats(readings: &[Reading]) -> BTreeMap<String, MeasurementStats> {
    struct Acc {
        sum: f64,
        count: usize,
        min: f64,
        max: f64,
        last: f64,
    }

    let mut groups: BTreeMap<&str, Acc> = BTreeMap::new();
    for r in readings {
        groups
            .entry(r.measurement.as_str())
            .and_modify(|acc| {
                acc.sum += r.value;
                acc.count += 1;
                acc.min = acc.min.min(r.value);
                acc.max = acc.max.max(r.value);
            })
            .or_insert(Acc {
                sum: r.value,
                count: 1,
                min: r.value,
                max: r.value,
                last: r.value,
            });
    }

    groups
        .into_iter()
        .map(|(measurement, acc)| {
            (
                measurement.to_string(),
                MeasurementStats {
                    average: acc.sum / acc.count as f64,
                    min: acc.min,
                    max: acc.max,
                    last_value: acc.last,
                },
            )
        })
        .collect()
}

/// Answers data and list queries from the reading store.
#[derive(Clone)]
pub struct StatsEngine {
    store: Arc<ReadingStore>,
    window: usize,
}

impl StatsEngine {
    pub fn new(store: Arc<ReadingStore>) -> Self {
        Self {
            store,
            window: defaults::STATS_WINDOW,
        }
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window.max(1);
        self
    }

    pub fn store(&self) -> &Arc<ReadingStore> {
        &self.store
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Data response for a device. A device without readings yields empty
    /// statistics, not an error.
    pub async fn data(&self, device_id: &str) -> Result<DataResponse> {
        let id = device_id.to_string();
        let window = self.window;
        let readings = self.store.run(move |s| s.latest(&id, window)).await?;
        let stats = compute_stats(&readings);
        Ok(DataResponse::success(device_id, stats, readings))
    }

    /// Distinct device ids with stored readings.
    pub async fn devices(&self) -> Result<Vec<String>> {
        self.store.run(|s| s.list_devices()).await
    }

    /// Persist a reading.
    pub async fn record(&self, reading: Reading) -> Result<Reading> {
        self.store
            .run(move |s| {
                s.append(&reading)?;
                Ok(reading)
            })
            .await
    }
}
