//! Reading persistence using redb database.
//!
//! Readings are append-only. Keys are `(device_id, timestamp_micros, seq)` so
//! a reverse range scan over one device yields its history newest-first; the
//! sequence number keeps readings with equal timestamps distinct and orders
//! them by arrival.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use coolerhub_core::config::defaults;
use coolerhub_core::message::Reading;
use redb::{Database, ReadableTable, TableDefinition};

use crate::error::{Error, Result};

// Table definitions
const READINGS_TABLE: TableDefinition<(&str, i64, u64), &[u8]> = TableDefinition::new("readings");
const DEVICES_TABLE: TableDefinition<&str, u64> = TableDefinition::new("devices");
const META_TABLE: TableDefinition<&str, u64> = TableDefinition::new("meta");

const NEXT_SEQ_KEY: &str = "next_seq";

/// Persistent, append-only reading history.
pub struct ReadingStore {
    db: Database,
    path: String,
    /// Temp file path for cleanup (if using memory mode).
    temp_path: Option<PathBuf>,
}

impl ReadingStore {
    /// Open or create a store at the given path. `:memory:` opens a
    /// throw-away database backed by a temp file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Arc<Self>> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let (db, temp_path) = Self::open_db(&path_str)?;

        let store = ReadingStore {
            db,
            path: path_str,
            temp_path,
        };
        store.ensure_tables()?;

        tracing::debug!(path = %store.path, "reading store opened");
        Ok(Arc::new(store))
    }

    /// Create an in-memory store.
    pub fn memory() -> Result<Arc<Self>> {
        Self::open(defaults::MEMORY_STORAGE)
    }

    fn open_db(path_str: &str) -> Result<(Database, Option<PathBuf>)> {
        if path_str == defaults::MEMORY_STORAGE {
            let temp_path = std::env::temp_dir()
                .join(format!("coolerhub_readings_{}.redb", uuid::Uuid::new_v4()));
            let db = Database::create(&temp_path)?;
            return Ok((db, Some(temp_path)));
        }

        let path_ref = Path::new(path_str);
        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = if path_ref.exists() {
            Database::open(path_ref)?
        } else {
            Database::create(path_ref)?
        };
        Ok((db, None))
    }

    fn ensure_tables(&self) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            write_txn.open_table(READINGS_TABLE)?;
            write_txn.open_table(DEVICES_TABLE)?;
            write_txn.open_table(META_TABLE)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Storage path (`:memory:` for temporary stores).
    pub fn path(&self) -> &str {
        if self.temp_path.is_some() {
            defaults::MEMORY_STORAGE
        } else {
            &self.path
        }
    }

    /// Append a reading. Returns its sequence number.
    pub fn append(&self, reading: &Reading) -> Result<u64> {
        if reading.device_id.is_empty() {
            return Err(Error::InvalidInput("reading has no device id".to_string()));
        }
        if reading.measurement.is_empty() {
            return Err(Error::InvalidInput("reading has no measurement".to_string()));
        }

        let value = serde_json::to_vec(reading)?;
        let ts = reading.timestamp.timestamp_micros();

        let write_txn = self.db.begin_write()?;
        let seq = {
            let mut meta = write_txn.open_table(META_TABLE)?;
            let seq = meta.get(NEXT_SEQ_KEY)?.map(|v| v.value()).unwrap_or(0);
            meta.insert(NEXT_SEQ_KEY, seq + 1)?;

            let mut devices = write_txn.open_table(DEVICES_TABLE)?;
            let count = devices
                .get(reading.device_id.as_str())?
                .map(|v| v.value())
                .unwrap_or(0);
            devices.insert(reading.device_id.as_str(), count + 1)?;

            let mut table = write_txn.open_table(READINGS_TABLE)?;
            table.insert((reading.device_id.as_str(), ts, seq), value.as_slice())?;
            seq
        };
        write_txn.commit()?;

        Ok(seq)
    }

    /// The `limit` most recent readings of a device, newest first.
    pub fn latest(&self, device_id: &str, limit: usize) -> Result<Vec<Reading>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(READINGS_TABLE)?;

        let start_key = (device_id, i64::MIN, 0u64);
        let end_key = (device_id, i64::MAX, u64::MAX);

        let mut readings = Vec::with_capacity(limit);
        for result in table.range(start_key..=end_key)?.rev().take(limit) {
            let (_key, value) = result?;
            readings.push(serde_json::from_slice(value.value())?);
        }
        Ok(readings)
    }

    /// Distinct device ids that have at least one reading, sorted.
    pub fn list_devices(&self) -> Result<Vec<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DEVICES_TABLE)?;

        let mut ids = Vec::new();
        for result in table.iter()? {
            let (key, _) = result?;
            ids.push(key.value().to_string());
        }
        Ok(ids)
    }

    /// Number of readings stored for a device.
    pub fn count(&self, device_id: &str) -> Result<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DEVICES_TABLE)?;
        Ok(table.get(device_id)?.map(|v| v.value()).unwrap_or(0))
    }

    /// Run a store operation on the blocking pool.
    pub async fn run<F, T>(self: &Arc<Self>, f: F) -> Result<T>
    where
        F: FnOnce(&ReadingStore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(self);
        tokio::task::spawn_blocking(move || f(&store)).await?
    }
}

impl Drop for ReadingStore {
    fn drop(&mut self) {
        if let Some(temp_path) = &self.temp_path {
            let _ = std::fs::remove_file(temp_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn reading(device: &str, measurement: &str, value: f64, secs: i64) -> Reading {
        let base = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        Reading::new(device, measurement, value, base + Duration::seconds(secs))
    }

    #[test]
    fn test_latest_is_newest_first_and_bounded() {
        let store = ReadingStore::memory().unwrap();
        for i in 0..15 {
            store.append(&reading("c1", "water_flow", i as f64, i)).unwrap();
        }
        store.append(&reading("c2", "water_flow", 99.0, 100)).unwrap();

        let latest = store.latest("c1", 10).unwrap();
        assert_eq!(latest.len(), 10);
        assert_eq!(latest[0].value, 14.0);
        assert_eq!(latest[9].value, 5.0);
        assert!(latest.iter().all(|r| r.device_id == "c1"));
    }

    #[test]
    fn test_out_of_order_timestamps_sort_by_timestamp() {
        let store = ReadingStore::memory().unwrap();
        store.append(&reading("c1", "water_flow", 2.0, 20)).unwrap();
        store.append(&reading("c1", "water_flow", 1.0, 10)).unwrap();
        store.append(&reading("c1", "water_flow", 3.0, 30)).unwrap();

        let values: Vec<f64> = store.latest("c1", 10).unwrap().iter().map(|r| r.value).collect();
        assert_eq!(values, vec![3.0, 2.0, 1.0]);
    }

    #[test]
    fn test_equal_timestamps_keep_arrival_order() {
        let store = ReadingStore::memory().unwrap();
        let first = store.append(&reading("c1", "water_flow", 1.0, 0)).unwrap();
        let second = store.append(&reading("c1", "water_temperature", 2.0, 0)).unwrap();
        assert!(second > first);

        let latest = store.latest("c1", 10).unwrap();
        assert_eq!(latest[0].measurement, "water_temperature");
    }

    #[test]
    fn test_list_devices_and_count() {
        let store = ReadingStore::memory().unwrap();
        assert!(store.list_devices().unwrap().is_empty());
        assert!(store.latest("nobody", 10).unwrap().is_empty());

        store.append(&reading("c2", "water_flow", 1.0, 0)).unwrap();
        store.append(&reading("c1", "water_flow", 1.0, 0)).unwrap();
        store.append(&reading("c1", "water_flow", 1.0, 1)).unwrap();

        assert_eq!(store.list_devices().unwrap(), vec!["c1", "c2"]);
        assert_eq!(store.count("c1").unwrap(), 2);
        assert_eq!(store.count("c3").unwrap(), 0);
    }

    #[test]
    fn test_reading_without_device_is_rejected() {
        let store = ReadingStore::memory().unwrap();
        let err = store.append(&reading("", "water_flow", 1.0, 0)).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(store.list_devices().unwrap().is_empty());
    }

    #[test]
    fn test_memory_store_removes_temp_file() {
        let store = ReadingStore::memory().unwrap();
        assert_eq!(store.path(), ":memory:");
        let temp = store.temp_path.clone().unwrap();
        assert!(temp.exists());
        drop(store);
        assert!(!temp.exists());
    }

    #[tokio::test]
    async fn test_run_on_blocking_pool() {
        let store = ReadingStore::memory().unwrap();
        let r = reading("c1", "water_flow", 4.0, 0);
        store.run(move |s| s.append(&r)).await.unwrap();
        let ids = store.run(|s| s.list_devices()).await.unwrap();
        assert_eq!(ids, vec!["c1"]);
    }
}
