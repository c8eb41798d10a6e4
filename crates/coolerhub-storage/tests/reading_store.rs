//! On-disk reading store tests.

use chrono::{Duration, TimeZone, Utc};
use coolerhub_core::message::Reading;
use coolerhub_storage::{ReadingStore, StatsEngine};

#[test]
fn test_readings_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("readings.redb");
    let base = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();

    {
        let store = ReadingStore::open(&path).unwrap();
        store
            .append(&Reading::new("cooler_001", "water_flow", 5.0, base))
            .unwrap();
        store
            .append(&Reading::new(
                "cooler_001",
                "water_temperature",
                11.0,
                base + Duration::seconds(1),
            ))
            .unwrap();
    }

    let store = ReadingStore::open(&path).unwrap();
    assert_eq!(store.path(), path.to_string_lossy());
    assert_eq!(store.list_devices().unwrap(), vec!["cooler_001"]);

    let latest = store.latest("cooler_001", 10).unwrap();
    assert_eq!(latest.len(), 2);
    assert_eq!(latest[0].measurement, "water_temperature");

    // Sequence numbers continue after reopen.
    let seq = store
        .append(&Reading::new("cooler_001", "water_flow", 1.0, base))
        .unwrap();
    assert_eq!(seq, 2);
}

#[tokio::test]
async fn test_stats_engine_over_disk_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = ReadingStore::open(dir.path().join("readings.redb")).unwrap();
    let engine = StatsEngine::new(store);
    let base = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();

    for (i, value) in [30.0, 20.0, 10.0].into_iter().enumerate() {
        engine
            .record(Reading::new(
                "c1",
                "water_flow",
                value,
                base + Duration::seconds(i as i64),
            ))
            .await
            .unwrap();
    }

    let data = engine.data("c1").await.unwrap();
    let flow = data.stats["water_flow"];
    assert_eq!(flow.average, 20.0);
    assert_eq!(flow.min, 10.0);
    assert_eq!(flow.max, 30.0);
    assert_eq!(flow.last_value, 10.0);
    assert_eq!(engine.devices().await.unwrap(), vec!["c1"]);
}
