//! End-to-end scenarios on the in-process exchange.
//!
//! Each test starts a full hub (aggregator, intake service, query responder)
//! on a `MemoryExchange` and drives it purely through published messages.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use coolerhub_core::config::MonitorConfig;
use coolerhub_core::message::{DataResponse, ListResponse, ReadingResponse, decode};
use coolerhub_core::{DynTransport, Transport};
use coolerhub_devices::{CoolerHub, MemoryExchange, StatusReport, VirtualCooler};
use coolerhub_storage::{ReadingStore, StatsEngine};
use tokio::test;

fn monitor() -> MonitorConfig {
    MonitorConfig {
        refresh_interval_secs: 0,
        ..MonitorConfig::default()
    }
}

async fn start_hub() -> (Arc<MemoryExchange>, CoolerHub) {
    let exchange = MemoryExchange::new("water_coolers");
    let transport: DynTransport = exchange.clone();
    let engine = StatsEngine::new(ReadingStore::memory().unwrap());
    let hub = CoolerHub::start(transport, &monitor(), Some(engine)).await.unwrap();
    (exchange, hub)
}

async fn eventually<F: Fn() -> bool>(what: &str, condition: F) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {}", what);
}

fn reading_json(id: &str, measurement: &str, value: f64, timestamp: &str) -> Vec<u8> {
    format!(
        r#"{{"coolerId":"{}","measurement":"{}","value":{},"timestamp":"{}"}}"#,
        id, measurement, value, timestamp
    )
    .into_bytes()
}

#[test]
async fn test_flow_reading_accumulates_litres() {
    let (exchange, hub) = start_hub().await;
    let mut responses = exchange.subscribe("water_coolers.*.readings.response").await.unwrap();

    exchange
        .publish(
            "water_coolers.c1.readings",
            reading_json("c1", "water_flow", 5.0, "2024-03-01T10:00:00Z"),
        )
        .await
        .unwrap();

    let response: ReadingResponse = decode(&responses.recv().await.unwrap().payload).unwrap();
    assert!(response.status.is_success());
    assert_eq!(response.reading.unwrap().device_id, "c1");

    let view = hub.view().clone();
    eventually("c1 absorbs the reading", || {
        view.get("c1").is_some_and(|s| s.total_liters_dispensed == 5.0)
    })
    .await;

    let status = view.get("c1").unwrap();
    assert!(status.is_powered_on);
    assert_eq!(status.last_readings["water_flow"], 5.0);
    assert_eq!(
        status.last_update_time,
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
    );
    hub.shutdown().await;
}

#[test]
async fn test_power_off_stops_accumulation() {
    let (exchange, hub) = start_hub().await;
    let view = hub.view().clone();

    exchange
        .publish(
            "water_coolers/c1/readings",
            reading_json("c1", "water_flow", 2.0, "2024-03-01T10:00:00Z"),
        )
        .await
        .unwrap();
    eventually("first reading", || {
        view.get("c1").is_some_and(|s| s.total_liters_dispensed == 2.0)
    })
    .await;

    exchange
        .publish("commands.c1", br#"{"action":"power","state":false}"#.to_vec())
        .await
        .unwrap();
    exchange
        .publish(
            "water_coolers.c1.readings",
            reading_json("c1", "water_flow", 5.0, "2024-03-01T10:00:05Z"),
        )
        .await
        .unwrap();
    eventually("second reading", || {
        view.get("c1")
            .is_some_and(|s| s.last_readings.get("water_flow") == Some(&5.0))
    })
    .await;

    let status = view.get("c1").unwrap();
    assert!(!status.is_powered_on);
    assert_eq!(status.total_liters_dispensed, 2.0);
    hub.shutdown().await;
}

#[test]
async fn test_malformed_reading_creates_nothing() {
    let (exchange, hub) = start_hub().await;
    let view = hub.view().clone();

    exchange
        .publish(
            "water_coolers.c1.readings",
            reading_json("c1", "water_flow", 3.0, "2024-03-01T10:00:00Z"),
        )
        .await
        .unwrap();
    exchange
        .publish("water_coolers.c9.readings", b"{\"coolerId\": \"c9\", ".to_vec())
        .await
        .unwrap();
    exchange
        .publish(
            "water_coolers.c2.readings",
            reading_json("c2", "water_temperature", 11.0, "2024-03-01T10:00:00Z"),
        )
        .await
        .unwrap();

    eventually("c1 and c2 observed", || {
        view.get("c2").is_some() && view.get("c1").is_some_and(|s| s.total_liters_dispensed == 3.0)
    })
    .await;
    assert!(view.get("c9").is_none());
    assert_eq!(view.device_ids(), vec!["c1", "c2"]);
    hub.shutdown().await;
}

#[test]
async fn test_storage_failure_is_answered_with_error() {
    let (exchange, hub) = start_hub().await;
    let view = hub.view().clone();
    let mut responses = exchange.subscribe("water_coolers.c1.readings.response").await.unwrap();

    exchange
        .publish(
            "water_coolers.c1.readings",
            reading_json("c1", "", 1.0, "2024-03-01T10:00:00Z"),
        )
        .await
        .unwrap();

    let message = responses.recv().await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&message.payload).unwrap();
    assert_eq!(json["status"], "error");
    assert_eq!(json["error"], "Invalid input: reading has no measurement");
    let response: ReadingResponse = decode(&message.payload).unwrap();
    assert!(!response.status.is_success());
    assert!(response.reading.is_none());

    // A later reading for another device gets through; c1 never shows up.
    exchange
        .publish(
            "water_coolers.c2.readings",
            reading_json("c2", "water_flow", 1.0, "2024-03-01T10:00:01Z"),
        )
        .await
        .unwrap();
    eventually("c2 observed", || view.get("c2").is_some()).await;
    assert!(view.get("c1").is_none());
    assert_eq!(hub.engine().unwrap().store().count("c1").unwrap(), 0);
    hub.shutdown().await;
}

#[test]
async fn test_non_boolean_power_state_keeps_record_on() {
    let (exchange, hub) = start_hub().await;
    let view = hub.view().clone();
    let mut events = hub.event_bus().subscribe();

    exchange
        .publish(
            "water_coolers.c1.readings",
            reading_json("c1", "water_flow", 1.0, "2024-03-01T10:00:00Z"),
        )
        .await
        .unwrap();
    eventually("c1 created powered on", || view.get("c1").is_some_and(|s| s.is_powered_on)).await;

    exchange
        .publish("commands.c1", br#"{"action":"power","state":"off"}"#.to_vec())
        .await
        .unwrap();
    exchange
        .publish("commands.c1", br#"{"action":"maintenance","enabled":true}"#.to_vec())
        .await
        .unwrap();

    // Commands are handled in order, so the maintenance event comes after the rejection.
    let (event, _) = events.recv().await.unwrap();
    assert_eq!(event.type_name(), "MaintenanceModeChanged");
    assert!(view.get("c1").unwrap().is_powered_on);
    hub.shutdown().await;
}

#[test]
async fn test_rejected_commands_never_touch_state() {
    let (exchange, hub) = start_hub().await;
    let view = hub.view().clone();
    let mut events = hub.event_bus().subscribe();

    exchange
        .publish("commands/c5/reboot", br#"{"action":"reboot","state":true}"#.to_vec())
        .await
        .unwrap();
    exchange
        .publish("commands.c5", br#"{"action":"power","state":"off"}"#.to_vec())
        .await
        .unwrap();
    exchange
        .publish("commands.c5", b"not json".to_vec())
        .await
        .unwrap();
    exchange
        .publish("commands.c6", br#"{"action":"maintenance","enabled":true}"#.to_vec())
        .await
        .unwrap();

    // The only accepted command is the maintenance one.
    let (event, _) = events.recv().await.unwrap();
    assert_eq!(event.type_name(), "MaintenanceModeChanged");
    eventually("c6 observed", || view.get("c6").is_some()).await;
    assert!(view.get("c5").is_none());
    hub.shutdown().await;
}

#[test]
async fn test_data_query_round_trip_replaces_stats() {
    let (exchange, hub) = start_hub().await;
    let view = hub.view().clone();
    let mut data = exchange.subscribe("water_coolers/+/data/response").await.unwrap();
    let mut stored = exchange.subscribe("water_coolers.c1.readings.response").await.unwrap();

    // One at a time, so the aggregator sees them in timestamp order.
    for (i, value) in [30.0, 20.0, 10.0].into_iter().enumerate() {
        exchange
            .publish(
                "water_coolers.c1.readings",
                reading_json("c1", "water_temperature", value, &format!("2024-03-01T10:00:0{}Z", i)),
            )
            .await
            .unwrap();
        stored.recv().await.unwrap();
    }
    eventually("three readings", || {
        view.get("c1")
            .is_some_and(|s| s.last_readings.get("water_temperature") == Some(&10.0))
    })
    .await;

    exchange
        .publish("water_coolers.c1.data", br#"{"correlationId":"q-7"}"#.to_vec())
        .await
        .unwrap();

    let response: DataResponse = decode(&data.recv().await.unwrap().payload).unwrap();
    assert_eq!(response.correlation_id.as_deref(), Some("q-7"));
    assert_eq!(response.readings.len(), 3);
    let temp = response.stats["water_temperature"];
    assert_eq!((temp.average, temp.min, temp.max, temp.last_value), (20.0, 10.0, 30.0, 10.0));

    eventually("stats absorbed", || {
        view.get("c1").is_some_and(|s| s.stats.contains_key("water_temperature"))
    })
    .await;
    let status = view.get("c1").unwrap();
    assert_eq!(status.stats["water_temperature"].average, 20.0);
    assert_eq!(status.last_readings["water_temperature"], 10.0);
    assert_eq!(status.total_liters_dispensed, 0.0);
    hub.shutdown().await;
}

#[test]
async fn test_list_query_precreates_records() {
    let exchange = MemoryExchange::new("water_coolers");
    let store = ReadingStore::memory().unwrap();
    let at = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
    for id in ["c3", "c4"] {
        store
            .append(&coolerhub_core::message::Reading::new(id, "water_flow", 1.0, at))
            .unwrap();
    }
    let hub = CoolerHub::start(exchange.clone(), &monitor(), Some(StatsEngine::new(store)))
        .await
        .unwrap();
    let mut lists = exchange.subscribe("water_coolers.list.response").await.unwrap();

    exchange.publish("water_coolers/list", Vec::new()).await.unwrap();

    let list: ListResponse = decode(&lists.recv().await.unwrap().payload).unwrap();
    assert_eq!(list.total, 2);
    assert_eq!(list.coolers, vec!["c3", "c4"]);

    let view = hub.view().clone();
    eventually("records created", || view.len() == 2).await;
    let status = view.get("c3").unwrap();
    assert_eq!(status.total_liters_dispensed, 0.0);
    assert!(status.last_readings.is_empty());
    hub.shutdown().await;
}

#[test]
async fn test_status_query_publishes_report() {
    let (exchange, hub) = start_hub().await;
    let view = hub.view().clone();
    let mut reports = exchange.subscribe("commands.#.response").await.unwrap();

    exchange
        .publish("commands.c1", br#"{"action":"power","state":false}"#.to_vec())
        .await
        .unwrap();
    eventually("c1 powered off", || view.get("c1").is_some_and(|s| !s.is_powered_on)).await;

    exchange.publish("commands/status", Vec::new()).await.unwrap();
    let message = reports.recv().await.unwrap();
    assert_eq!(message.topic, "commands.status.response");
    let report: StatusReport = decode(&message.payload).unwrap();
    assert_eq!(report.total, 1);
    assert!(!report.coolers[0].is_powered_on);

    exchange.publish("commands.c2.status", Vec::new()).await.unwrap();
    let report: StatusReport = decode(&reports.recv().await.unwrap().payload).unwrap();
    assert_eq!(report.total, 0);
    hub.shutdown().await;
}

#[test]
async fn test_unknown_topics_are_ignored() {
    let (exchange, hub) = start_hub().await;
    let view = hub.view().clone();

    exchange
        .publish("water_coolers.c1.firmware", b"{}".to_vec())
        .await
        .unwrap();
    exchange
        .publish(
            "water_coolers.c2.readings",
            reading_json("c2", "water_flow", 1.0, "2024-03-01T10:00:00Z"),
        )
        .await
        .unwrap();

    eventually("c2 observed", || view.get("c2").is_some()).await;
    assert_eq!(view.len(), 1);
    hub.shutdown().await;
}

#[test]
async fn test_virtual_cooler_feeds_the_hub() {
    let (exchange, hub) = start_hub().await;
    let view = hub.view().clone();

    VirtualCooler::new("cooler_001", exchange.clone())
        .publish_once()
        .await
        .unwrap();

    eventually("both measurements stored", || {
        view.get("cooler_001").is_some_and(|s| s.last_readings.len() == 2)
    })
    .await;
    let status = view.get("cooler_001").unwrap();
    let flow = status.last_readings["water_flow"];
    assert!((0.0..10.0).contains(&flow));
    assert!((0.0..20.0).contains(&status.last_readings["water_temperature"]));
    assert!((status.total_liters_dispensed - flow).abs() < 1e-9);

    let stored = hub.engine().unwrap().store().count("cooler_001").unwrap();
    assert_eq!(stored, 2);
    hub.shutdown().await;
}
