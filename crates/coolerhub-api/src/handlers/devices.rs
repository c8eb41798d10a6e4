//! Device handlers.
//!
//! `GET /devices` lists ids with stored readings, `GET /devices/:id`
//! returns the data response of one device and `POST /devices/:id` stores a
//! reading. The same handlers serve the `/water_coolers` paths.

use axum::body::Bytes;
use axum::extract::{Path, State};
use coolerhub_core::message::{
    DataResponse, ListResponse, Reading, ReadingResponse, decode, encode,
};
use coolerhub_core::topic::{TopicKind, is_valid_device_id, kind_to_topic};
use coolerhub_devices::DeviceStatus;
use tracing::{debug, info, warn};

use super::ServerState;
use crate::models::{ErrorResponse, HandlerResult, ok};

fn checked_id(id: &str) -> Result<(), ErrorResponse> {
    if is_valid_device_id(id) {
        Ok(())
    } else {
        Err(ErrorResponse::bad_request(format!("invalid device id '{}'", id)))
    }
}

/// List devices with stored readings.
///
/// GET /devices
pub async fn list_devices_handler(State(state): State<ServerState>) -> HandlerResult<ListResponse> {
    let ids = state.engine.devices().await?;
    ok(ListResponse::success(ids))
}

/// Statistics and latest readings of one device.
///
/// GET /devices/:id
pub async fn get_device_handler(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> HandlerResult<DataResponse> {
    checked_id(&id)?;
    ok(state.engine.data(&id).await?)
}

/// Store a reading for a device. The id comes from the path; a `coolerId`
/// in the body is overridden.
///
/// POST /devices/:id
pub async fn post_reading_handler(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    body: Bytes,
) -> HandlerResult<ReadingResponse> {
    checked_id(&id)?;
    let mut reading: Reading =
        decode(&body).map_err(|e| ErrorResponse::bad_request(e.to_string()))?;
    if !reading.device_id.is_empty() && reading.device_id != id {
        debug!(path_id = %id, body_id = %reading.device_id, "body id overridden by path");
    }
    reading.device_id = id;

    let reading = state.engine.record(reading).await?;
    info!(
        device_id = %reading.device_id,
        measurement = %reading.measurement,
        value = reading.value,
        "reading received over HTTP"
    );

    let topic = state.outbox.as_ref().map(|o| {
        kind_to_topic(TopicKind::ReadingResponse, &reading.device_id, o.transport().dialect())
    });
    let response = ReadingResponse::success(reading);
    if let (Some(outbox), Some(topic)) = (&state.outbox, topic) {
        match encode(&response) {
            Ok(payload) => outbox.publish(topic, payload),
            Err(e) => warn!(error = %e, "failed to encode reading response"),
        }
    }
    ok(response)
}

/// Aggregated state of every known device.
///
/// GET /statuses
pub async fn statuses_handler(State(state): State<ServerState>) -> HandlerResult<Vec<DeviceStatus>> {
    let view = state
        .view
        .as_ref()
        .ok_or_else(|| ErrorResponse::service_unavailable("aggregator not running"))?;
    ok(view.current_statuses())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Json;
    use axum::http::StatusCode;
    use coolerhub_core::config::VolumePolicy;
    use coolerhub_core::{Outbox, Transport};
    use coolerhub_devices::{Aggregator, MemoryExchange};
    use coolerhub_storage::{ReadingStore, StatsEngine};

    fn test_state() -> ServerState {
        ServerState::new(StatsEngine::new(ReadingStore::memory().unwrap()))
    }

    fn body(json: &str) -> Bytes {
        Bytes::from(json.to_string())
    }

    #[tokio::test]
    async fn test_post_then_get_device() {
        let state = test_state();
        for (value, ts) in [(10.0, "10:00:00"), (20.0, "10:00:01"), (30.0, "10:00:02")] {
            let Json(response) = post_reading_handler(
                State(state.clone()),
                Path("c1".to_string()),
                body(&format!(
                    r#"{{"measurement":"water_temperature","value":{},"timestamp":"2024-03-01T{}Z"}}"#,
                    value, ts
                )),
            )
            .await
            .unwrap();
            assert!(response.status.is_success());
            assert_eq!(response.reading.unwrap().device_id, "c1");
        }

        let Json(data) = get_device_handler(State(state.clone()), Path("c1".to_string()))
            .await
            .unwrap();
        assert_eq!(data.cooler_id.as_deref(), Some("c1"));
        assert_eq!(data.readings.len(), 3);
        let stats = data.stats["water_temperature"];
        assert_eq!(stats.average, 20.0);
        assert_eq!(stats.last_value, 30.0);

        let Json(list) = list_devices_handler(State(state)).await.unwrap();
        assert_eq!(list.coolers, vec!["c1"]);
    }

    #[tokio::test]
    async fn test_path_id_overrides_body() {
        let state = test_state();
        let Json(response) = post_reading_handler(
            State(state),
            Path("c2".to_string()),
            body(r#"{"coolerId":"other","measurement":"water_flow","value":1.5,"timestamp":"2024-03-01T10:00:00Z"}"#),
        )
        .await
        .unwrap();
        assert_eq!(response.reading.unwrap().device_id, "c2");
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let state = test_state();
        let err = post_reading_handler(
            State(state.clone()),
            Path("c1".to_string()),
            body(r#"{"measurement":"water_flow","value":"#),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err = post_reading_handler(
            State(state.clone()),
            Path("c1".to_string()),
            body(r#"{"measurement":"","value":1,"timestamp":"2024-03-01T10:00:00Z"}"#),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let Json(list) = list_devices_handler(State(state)).await.unwrap();
        assert_eq!(list.total, 0);
    }

    #[tokio::test]
    async fn test_reserved_id_is_rejected() {
        let err = get_device_handler(State(test_state()), Path("status".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_device_has_empty_stats() {
        let Json(data) = get_device_handler(State(test_state()), Path("ghost".to_string()))
            .await
            .unwrap();
        assert!(data.status.is_success());
        assert!(data.stats.is_empty());
        assert!(data.readings.is_empty());
    }

    #[tokio::test]
    async fn test_post_announces_reading_on_transport() {
        let exchange = MemoryExchange::new("test");
        let mut responses = exchange.subscribe("water_coolers.*.readings.response").await.unwrap();
        let (outbox, _task) = Outbox::spawn(exchange.clone());
        let state = test_state().with_outbox(outbox);

        post_reading_handler(
            State(state),
            Path("c3".to_string()),
            body(r#"{"measurement":"water_flow","value":4,"timestamp":"2024-03-01T10:00:00Z"}"#),
        )
        .await
        .unwrap();

        let message = responses.recv().await.unwrap();
        assert_eq!(message.topic, "water_coolers.c3.readings.response");
        let announced: ReadingResponse = decode(&message.payload).unwrap();
        assert_eq!(announced.reading.unwrap().value, 4.0);
    }

    #[tokio::test]
    async fn test_statuses_require_aggregator() {
        let err = statuses_handler(State(test_state())).await.unwrap_err();
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);

        let view = Aggregator::new(VolumePolicy::default())
            .with_roster(["cooler_001"])
            .view();
        let Json(statuses) = statuses_handler(State(test_state().with_view(view)))
            .await
            .unwrap();
        assert_eq!(statuses.len(), 1);
        assert!(statuses[0].is_powered_on);
    }
}
