//! Health check handlers.

use axum::Json;
use axum::extract::State;
use serde::Serialize;
use serde_json::json;

use super::ServerState;

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub service: String,
    pub version: &'static str,
    pub uptime: u64,
    pub aggregator: bool,
    pub transport: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected: Option<bool>,
}

/// Basic health check.
pub async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "coolerhub",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Health check with uptime and wiring.
pub async fn health_status_handler(State(state): State<ServerState>) -> Json<HealthStatus> {
    let uptime = chrono::Utc::now().timestamp() - state.started_at;

    Json(HealthStatus {
        status: "healthy".to_string(),
        service: "coolerhub".to_string(),
        version: env!("CARGO_PKG_VERSION"),
        uptime: uptime.max(0) as u64,
        aggregator: state.view.is_some(),
        transport: state.outbox.as_ref().map(|o| o.transport().name().to_string()),
        connected: state.outbox.as_ref().map(|o| o.transport().is_connected()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use coolerhub_core::Outbox;
    use coolerhub_devices::MemoryExchange;
    use coolerhub_storage::{ReadingStore, StatsEngine};

    #[tokio::test]
    async fn test_health_status_reports_wiring() {
        let state = ServerState::new(StatsEngine::new(ReadingStore::memory().unwrap()));
        let Json(health) = health_status_handler(State(state.clone())).await;
        assert_eq!(health.status, "healthy");
        assert!(!health.aggregator);
        assert!(health.transport.is_none());
        assert!(health.connected.is_none());

        let (outbox, _task) = Outbox::spawn(MemoryExchange::new("water_coolers"));
        let Json(health) = health_status_handler(State(state.with_outbox(outbox))).await;
        assert_eq!(health.transport.as_deref(), Some("water_coolers"));
        assert_eq!(health.connected, Some(true));
    }
}
