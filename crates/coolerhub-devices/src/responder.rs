//! Query responder.
//!
//! Answers the request half of the protocol from the reading store: raw
//! readings are persisted and echoed on the reading response topic, data and
//! list queries are answered with freshly computed statistics. Requests are
//! handled in arrival order by one task; storage work runs on the blocking
//! pool and responses leave through one ordered outbox.

use coolerhub_core::message::{
    DataResponse, ListResponse, QueryRequest, Reading, ReadingResponse, decode, encode,
};
use coolerhub_core::topic::{Route, TopicKind, response_topic};
use coolerhub_core::{InboundMessage, Outbox};
use coolerhub_storage::StatsEngine;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Sending side of the responder queue.
#[derive(Clone)]
pub struct ResponderHandle {
    tx: mpsc::Sender<(Route, InboundMessage)>,
}

impl ResponderHandle {
    /// Queue a request. Requests of other kinds are ignored.
    pub async fn submit(&self, route: Route, message: InboundMessage) -> coolerhub_core::Result<()> {
        if !matches!(route.kind, TopicKind::Reading | TopicKind::DataQuery | TopicKind::ListQuery) {
            return Ok(());
        }
        self.tx
            .send((route, message))
            .await
            .map_err(|_| coolerhub_core::Error::Transport("query responder stopped".to_string()))
    }
}

/// Server side of the reading/data/list protocol.
#[derive(Clone)]
pub struct QueryResponder {
    engine: StatsEngine,
    outbox: Outbox,
}

impl QueryResponder {
    pub fn new(engine: StatsEngine, outbox: Outbox) -> Self {
        Self { engine, outbox }
    }

    pub fn engine(&self) -> &StatsEngine {
        &self.engine
    }

    /// Start the responder task.
    pub fn spawn(self, capacity: usize) -> (ResponderHandle, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<(Route, InboundMessage)>(capacity.max(1));
        let task = tokio::spawn(async move {
            while let Some((route, message)) = rx.recv().await {
                self.handle(&route, &message).await;
            }
            debug!("query responder stopped");
        });
        (ResponderHandle { tx }, task)
    }

    /// Answer one request.
    pub async fn handle(&self, route: &Route, message: &InboundMessage) {
        match (route.kind, route.device_id.as_deref()) {
            (TopicKind::Reading, Some(id)) => self.handle_reading(id, message).await,
            (TopicKind::DataQuery, Some(id)) => self.handle_data_query(id, message).await,
            (TopicKind::ListQuery, _) => self.handle_list_query(message).await,
            _ => {}
        }
    }

    async fn handle_reading(&self, device_id: &str, message: &InboundMessage) {
        let mut reading: Reading = match decode(&message.payload) {
            Ok(reading) => reading,
            Err(e) => {
                warn!(
                    device_id = %device_id,
                    error = %e,
                    payload = %message.payload_str(),
                    "malformed reading dropped"
                );
                return;
            }
        };

        if reading.device_id.is_empty() {
            reading.device_id = device_id.to_string();
        } else if reading.device_id != device_id {
            warn!(
                topic_id = %device_id,
                payload_id = %reading.device_id,
                "reading id does not match topic, using topic id"
            );
            reading.device_id = device_id.to_string();
        }

        let response = match self.engine.record(reading).await {
            Ok(reading) => {
                info!(
                    device_id = %reading.device_id,
                    measurement = %reading.measurement,
                    value = reading.value,
                    "reading stored"
                );
                ReadingResponse::success(reading)
            }
            Err(e) => {
                warn!(device_id = %device_id, error = %e, "failed to store reading");
                ReadingResponse::error(e.to_string())
            }
        };
        self.respond(&message.topic, &response);
    }

    async fn handle_data_query(&self, device_id: &str, message: &InboundMessage) {
        let request = QueryRequest::from_payload(&message.payload);
        let response = match self.engine.data(device_id).await {
            Ok(data) => data,
            Err(e) => {
                warn!(device_id = %device_id, error = %e, "data query failed");
                DataResponse::error(device_id, e.to_string())
            }
        };
        self.respond(&message.topic, &response.with_correlation(request.correlation_id));
    }

    async fn handle_list_query(&self, message: &InboundMessage) {
        let request = QueryRequest::from_payload(&message.payload);
        let response = match self.engine.devices().await {
            Ok(ids) => ListResponse::success(ids),
            Err(e) => {
                warn!(error = %e, "list query failed");
                ListResponse::error(e.to_string())
            }
        };
        self.respond(&message.topic, &response.with_correlation(request.correlation_id));
    }

    fn respond<T: Serialize>(&self, request_topic: &str, response: &T) {
        let topic = response_topic(request_topic);
        match encode(response) {
            Ok(payload) => {
                debug!(topic = %topic, "publishing response");
                self.outbox.publish(topic, payload);
            }
            Err(e) => warn!(topic = %topic, error = %e, "failed to encode response"),
        }
    }
}
