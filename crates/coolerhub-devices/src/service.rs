//! Intake service.
//!
//! Subscribes to the protocol topics on a transport, classifies every
//! delivery and routes it: commands through the validator, responses into
//! the aggregator queue, requests to the query responder. One task handles
//! deliveries in order, so per-device ordering is kept from the transport
//! all the way to the aggregator.

use std::sync::Arc;
use std::time::Duration;

use coolerhub_core::config::{MonitorConfig, defaults};
use coolerhub_core::message::{QueryRequest, decode, encode};
use coolerhub_core::topic::{TopicKind, hub_patterns, kind_to_topic, parse_topic, response_topic};
use coolerhub_core::{
    DynTransport, EventBus, InboundMessage, Outbox, Result, SharedEventBus, Subscription,
};
use coolerhub_storage::StatsEngine;
use futures::stream::{self, BoxStream, StreamExt};
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::aggregator::{Aggregator, AggregatorHandle, Intake, StatusView};
use crate::command::CommandValidator;
use crate::report::StatusReport;
use crate::responder::{QueryResponder, ResponderHandle};

fn subscription_stream(subscription: Subscription) -> BoxStream<'static, InboundMessage> {
    stream::unfold(subscription, |mut sub| async move {
        sub.recv().await.map(|message| (message, sub))
    })
    .boxed()
}

/// Routes transport deliveries to the validator, aggregator and responder.
#[derive(Clone)]
pub struct CoolerService {
    outbox: Outbox,
    aggregator: AggregatorHandle,
    view: StatusView,
    validator: CommandValidator,
    responder: Option<ResponderHandle>,
}

impl CoolerService {
    /// Subscriptions go to the outbox's transport; answers leave through the outbox.
    pub fn new(outbox: Outbox, aggregator: AggregatorHandle, view: StatusView) -> Self {
        Self {
            validator: CommandValidator::new(aggregator.clone()),
            outbox,
            aggregator,
            view,
            responder: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: SharedEventBus) -> Self {
        self.validator = self.validator.with_event_bus(event_bus);
        self
    }

    /// Answer reading/data/list requests with this responder.
    pub fn with_responder(mut self, responder: ResponderHandle) -> Self {
        self.responder = Some(responder);
        self
    }

    pub fn view(&self) -> &StatusView {
        &self.view
    }

    /// Subscribe to `patterns` and process deliveries until the transport
    /// closes every subscription.
    pub async fn start(self, patterns: &[String]) -> Result<JoinHandle<()>> {
        let transport = self.outbox.transport().clone();
        let mut streams = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            streams.push(subscription_stream(transport.subscribe(pattern).await?));
        }
        info!(transport = transport.name(), patterns = ?patterns, "intake service subscribed");

        let mut merged = stream::select_all(streams);
        Ok(tokio::spawn(async move {
            while let Some(message) = merged.next().await {
                self.handle_message(message).await;
            }
            info!("intake service stopped");
        }))
    }

    /// Route one delivery.
    pub async fn handle_message(&self, message: InboundMessage) {
        let Some(route) = parse_topic(&message.topic) else {
            trace!(topic = %message.topic, "ignoring topic outside the grammar");
            return;
        };

        match route.kind {
            TopicKind::Command => {
                let Some(device_id) = route.device_id.as_deref() else {
                    return;
                };
                // Rejections are logged by the validator.
                let _ = self.validator.handle(device_id, &message.payload).await;
            }
            TopicKind::StatusQuery => self.answer_status(route.device_id.as_deref(), &message),
            TopicKind::ReadingResponse => self.forward(&message, Intake::ReadingResponse).await,
            TopicKind::DataResponse => self.forward(&message, Intake::DataResponse).await,
            TopicKind::ListResponse => self.forward(&message, Intake::ListResponse).await,
            TopicKind::Reading | TopicKind::DataQuery | TopicKind::ListQuery => {
                if let Some(responder) = &self.responder {
                    if let Err(e) = responder.submit(route, message).await {
                        warn!(error = %e, "request dropped");
                    }
                }
            }
        }
    }

    async fn forward<T, F>(&self, message: &InboundMessage, wrap: F)
    where
        T: DeserializeOwned,
        F: FnOnce(T) -> Intake,
    {
        match decode::<T>(&message.payload) {
            Ok(response) => {
                if let Err(e) = self.aggregator.submit(wrap(response)).await {
                    warn!(topic = %message.topic, error = %e, "response dropped");
                }
            }
            Err(e) => warn!(
                topic = %message.topic,
                error = %e,
                payload = %message.payload_str(),
                "malformed response dropped"
            ),
        }
    }

    fn answer_status(&self, device_id: Option<&str>, message: &InboundMessage) {
        let request = QueryRequest::from_payload(&message.payload);
        let mut report = StatusReport::new(self.view.current_statuses());
        if let Some(id) = device_id {
            report = report.only(id);
        }
        info!("status requested\n{}", report.to_text());

        match encode(&report.with_correlation(request.correlation_id)) {
            Ok(payload) => self.outbox.publish(response_topic(&message.topic), payload),
            Err(e) => warn!(error = %e, "failed to encode status report"),
        }
    }

    /// Ask for a device list and fresh statistics of every known device.
    pub fn request_refresh(&self) {
        request_refresh(&self.outbox, &self.view);
    }

    /// Call [`request_refresh`](Self::request_refresh) every `interval`.
    pub fn spawn_poller(&self, interval: Duration) -> JoinHandle<()> {
        let outbox = self.outbox.clone();
        let view = self.view.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                request_refresh(&outbox, &view);
            }
        })
    }
}

fn request_refresh(outbox: &Outbox, view: &StatusView) {
    let Ok(body) = encode(&QueryRequest::default()) else {
        return;
    };
    let dialect = outbox.transport().dialect();
    let ids = view.device_ids();
    debug!(devices = ids.len(), "requesting refresh");

    outbox.publish(kind_to_topic(TopicKind::ListQuery, "", dialect), body.clone());
    for id in ids {
        outbox.publish(kind_to_topic(TopicKind::DataQuery, &id, dialect), body.clone());
    }
}

/// How long shutdown waits for queued publishes.
const OUTBOX_FLUSH: Duration = Duration::from_secs(2);

/// A running hub: aggregator, intake service and, optionally, the query
/// responder and refresh poller, all on one transport.
pub struct CoolerHub {
    transport: DynTransport,
    view: StatusView,
    event_bus: SharedEventBus,
    engine: Option<StatsEngine>,
    outbox: Outbox,
    service: CoolerService,
    intake_tasks: Vec<JoinHandle<()>>,
    responder_task: Option<JoinHandle<()>>,
    aggregator_task: JoinHandle<()>,
    outbox_task: JoinHandle<()>,
}

impl CoolerHub {
    /// Start every component.
    ///
    /// With an engine, reading/data/list requests are answered from storage.
    pub async fn start(
        transport: DynTransport,
        monitor: &MonitorConfig,
        engine: Option<StatsEngine>,
    ) -> Result<Self> {
        let aggregator = Aggregator::new(monitor.volume_policy).with_roster(&monitor.roster);
        let view = aggregator.view();
        let (handle, aggregator_task) = aggregator.spawn(defaults::INTAKE_CAPACITY);
        let (outbox, outbox_task) = Outbox::spawn(transport.clone());

        let event_bus = Arc::new(EventBus::with_name("commands"));
        let mut service = CoolerService::new(outbox.clone(), handle, view.clone())
            .with_event_bus(event_bus.clone());

        let mut responder_task = None;
        if let Some(engine) = &engine {
            let (responder, task) =
                QueryResponder::new(engine.clone(), outbox.clone()).spawn(defaults::INTAKE_CAPACITY);
            service = service.with_responder(responder);
            responder_task = Some(task);
        }

        let mut intake_tasks = vec![service.clone().start(&hub_patterns(transport.dialect())).await?];
        if let Some(interval) = monitor.refresh_interval() {
            intake_tasks.push(service.spawn_poller(interval));
        }

        info!(
            transport = transport.name(),
            serve_queries = engine.is_some(),
            "cooler hub started"
        );
        Ok(Self {
            transport,
            view,
            event_bus,
            engine,
            outbox,
            service,
            intake_tasks,
            responder_task,
            aggregator_task,
            outbox_task,
        })
    }

    pub fn transport(&self) -> &DynTransport {
        &self.transport
    }

    pub fn view(&self) -> &StatusView {
        &self.view
    }

    pub fn event_bus(&self) -> &SharedEventBus {
        &self.event_bus
    }

    pub fn engine(&self) -> Option<&StatsEngine> {
        self.engine.as_ref()
    }

    /// Ordered publisher shared by every hub component.
    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn service(&self) -> &CoolerService {
        &self.service
    }

    /// Stop the hub.
    ///
    /// Intake stops first. The responder and the aggregator then drain
    /// their queues, and queued publishes get [`OUTBOX_FLUSH`] to leave.
    pub async fn shutdown(self) {
        let Self {
            outbox,
            service,
            intake_tasks,
            responder_task,
            aggregator_task,
            mut outbox_task,
            ..
        } = self;

        for task in &intake_tasks {
            task.abort();
        }
        for task in intake_tasks {
            let _ = task.await;
        }
        // Last holder of the aggregator and responder handles.
        drop(service);

        if let Some(task) = responder_task {
            let _ = task.await;
        }
        let _ = aggregator_task.await;

        drop(outbox);
        if tokio::time::timeout(OUTBOX_FLUSH, &mut outbox_task).await.is_err() {
            // Outbox clones handed out elsewhere keep it open.
            outbox_task.abort();
        }
        info!("cooler hub stopped");
    }
}
