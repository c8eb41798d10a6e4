//! MQTT transport.
//!
//! Wraps a rumqttc client. The event loop runs in its own task and fans
//! incoming publishes out to local subscriptions; subscriptions are
//! re-issued after every reconnect.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use coolerhub_core::config::TransportConfig;
use coolerhub_core::topic::{TopicDialect, to_dialect};
use coolerhub_core::{Error, InboundMessage, Result, SubscriberTable, Subscription, Transport};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// Consecutive poll errors after which failures are logged as errors.
const ERROR_ESCALATION: u32 = 5;

/// MQTT broker connection, slash dialect, QoS 1.
pub struct MqttTransport {
    name: String,
    client: AsyncClient,
    subscribers: Arc<SubscriberTable>,
    connected: Arc<AtomicBool>,
    event_loop: JoinHandle<()>,
}

impl MqttTransport {
    /// Create the client and start its event loop.
    ///
    /// Connection happens in the background; publishes issued before the
    /// broker acknowledges are queued by the client.
    pub fn connect(config: &TransportConfig) -> Result<Arc<Self>> {
        if config.host.is_empty() {
            return Err(Error::Config("MQTT host is empty".to_string()));
        }

        let client_id = format!("{}-{}", config.client_id_prefix, Uuid::new_v4());
        let mut options = MqttOptions::new(&client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            options.set_credentials(user, pass);
        }

        let (client, eventloop) = AsyncClient::new(options, 64);
        let subscribers = Arc::new(SubscriberTable::new());
        let connected = Arc::new(AtomicBool::new(false));
        let name = format!("mqtt://{}:{}", config.host, config.port);

        let event_loop = tokio::spawn(run_event_loop(
            name.clone(),
            eventloop,
            client.clone(),
            subscribers.clone(),
            connected.clone(),
        ));

        info!(broker = %name, client_id = %client_id, "MQTT transport created");
        Ok(Arc::new(Self {
            name,
            client,
            subscribers,
            connected,
            event_loop,
        }))
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}

async fn run_event_loop(
    broker: String,
    mut eventloop: EventLoop,
    client: AsyncClient,
    subscribers: Arc<SubscriberTable>,
    connected: Arc<AtomicBool>,
) {
    let mut error_count = 0u32;
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                error_count = 0;
                let message = InboundMessage::new(publish.topic, publish.payload.to_vec());
                let delivered = subscribers.dispatch(&message);
                trace!(broker = %broker, topic = %message.topic, delivered, "MQTT message received");
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                error_count = 0;
                connected.store(true, Ordering::Relaxed);
                info!(broker = %broker, "MQTT connection acknowledged");
                // The session is clean: re-issue every live subscription.
                for pattern in subscribers.patterns() {
                    if let Err(e) = client.try_subscribe(pattern.as_str(), QoS::AtLeastOnce) {
                        warn!(broker = %broker, pattern = %pattern, error = %e, "resubscribe failed");
                    }
                }
            }
            Ok(_) => {
                error_count = 0;
            }
            Err(e) => {
                connected.store(false, Ordering::Relaxed);
                error_count = error_count.saturating_add(1);
                if error_count >= ERROR_ESCALATION {
                    error!(broker = %broker, errors = error_count, error = %e, "MQTT connection failing");
                } else {
                    warn!(broker = %broker, errors = error_count, error = %e, "MQTT connection error");
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

#[async_trait]
impl Transport for MqttTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn dialect(&self) -> TopicDialect {
        TopicDialect::Slash
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let topic = to_dialect(topic, TopicDialect::Slash);
        self.client
            .publish(topic.as_str(), QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| Error::Transport(format!("publish to {} failed: {}", topic, e)))
    }

    async fn subscribe(&self, pattern: &str) -> Result<Subscription> {
        let filter = to_dialect(pattern, TopicDialect::Slash);
        let already = self.subscribers.contains(&filter);
        let subscription = self.subscribers.add(&filter);
        if !already {
            self.client
                .subscribe(filter.as_str(), QoS::AtLeastOnce)
                .await
                .map_err(|e| Error::Transport(format!("subscribe to {} failed: {}", filter, e)))?;
        }
        debug!(broker = %self.name, filter = %filter, "subscribed");
        Ok(subscription)
    }

    async fn unsubscribe(&self, pattern: &str) -> Result<()> {
        let filter = to_dialect(pattern, TopicDialect::Slash);
        if self.subscribers.remove(&filter) > 0 {
            self.client
                .unsubscribe(filter.as_str())
                .await
                .map_err(|e| Error::Transport(format!("unsubscribe from {} failed: {}", filter, e)))?;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Send DISCONNECT, give the event loop a moment to flush it, then stop it.
    async fn close(&self) -> Result<()> {
        self.client
            .disconnect()
            .await
            .map_err(|e| Error::Transport(format!("disconnect failed: {}", e)))?;
        tokio::time::sleep(Duration::from_millis(200)).await;
        self.event_loop.abort();
        self.connected.store(false, Ordering::Relaxed);
        info!(broker = %self.name, "MQTT transport closed");
        Ok(())
    }
}
