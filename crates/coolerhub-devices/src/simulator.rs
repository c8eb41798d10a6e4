//! Virtual cooler.
//!
//! Publishes random `water_flow` and `water_temperature` readings for one
//! device on its reading topic at a fixed interval.

use std::time::Duration;

use chrono::Utc;
use coolerhub_core::config::{defaults, topics};
use coolerhub_core::message::{Reading, encode};
use coolerhub_core::topic::{TopicKind, kind_to_topic};
use coolerhub_core::{DynTransport, Result};
use rand::Rng;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Simulated sensors of a cooler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirtualSensor {
    /// Litres since the previous sample, integer in `0..=9`.
    WaterFlow,
    /// Degrees Celsius, integer in `0..=19`.
    WaterTemperature,
}

impl VirtualSensor {
    pub const ALL: [VirtualSensor; 2] = [VirtualSensor::WaterFlow, VirtualSensor::WaterTemperature];

    pub fn measurement(self) -> &'static str {
        match self {
            VirtualSensor::WaterFlow => topics::WATER_FLOW,
            VirtualSensor::WaterTemperature => topics::WATER_TEMPERATURE,
        }
    }

    pub fn sample<R: Rng + ?Sized>(self, rng: &mut R) -> f64 {
        let upper: u32 = match self {
            VirtualSensor::WaterFlow => 10,
            VirtualSensor::WaterTemperature => 20,
        };
        f64::from(rng.gen_range(0..upper))
    }
}

/// A simulated cooler publishing readings on a transport.
pub struct VirtualCooler {
    device_id: String,
    transport: DynTransport,
    interval: Duration,
}

impl VirtualCooler {
    pub fn new(device_id: impl Into<String>, transport: DynTransport) -> Self {
        Self {
            device_id: device_id.into(),
            transport,
            interval: Duration::from_secs(defaults::SIMULATOR_INTERVAL_SECS),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// One reading per sensor, stamped now.
    pub fn sample(&self) -> Vec<Reading> {
        let mut rng = rand::thread_rng();
        let now = Utc::now();
        VirtualSensor::ALL
            .iter()
            .map(|sensor| Reading::new(&self.device_id, sensor.measurement(), sensor.sample(&mut rng), now))
            .collect()
    }

    /// Publish one sample of every sensor.
    pub async fn publish_once(&self) -> Result<()> {
        let topic = kind_to_topic(TopicKind::Reading, &self.device_id, self.transport.dialect());
        for reading in self.sample() {
            let payload = encode(&reading)?;
            debug!(
                device_id = %self.device_id,
                measurement = %reading.measurement,
                value = reading.value,
                "publishing simulated reading"
            );
            self.transport.publish(&topic, payload).await?;
        }
        Ok(())
    }

    /// Publish forever at the configured interval.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                device_id = %self.device_id,
                interval_secs = self.interval.as_secs_f64(),
                "virtual cooler started"
            );
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                ticker.tick().await;
                if let Err(e) = self.publish_once().await {
                    warn!(device_id = %self.device_id, error = %e, "failed to publish simulated reading");
                }
            }
        })
    }
}
