//! Unified configuration.
//!
//! Default values, topic constants and environment variable names live here so
//! that the storage, device and API crates do not redefine them.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Topic vocabulary of the wire protocol.
pub mod topics {
    /// Scope segment for device telemetry and queries.
    pub const COOLERS: &str = "water_coolers";
    /// Scope segment for device commands.
    pub const COMMANDS: &str = "commands";
    /// Reading segment.
    pub const READINGS: &str = "readings";
    /// Data query segment.
    pub const DATA: &str = "data";
    /// List query segment (takes the device id position).
    pub const LIST: &str = "list";
    /// Status query segment.
    pub const STATUS: &str = "status";
    /// Response suffix appended to a request topic.
    pub const RESPONSE: &str = "response";
    /// Measurement that feeds the dispensed-volume accumulator.
    pub const WATER_FLOW: &str = "water_flow";
    /// Temperature measurement emitted by the coolers.
    pub const WATER_TEMPERATURE: &str = "water_temperature";
}

/// Default values.
pub mod defaults {
    /// Number of most recent readings used to compute statistics.
    pub const STATS_WINDOW: usize = 10;
    /// Default MQTT broker host.
    pub const MQTT_HOST: &str = "localhost";
    /// Default MQTT broker port.
    pub const MQTT_PORT: u16 = 1883;
    /// Prefix of generated MQTT client ids.
    pub const MQTT_CLIENT_PREFIX: &str = "coolerhub";
    /// MQTT keep-alive in seconds.
    pub const MQTT_KEEP_ALIVE_SECS: u64 = 60;
    /// HTTP bind address.
    pub const HTTP_BIND: &str = "127.0.0.1:8011";
    /// Storage path placeholder for a throw-away database.
    pub const MEMORY_STORAGE: &str = ":memory:";
    /// Seconds between monitor refresh queries (0 disables polling).
    pub const REFRESH_INTERVAL_SECS: u64 = 30;
    /// Seconds between simulated readings.
    pub const SIMULATOR_INTERVAL_SECS: u64 = 5;
    /// Capacity of the aggregator intake queue.
    pub const INTAKE_CAPACITY: usize = 1024;
}

/// Environment variable names.
pub mod env_vars {
    pub const CONFIG: &str = "COOLERHUB_CONFIG";
    pub const LOG_JSON: &str = "COOLERHUB_LOG_JSON";
    pub const MQTT_HOST: &str = "COOLERHUB_MQTT_HOST";
    pub const MQTT_PORT: &str = "COOLERHUB_MQTT_PORT";
    pub const HTTP_BIND: &str = "COOLERHUB_HTTP_BIND";
    pub const STORAGE_PATH: &str = "COOLERHUB_STORAGE_PATH";
}

/// Which transport binding the hub talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// MQTT broker, slash topic dialect.
    #[default]
    Mqtt,
    /// In-process topic exchange, dot topic dialect.
    Memory,
}

/// How `totalLitersDispensed` is advanced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VolumePolicy {
    /// Accumulate from raw `water_flow` reading responses only.
    #[default]
    FromReadings,
    /// Also accumulate the `lastValue` of every `water_flow` stats snapshot.
    ///
    /// Double-counts volume when reading responses are consumed as well; kept
    /// for fidelity with the stats-driven monitor variant.
    FromStatsLastValue,
}

/// Transport section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default)]
    pub kind: TransportKind,
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_client_prefix")]
    pub client_id_prefix: String,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// HTTP section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_bind")]
    pub bind: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Storage section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database file, or `:memory:` for a temporary database.
    #[serde(default = "default_storage_path")]
    pub path: String,
}

/// Monitor (aggregator side) section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    #[serde(default)]
    pub volume_policy: VolumePolicy,
    /// Device ids pre-created at start-up. Convenience only.
    #[serde(default)]
    pub roster: Vec<String>,
    /// Answer reading/data/list queries from storage in this process.
    #[serde(default = "default_true")]
    pub serve_queries: bool,
}

/// Complete hub configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HubConfig {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

fn default_mqtt_host() -> String {
    defaults::MQTT_HOST.to_string()
}

fn default_mqtt_port() -> u16 {
    defaults::MQTT_PORT
}

fn default_client_prefix() -> String {
    defaults::MQTT_CLIENT_PREFIX.to_string()
}

fn default_keep_alive() -> u64 {
    defaults::MQTT_KEEP_ALIVE_SECS
}

fn default_http_bind() -> String {
    defaults::HTTP_BIND.to_string()
}

fn default_storage_path() -> String {
    defaults::MEMORY_STORAGE.to_string()
}

fn default_refresh_interval() -> u64 {
    defaults::REFRESH_INTERVAL_SECS
}

fn default_true() -> bool {
    true
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::default(),
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            client_id_prefix: default_client_prefix(),
            keep_alive_secs: default_keep_alive(),
            username: None,
            password: None,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: default_http_bind(),
            enabled: true,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval(),
            volume_policy: VolumePolicy::default(),
            roster: Vec::new(),
            serve_queries: true,
        }
    }
}

impl MonitorConfig {
    /// Refresh interval, `None` when polling is disabled.
    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.refresh_interval_secs > 0).then(|| Duration::from_secs(self.refresh_interval_secs))
    }
}

impl HubConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!(
                "cannot read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Load from the given path, or from `COOLERHUB_CONFIG`, or fall back to
    /// defaults. Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let from_env = std::env::var(env_vars::CONFIG).ok();
        let mut config = match path.map(Path::to_path_buf).or(from_env.map(Into::into)) {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply `COOLERHUB_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(env_vars::MQTT_HOST) {
            self.transport.host = host;
        }
        if let Some(port) = lookup(env_vars::MQTT_PORT) {
            self.transport.port = port
                .parse()
                .map_err(|_| Error::Config(format!("invalid {}: {}", env_vars::MQTT_PORT, port)))?;
        }
        if let Some(bind) = lookup(env_vars::HTTP_BIND) {
            self.http.bind = bind;
        }
        if let Some(path) = lookup(env_vars::STORAGE_PATH) {
            self.storage.path = path;
        }
        Ok(())
    }
}
