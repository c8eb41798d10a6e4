//! Command-line interface for CoolerHub.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand, ValueEnum};
use coolerhub_api::ServerState;
use coolerhub_core::config::{HubConfig, TransportKind, env_vars};
use coolerhub_core::message::{CommandAction, DeviceCommand, QueryRequest, encode};
use coolerhub_core::topic::{TopicKind, command_topic, is_valid_device_id, kind_to_topic, response_topic};
use coolerhub_core::{DynTransport, Transport};
use coolerhub_devices::{CoolerHub, VirtualCooler, transport};
use coolerhub_storage::{ReadingStore, StatsEngine};
use tracing::{debug, error, info, warn};

/// CoolerHub - water cooler state aggregation and command hub.
#[derive(Parser, Debug)]
#[command(name = "coolerhub")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Configuration file (TOML). Falls back to COOLERHUB_CONFIG.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Run the hub: aggregator, query responder and HTTP API.
    Serve {
        /// Also run virtual coolers with these ids.
        #[arg(long, value_delimiter = ',')]
        simulate: Vec<String>,
        /// Seconds between simulated readings.
        #[arg(long)]
        interval: Option<u64>,
        /// Do not start the HTTP API.
        #[arg(long)]
        no_http: bool,
    },
    /// Publish simulated readings until interrupted.
    Simulate {
        /// Device ids.
        #[arg(required = true)]
        ids: Vec<String>,
        /// Seconds between readings.
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Send a command to a device.
    #[command(name = "command")]
    Send {
        /// Target device id.
        device_id: String,
        /// Action: power, night_light or maintenance.
        action: String,
        /// on/off (or true/false).
        #[arg(value_parser = parse_switch, action = clap::ArgAction::Set)]
        value: bool,
    },
    /// Send a query and print the response.
    Query {
        /// What to ask for.
        #[arg(value_enum)]
        kind: QueryKind,
        /// Device id (required for `data`, optional for `status`).
        device_id: Option<String>,
        /// Seconds to wait for the response.
        #[arg(long, default_value_t = 5)]
        timeout: u64,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum QueryKind {
    List,
    Data,
    Status,
}

fn parse_switch(value: &str) -> std::result::Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "on" | "true" | "1" => Ok(true),
        "off" | "false" | "0" => Ok(false),
        other => Err(format!("expected on/off, got '{}'", other)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // JSON logs for container environments
    let json_logging = std::env::var(env_vars::LOG_JSON)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let default_directive = if args.verbose { "coolerhub=debug" } else { "coolerhub=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .init();
    }

    let config = HubConfig::load(args.config.as_deref()).context("failed to load configuration")?;

    match args.command {
        Command::Serve {
            simulate,
            interval,
            no_http,
        } => run_serve(config, simulate, interval, no_http).await,
        Command::Simulate { ids, interval } => run_simulate(config, ids, interval).await,
        Command::Send {
            device_id,
            action,
            value,
        } => send_command(config, &device_id, &action, value).await,
        Command::Query {
            kind,
            device_id,
            timeout,
        } => run_query(config, kind, device_id.as_deref(), timeout).await,
    }
}

fn check_ids(ids: &[String]) -> Result<()> {
    if let Some(bad) = ids.iter().find(|id| !is_valid_device_id(id)) {
        bail!("invalid device id '{}'", bad);
    }
    Ok(())
}

/// Transport for commands that talk to a hub in another process.
fn broker_transport(config: &HubConfig) -> Result<DynTransport> {
    if config.transport.kind == TransportKind::Memory {
        bail!("the memory transport only reaches this process; configure an MQTT broker");
    }
    Ok(transport::connect(&config.transport)?)
}

fn spawn_coolers(
    ids: Vec<String>,
    transport: &DynTransport,
    interval: Option<u64>,
) -> Vec<tokio::task::JoinHandle<()>> {
    ids.into_iter()
        .map(|id| {
            let mut cooler = VirtualCooler::new(id, transport.clone());
            if let Some(secs) = interval {
                cooler = cooler.with_interval(Duration::from_secs(secs.max(1)));
            }
            cooler.spawn()
        })
        .collect()
}

async fn run_serve(
    config: HubConfig,
    simulate: Vec<String>,
    interval: Option<u64>,
    no_http: bool,
) -> Result<()> {
    check_ids(&simulate)?;
    let transport = transport::connect(&config.transport)?;
    let store = ReadingStore::open(&config.storage.path)
        .with_context(|| format!("failed to open reading store at {}", config.storage.path))?;
    let engine = StatsEngine::new(store);

    let hub = CoolerHub::start(
        transport.clone(),
        &config.monitor,
        config.monitor.serve_queries.then(|| engine.clone()),
    )
    .await?;

    let mut tasks = Vec::new();
    if config.http.enabled && !no_http {
        let bind: SocketAddr = config
            .http
            .bind
            .parse()
            .with_context(|| format!("invalid HTTP bind address '{}'", config.http.bind))?;
        let state = ServerState::new(engine)
            .with_view(hub.view().clone())
            .with_outbox(hub.outbox().clone());
        tasks.push(tokio::spawn(async move {
            if let Err(e) = coolerhub_api::run(bind, state).await {
                error!(error = %e, "HTTP API stopped");
            }
        }));
    }
    tasks.extend(spawn_coolers(simulate, &transport, interval));

    info!("CoolerHub running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    stop_tasks(tasks).await;
    hub.shutdown().await;
    close_transport(&transport).await;
    Ok(())
}

async fn run_simulate(config: HubConfig, ids: Vec<String>, interval: Option<u64>) -> Result<()> {
    check_ids(&ids)?;
    let transport = broker_transport(&config)?;
    let tasks = spawn_coolers(ids, &transport, interval);

    tokio::signal::ctrl_c().await?;
    stop_tasks(tasks).await;
    close_transport(&transport).await;
    Ok(())
}

async fn send_command(config: HubConfig, device_id: &str, action: &str, value: bool) -> Result<()> {
    check_ids(&[device_id.to_string()])?;
    let action = CommandAction::from_name(action).ok_or_else(|| anyhow!("unknown action '{}'", action))?;
    let transport = broker_transport(&config)?;

    let topic = command_topic(device_id, action.as_str(), transport.dialect());
    let payload = encode(&DeviceCommand::new(action, value))?;
    transport.publish(&topic, payload).await?;
    println!("Sent {} {} to {}", action, if value { "on" } else { "off" }, device_id);

    close_transport(&transport).await;
    Ok(())
}

async fn run_query(
    config: HubConfig,
    kind: QueryKind,
    device_id: Option<&str>,
    timeout: u64,
) -> Result<()> {
    let request = match (kind, device_id) {
        (QueryKind::List, _) => (TopicKind::ListQuery, ""),
        (QueryKind::Data, Some(id)) => (TopicKind::DataQuery, id),
        (QueryKind::Data, None) => bail!("a data query needs a device id"),
        (QueryKind::Status, id) => (TopicKind::StatusQuery, id.unwrap_or_default()),
    };
    if !request.1.is_empty() {
        check_ids(&[request.1.to_string()])?;
    }

    let transport = broker_transport(&config)?;
    let topic = kind_to_topic(request.0, request.1, transport.dialect());
    let mut responses = transport.subscribe(&response_topic(&topic)).await?;

    let correlation_id = format!("cli-{}", std::process::id());
    let body = encode(&QueryRequest {
        correlation_id: Some(correlation_id.clone()),
    })?;
    transport.publish(&topic, body).await?;

    // Other clients share the response topic; wait for our own answer.
    let answer = async {
        while let Some(message) = responses.recv().await {
            match serde_json::from_slice::<serde_json::Value>(&message.payload) {
                Ok(value) if matches_correlation(&value, &correlation_id) => return Some(value),
                Ok(_) => debug!(topic = %message.topic, "skipping response to another request"),
                Err(e) => debug!(topic = %message.topic, error = %e, "skipping malformed response"),
            }
        }
        None
    };
    let value = tokio::time::timeout(Duration::from_secs(timeout), answer)
        .await
        .map_err(|_| anyhow!("no response on {} within {}s", response_topic(&topic), timeout))?
        .ok_or_else(|| anyhow!("transport closed"))?;

    println!("{}", serde_json::to_string_pretty(&value)?);
    close_transport(&transport).await;
    Ok(())
}

fn matches_correlation(response: &serde_json::Value, correlation_id: &str) -> bool {
    response.get("correlationId").and_then(serde_json::Value::as_str) == Some(correlation_id)
}

async fn stop_tasks(tasks: Vec<tokio::task::JoinHandle<()>>) {
    for task in &tasks {
        task.abort();
    }
    for task in tasks {
        let _ = task.await;
    }
}

async fn close_transport(transport: &DynTransport) {
    if let Err(e) = transport.close().await {
        warn!(transport = transport.name(), error = %e, "failed to close transport");
    }
}
