//! mqtt-dispatch command line client
//!
//! Listens on wildcard filters or publishes a single message using the session layer.

use chrono::Local;
use clap::{Parser, Subcommand};
use mqtt_dispatch::observability::init_default_logging;
use mqtt_dispatch::{ClientConfig, MqttClient, PublishMode, QoS};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::Notify;
use tokio::time::{timeout, Duration};
use tracing::{error, info, warn};

/// Configuration files tried when `--config` is not given
const DEFAULT_CONFIG_PATHS: [&str; 2] = ["mqtt-dispatch.toml", "config/mqtt-dispatch.toml"];

/// How long `publish` waits for the broker
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// MQTT client with wildcard topic dispatch
#[derive(Parser)]
#[command(name = "mqtt-dispatch")]
#[command(about = "MQTT client with wildcard topic dispatch")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Broker URI, overrides the configuration file
    #[arg(long, value_name = "URI", env = "MQTT_SERVER")]
    server: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print messages matching one or more filters until Ctrl-C
    Listen {
        /// Topic filter, may contain + and # wildcards
        #[arg(short, long = "filter", value_name = "FILTER", required = true)]
        filters: Vec<String>,

        #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=2))]
        qos: u8,
    },
    /// Publish one message and exit
    Publish {
        #[arg(short, long)]
        topic: String,

        #[arg(short, long)]
        message: String,

        #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=2))]
        qos: u8,

        #[arg(long)]
        retain: bool,
    },
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting mqtt-dispatch v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(cli.config.as_deref(), cli.server) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Listen { filters, qos } => run_listener(config, filters, qos).await,
        Commands::Publish {
            topic,
            message,
            qos,
            retain,
        } => publish_once(config, &topic, &message, qos, retain).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(
    config_path: Option<&Path>,
    server_override: Option<String>,
) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    let config = match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            ClientConfig::load_from_file(path)?
        }
        None => DEFAULT_CONFIG_PATHS
            .iter()
            .map(Path::new)
            .find(|path| path.exists())
            .map(|path| {
                info!("Loading configuration from: {}", path.display());
                ClientConfig::load_from_file(path)
            })
            .transpose()?
            .unwrap_or_default(),
    };

    Ok(match server_override {
        Some(server) => config.with_server(server),
        None => config,
    })
}

fn parse_qos(qos: u8) -> Result<QoS, Box<dyn std::error::Error>> {
    Ok(QoS::try_from(qos)?)
}

async fn run_listener(
    config: ClientConfig,
    filters: Vec<String>,
    qos: u8,
) -> Result<(), Box<dyn std::error::Error>> {
    let qos = parse_qos(qos)?;
    for filter in &filters {
        mqtt_dispatch::protocol::validate_filter(filter)?;
    }

    let client = MqttClient::new(config);
    info!("Client id: {}", client.client_id());

    client
        .on_connect(|session_present| info!(session_present, "Connected"))
        .on_disconnect(|_| warn!("Disconnected"))
        .on_error(|error| warn!("Transport error: {}", error));

    for filter in filters {
        client.on_topic(filter, qos, |message| {
            println!(
                "{} {} [qos={} retain={}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                message.topic,
                message.qos,
                message.retain,
                message.payload_str()
            );
        });
    }

    client.connect()?;

    signal::ctrl_c().await?;
    info!("Received Ctrl-C, shutting down gracefully...");

    client.disconnect().await?;
    info!("Session metrics: {}", serde_json::to_string(&client.metrics())?);
    Ok(())
}

async fn publish_once(
    config: ClientConfig,
    topic: &str,
    message: &str,
    qos: u8,
    retain: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let qos = parse_qos(qos)?;
    mqtt_dispatch::protocol::validate_topic(topic)?;

    let client = MqttClient::new(config);
    let connected = Arc::new(Notify::new());
    let acknowledged = Arc::new(Notify::new());

    let on_connected = connected.clone();
    let on_acknowledged = acknowledged.clone();
    client
        .on_connect(move |_| on_connected.notify_one())
        .on_publish(move |_| on_acknowledged.notify_one());

    client.connect()?;

    if timeout(CONNECT_TIMEOUT, connected.notified()).await.is_err() {
        client.force_stop();
        return Err(format!("No connection to the broker within {CONNECT_TIMEOUT:?}").into());
    }

    client.publish(topic, qos, retain, message, PublishMode::Enqueue)?;
    info!("Published {} bytes to {}", message.len(), topic);

    if qos != QoS::AtMostOnce
        && timeout(CONNECT_TIMEOUT, acknowledged.notified())
            .await
            .is_err()
    {
        warn!("Broker did not acknowledge the publish");
    }

    client.disconnect().await?;
    Ok(())
}

fn handle_config_command(
    config: &ClientConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;
    mqtt_dispatch::transport::mqtt::parse_server_uri(config.server_uri()?)?;

    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
