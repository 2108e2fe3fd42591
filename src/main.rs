//! mqtt-factory command line entry point

use chrono::{SecondsFormat, Utc};
use clap::{Parser, Subcommand};
use mqtt_factory::config::MqttConfig;
use mqtt_factory::observability::init_default_logging;
use mqtt_factory::protocol::Payload;
use mqtt_factory::transport::{qos_from_u8, RepositoryRegistry};
use mqtt_factory::{ConnectionFactory, Envelope, QoS};
use std::path::{Path, PathBuf};
use std::process;
use tracing::{error, info};

/// Publish, subscribe and validate configured MQTT connections
#[derive(Parser)]
#[command(name = "mqtt-factory")]
#[command(about = "Named MQTT connections from declarative configuration")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "MQTT_CONFIG")]
    config: Option<PathBuf>,

    /// Connection name; defaults to the configured default connection
    #[arg(long, global = true)]
    connection: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate every configured connection without connecting
    Check,
    /// Publish one message
    Publish {
        topic: String,
        payload: String,
        /// Parse the payload as a JSON object
        #[arg(long)]
        json: bool,
        #[arg(long, default_value_t = 0, value_parser = parse_qos)]
        qos: u8,
        #[arg(long)]
        retain: bool,
    },
    /// Print received messages until SIGINT, SIGTERM or SIGQUIT
    Subscribe {
        filter: String,
        #[arg(long, default_value_t = 0, value_parser = parse_qos)]
        qos: u8,
    },
}

fn parse_qos(value: &str) -> Result<u8, String> {
    match value.parse::<u8>() {
        Ok(level) if level <= 2 => Ok(level),
        _ => Err(format!("QoS must be 0, 1, or 2, got: {value}")),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Check => check(config),
        Commands::Publish {
            topic,
            payload,
            json,
            qos,
            retain,
        } => publish(config, cli.connection.as_deref(), &topic, payload, json, qos, retain).await,
        Commands::Subscribe { filter, qos } => {
            subscribe(config, cli.connection.as_deref(), &filter, qos).await
        }
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(path: Option<&Path>) -> Result<MqttConfig, Box<dyn std::error::Error>> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => ["mqtt.toml", "config/mqtt.toml"]
            .into_iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
            .ok_or(
                "No configuration file found. Provide one with -c/--config or create mqtt.toml",
            )?,
    };

    info!("Loading configuration from: {}", path.display());
    let mut config = MqttConfig::load_from_file(&path)?;
    config.apply_env_overrides()?;
    Ok(config)
}

fn check(config: MqttConfig) -> Result<(), Box<dyn std::error::Error>> {
    let results = config.validate_all(&RepositoryRegistry::new());
    let mut failures = 0;

    for (name, result) in &results {
        match result {
            Ok(resolved) => println!("ok      {name} ({}:{})", resolved.host, resolved.port),
            Err(e) => {
                failures += 1;
                println!("invalid {name}: {e}");
            }
        }
    }

    if failures > 0 {
        return Err(format!("{failures} of {} connections are invalid", results.len()).into());
    }
    Ok(())
}

async fn publish(
    config: MqttConfig,
    connection: Option<&str>,
    topic: &str,
    payload: String,
    json: bool,
    qos: u8,
    retain: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let factory = ConnectionFactory::new(config);
    let payload = if json {
        Payload::try_from(serde_json::from_str::<serde_json::Value>(&payload)?)?
    } else {
        Payload::Text(payload)
    };

    factory
        .publish(topic, payload, connection, to_qos(qos), retain)
        .await?;
    info!(topic = %topic, "Message published");
    factory.disconnect(connection).await?;
    Ok(())
}

async fn subscribe(
    config: MqttConfig,
    connection: Option<&str>,
    filter: &str,
    qos: u8,
) -> Result<(), Box<dyn std::error::Error>> {
    let factory = ConnectionFactory::new(config);

    factory
        .subscribe_with_signals(
            filter,
            |topic: &str, message: &Envelope| {
                println!(
                    "{} {topic} {message}",
                    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
                );
                Ok(())
            },
            connection,
            to_qos(qos),
        )
        .await?;

    factory.disconnect(connection).await?;
    Ok(())
}

fn to_qos(level: u8) -> QoS {
    qos_from_u8(level).unwrap_or(QoS::AtMostOnce)
}
