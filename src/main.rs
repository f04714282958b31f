//! Command-line probe for MQTT brokers.
//!
//! Publishes one structured JSON envelope to a topic, or subscribes to a
//! topic and waits for the first message to arrive.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tracing::{error, warn};
use uuid::Uuid;

use probemq::client::transport::MqttDialer;
use probemq::logging::init_logging;
use probemq::util::addr::malformed_ipv4;
use probemq::util::wait::{wait_until, DEFAULT_POLL_PERIOD};
use probemq::{load_config, BrokerClient, BrokerConfig, MsgBuilder};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const RECEIVE_TIMEOUT: Duration = Duration::from_secs(10);
const PUBLISH_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Action {
    /// Publish one message to the topic
    Pub,
    /// Subscribe to the topic and wait for a message
    Sub,
}

/// Command-line probe for MQTT brokers.
#[derive(Debug, Parser)]
#[command(
    name = "probemq",
    version,
    about = "Publish to or subscribe on an MQTT broker",
    after_help = "Examples:\n  probemq -b localhost -a pub -t \"/test/req\" -m \"hello\"\n  probemq -b localhost -a sub -t \"/test/#\""
)]
struct Cli {
    /// Action to perform
    #[arg(short, long, value_enum)]
    action: Action,

    /// Broker address
    #[arg(short, long)]
    broker: Option<String>,

    /// Broker port
    #[arg(short, long)]
    port: Option<u16>,

    /// Username
    #[arg(short = 'u', long)]
    username: Option<String>,

    /// Password
    #[arg(short = 's', long)]
    password: Option<String>,

    /// Command carried in the message payload
    #[arg(short = 'm', long = "message")]
    command: Option<String>,

    /// Topic to publish to or subscribe on
    #[arg(short = 't', long, default_value = "req")]
    topic: String,

    /// Sequence number stamped into the payload
    #[arg(short = 'n', long, default_value_t = 1)]
    sequence: u64,

    /// TOML file with broker/port/username/password
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,
}

fn apply_overrides(mut config: BrokerConfig, cli: &Cli) -> BrokerConfig {
    if let Some(broker) = &cli.broker {
        config.broker = broker.clone();
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(username) = &cli.username {
        config.username = username.clone();
    }
    if let Some(password) = &cli.password {
        config.password = password.clone();
    }
    config
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();

    let base = match &cli.config {
        Some(path) => load_config(path)?,
        None => BrokerConfig::default(),
    };
    let config = apply_overrides(base, &cli);

    if malformed_ipv4(&config.broker) {
        warn!(broker = %config.broker, "broker address looks like a malformed IPv4 literal");
    }

    // Envelope template; the publish path re-stamps time and seq on a fresh
    // builder seeded from it.
    let mut builder = MsgBuilder::new()
        .sender("alice")
        .receiver("bob")
        .time(0)
        .seq(cli.sequence);
    if let Some(command) = &cli.command {
        builder = builder.command(command);
    }
    let template = builder
        .set_field("track_id", Uuid::new_v4().to_string())
        .build();

    let mut client = BrokerClient::new(config, Box::new(MqttDialer));

    if let Err(err) = client.connect() {
        error!("connect to broker failed: {err}");
        process::exit(1);
    }
    if !wait_until(|| client.is_connected(), CONNECT_TIMEOUT, DEFAULT_POLL_PERIOD).await {
        error!("connect to broker failed");
        let _ = client.disconnect();
        process::exit(1);
    }

    match cli.action {
        Action::Sub => {
            if let Err(err) = client.subscribe(&cli.topic) {
                error!("{err}");
            } else {
                wait_until(
                    || client.message_count() > 0,
                    RECEIVE_TIMEOUT,
                    DEFAULT_POLL_PERIOD,
                )
                .await;
            }
        }
        Action::Pub => {
            let msg = MsgBuilder::from_template(&template)?
                .time(0)
                .seq(cli.sequence)
                .build();
            if let Err(err) = client.publish(&cli.topic, &msg, PUBLISH_RETRIES) {
                error!("{err}");
            }
        }
    }

    if let Err(err) = client.disconnect() {
        error!("{err}");
    }
    Ok(())
}
