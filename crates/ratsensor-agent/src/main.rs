//! ratsensor agent: sensor sampling, local buffering and MQTT publishing.
//!
//! Run with: `cargo run -p ratsensor-agent -- --simulation true`

use std::path::PathBuf;

use anyhow::Context;
use clap::builder::BoolishValueParser;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use ratsensor_agent::{Agent, AgentDeps, Config, ConfigOverrides, logging};
use ratsensor_core::{FileIdentity, resolve_device_id};
use ratsensor_store::{ReadingQuery, Store};

/// ratsensor edge agent.
#[derive(Parser, Debug)]
#[command(name = "ratsensor-agent")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// MQTT broker host or URL (overrides config).
    #[arg(long, env = "MQTT_BROKER", global = true)]
    broker: Option<String>,

    /// MQTT broker port (overrides config).
    #[arg(long, env = "MQTT_PORT", global = true)]
    port: Option<u16>,

    /// MQTT username (overrides config).
    #[arg(long, env = "MQTT_USER", global = true)]
    username: Option<String>,

    /// MQTT password (overrides config).
    #[arg(long, env = "MQTT_PASS", global = true, hide_env_values = true)]
    password: Option<String>,

    /// Produce synthetic sensor data (overrides config).
    #[arg(long, env = "SIMULATION_MODE", global = true, value_parser = BoolishValueParser::new())]
    simulation: Option<bool>,

    /// Seconds between readings (overrides config).
    #[arg(long, env = "READ_INTERVAL_SECONDS", global = true)]
    read_interval: Option<u64>,

    /// Readings buffered per database save (overrides config).
    #[arg(long, env = "DB_SAVE_INTERVAL_READS", global = true)]
    save_batch_size: Option<usize>,

    /// Listen for admin commands (overrides config).
    #[arg(long, env = "LISTEN_FOR_ADMIN_COMMANDS", global = true, value_parser = BoolishValueParser::new())]
    listen_for_admin: Option<bool>,

    /// Admin command topic (overrides config).
    #[arg(long, env = "ADMIN_TOPIC", global = true)]
    admin_topic: Option<String>,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            broker: self.broker.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
            simulation: self.simulation,
            read_interval: self.read_interval,
            save_batch_size: self.save_batch_size,
            listen_for_admin: self.listen_for_admin,
            admin_topic: self.admin_topic.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the agent in the foreground (default behavior).
    Run,

    /// Print stored readings as JSON lines, newest first.
    Readings {
        /// Maximum number of readings to print.
        #[arg(short, long, default_value_t = 20)]
        limit: u32,

        /// Only readings from this device.
        #[arg(short, long)]
        device: Option<String>,
    },

    /// Print the device id, creating it if needed.
    DeviceId,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    config.apply_overrides(&args.overrides());

    match args.command {
        Some(Command::Readings { limit, device }) => print_readings(&config, limit, device),
        Some(Command::DeviceId) => print_device_id(&config),
        Some(Command::Run) | None => run_agent(config, args.verbose).await,
    }
}

async fn run_agent(config: Config, verbose: bool) -> anyhow::Result<()> {
    logging::init(verbose, config.paths.log_file.as_deref());

    let deps = AgentDeps::production(&config);
    let mut agent = Agent::build(config, deps)?;

    let cancel = CancellationToken::new();
    tokio::spawn(watch_signals(cancel.clone()));

    agent.run(cancel).await;
    info!("ratsensor agent stopped");
    Ok(())
}

/// Cancel on Ctrl+C or SIGTERM.
async fn watch_signals(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C"),
                    _ = term.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                tracing::warn!("Cannot listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                info!("Received Ctrl+C");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C");
    }

    info!("Stopping after the current cycle");
    cancel.cancel();
}

fn print_readings(config: &Config, limit: u32, device: Option<String>) -> anyhow::Result<()> {
    let store = Store::open(&config.paths.database_file).with_context(|| {
        format!(
            "Failed to open database {}",
            config.paths.database_file.display()
        )
    })?;

    let mut query = ReadingQuery::new().limit(limit);
    if let Some(device) = &device {
        query = query.device(device);
    }

    for reading in store.query_readings(&query)? {
        println!("{}", serde_json::to_string(&reading)?);
    }
    Ok(())
}

fn print_device_id(config: &Config) -> anyhow::Result<()> {
    let identity = FileIdentity::new(&config.paths.device_id_file);
    let id = resolve_device_id(&identity)?;
    println!("{}", id);
    Ok(())
}
