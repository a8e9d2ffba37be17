//! Edge agent that samples sensors, buffers readings in SQLite and publishes
//! them over MQTT.
//!
//! The agent:
//! - Reads temperature, humidity and light plus host metrics on a fixed period
//! - Saves readings to a local SQLite database in batches
//! - Publishes readings and metrics to an MQTT broker when connected
//! - Reconnects with exponential backoff and jitter when the broker is away
//! - Optionally accepts a `reboot` command on an admin topic
//!
//! # Configuration
//!
//! The agent reads configuration from `~/.config/ratsensor/agent.toml`:
//!
//! ```toml
//! [monitor]
//! read_interval = 30
//! save_batch_size = 5
//!
//! [mqtt]
//! broker = "mqtt://192.168.1.20:1883"
//! username = "edge"
//! password = "secret"
//! listen_for_admin = true
//! admin_topic = "admin/{device_id}"
//!
//! [paths]
//! device_id_file = "/etc/ratsensor/device_id.json"
//! database_file = "/var/lib/ratsensor/sensor_data.db"
//!
//! [sensor]
//! simulation = false
//! dht_pin = 14
//! i2c_bus = 1
//! ```

pub mod app;
pub mod broker;
pub mod config;
pub mod logging;
pub mod monitor;
pub mod storage;

pub use app::{Agent, AgentDeps, AppError};
pub use broker::{BrokerConnection, BrokerError, ConnectionState};
pub use config::{
    Config, ConfigError, ConfigOverrides, MonitorConfig, MqttConfig, PathsConfig, SensorConfig,
};
pub use monitor::{AdminCommands, CycleReport, Monitor, MonitorError, MonitorSettings};
pub use storage::SqliteBuffer;
