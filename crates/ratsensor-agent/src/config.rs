//! Agent configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ratsensor_core::{HardwarePins, RetryPolicy};
use serde::{Deserialize, Serialize};

use crate::broker::parse_broker_url;

/// Agent configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cycle timing and batching.
    pub monitor: MonitorConfig,
    /// Broker connection and topics.
    pub mqtt: MqttConfig,
    /// On-disk locations.
    pub paths: PathsConfig,
    /// Sensor source selection.
    pub sensor: SensorConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return every error found.
    ///
    /// # Example
    ///
    /// ```
    /// use ratsensor_agent::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.monitor.validate());
        errors.extend(self.mqtt.validate());
        errors.extend(self.paths.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Apply command-line and environment overrides on top of the file values.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(broker) = &overrides.broker {
            self.mqtt.broker = broker.clone();
        }
        if let Some(port) = overrides.port {
            self.mqtt.port = port;
        }
        if let Some(username) = &overrides.username {
            self.mqtt.username = Some(username.clone());
        }
        if let Some(password) = &overrides.password {
            self.mqtt.password = Some(password.clone());
        }
        if let Some(simulation) = overrides.simulation {
            self.sensor.simulation = simulation;
        }
        if let Some(interval) = overrides.read_interval {
            self.monitor.read_interval = interval;
        }
        if let Some(batch) = overrides.save_batch_size {
            self.monitor.save_batch_size = batch;
        }
        if let Some(listen) = overrides.listen_for_admin {
            self.mqtt.listen_for_admin = listen;
        }
        if let Some(topic) = &overrides.admin_topic {
            self.mqtt.admin_topic = Some(topic.clone());
        }
    }
}

/// Values a deployment injects from the command line or the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub broker: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub simulation: Option<bool>,
    pub read_interval: Option<u64>,
    pub save_batch_size: Option<usize>,
    pub listen_for_admin: Option<bool>,
    pub admin_topic: Option<String>,
}

/// Monitoring cycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Seconds between the start of two cycles.
    pub read_interval: u64,
    /// Number of readings buffered before a durable save.
    pub save_batch_size: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            read_interval: 30,
            save_batch_size: 5,
        }
    }
}

impl MonitorConfig {
    /// Validate monitor configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.read_interval == 0 || self.read_interval > 3600 {
            errors.push(ValidationError {
                field: "monitor.read_interval".to_string(),
                message: format!(
                    "read interval must be between 1 and 3600 seconds, got {}",
                    self.read_interval
                ),
            });
        }

        if self.save_batch_size == 0 {
            errors.push(ValidationError {
                field: "monitor.save_batch_size".to_string(),
                message: "save batch size must be at least 1".to_string(),
            });
        }

        errors
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.read_interval)
    }
}

/// Broker connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Broker host, or an `mqtt://` / `mqtts://` URL.
    pub broker: String,
    /// Port used when `broker` is a bare host.
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Client ids are `{prefix}-{device_id}-{random}`.
    pub client_id_prefix: String,
    /// Keep-alive interval in seconds.
    pub keep_alive: u64,
    /// Seconds to wait for the broker's connection acknowledgment.
    pub connect_timeout: u64,
    /// Topic templates; `{}` or `{device_id}` is replaced by the device id.
    pub sensor_topic: String,
    pub info_topic: String,
    pub status_topic: String,
    pub admin_topic: Option<String>,
    /// Subscribe to `admin_topic` and act on inbound commands.
    pub listen_for_admin: bool,
    /// Seconds before the first reconnect attempt.
    pub initial_retry_delay: u64,
    /// Upper bound on the reconnect delay, in seconds.
    pub max_retry_delay: u64,
    pub retry_backoff_factor: f64,
    /// Upper bound of the random delay added to each retry, in seconds.
    pub retry_jitter: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
            client_id_prefix: "ratsensor".to_string(),
            keep_alive: 60,
            connect_timeout: 5,
            sensor_topic: "sensor/{}".to_string(),
            info_topic: "info/{}".to_string(),
            status_topic: "status/{}".to_string(),
            admin_topic: None,
            listen_for_admin: false,
            initial_retry_delay: 15,
            max_retry_delay: 300,
            retry_backoff_factor: 2.0,
            retry_jitter: 5,
        }
    }
}

impl MqttConfig {
    /// Validate broker configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.broker.trim().is_empty() {
            errors.push(ValidationError {
                field: "mqtt.broker".to_string(),
                message: "broker cannot be empty".to_string(),
            });
        } else if let Err(e) = parse_broker_url(&self.broker, self.port) {
            errors.push(ValidationError {
                field: "mqtt.broker".to_string(),
                message: format!("invalid broker '{}': {}", self.broker, e),
            });
        }

        if self.port == 0 {
            errors.push(ValidationError {
                field: "mqtt.port".to_string(),
                message: "port cannot be 0".to_string(),
            });
        }

        if self.client_id_prefix.is_empty() {
            errors.push(ValidationError {
                field: "mqtt.client_id_prefix".to_string(),
                message: "client id prefix cannot be empty".to_string(),
            });
        }

        if self.connect_timeout == 0 {
            errors.push(ValidationError {
                field: "mqtt.connect_timeout".to_string(),
                message: "connect timeout must be at least 1 second".to_string(),
            });
        }

        for (field, template) in [
            ("mqtt.sensor_topic", &self.sensor_topic),
            ("mqtt.info_topic", &self.info_topic),
            ("mqtt.status_topic", &self.status_topic),
        ] {
            if template.trim().is_empty() {
                errors.push(ValidationError {
                    field: field.to_string(),
                    message: "topic template cannot be empty".to_string(),
                });
            }
        }

        let admin_missing = self
            .admin_topic
            .as_deref()
            .is_none_or(|t| t.trim().is_empty());
        if self.listen_for_admin && admin_missing {
            errors.push(ValidationError {
                field: "mqtt.admin_topic".to_string(),
                message: "admin topic is required when listen_for_admin is enabled".to_string(),
            });
        }

        if self.initial_retry_delay == 0 {
            errors.push(ValidationError {
                field: "mqtt.initial_retry_delay".to_string(),
                message: "initial retry delay must be at least 1 second".to_string(),
            });
        }

        if self.max_retry_delay < self.initial_retry_delay {
            errors.push(ValidationError {
                field: "mqtt.max_retry_delay".to_string(),
                message: format!(
                    "max retry delay ({}) cannot be less than initial retry delay ({})",
                    self.max_retry_delay, self.initial_retry_delay
                ),
            });
        }

        if !self.retry_backoff_factor.is_finite() || self.retry_backoff_factor < 1.0 {
            errors.push(ValidationError {
                field: "mqtt.retry_backoff_factor".to_string(),
                message: format!(
                    "backoff factor must be at least 1.0, got {}",
                    self.retry_backoff_factor
                ),
            });
        }

        errors
    }

    /// Reconnect backoff described by this configuration.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .initial_delay(Duration::from_secs(self.initial_retry_delay))
            .max_delay(Duration::from_secs(self.max_retry_delay))
            .backoff_factor(self.retry_backoff_factor)
            .max_jitter(Duration::from_secs(self.retry_jitter))
    }

    /// The admin topic, if admin commands should be listened for.
    pub fn admin_topic_template(&self) -> Option<&str> {
        if !self.listen_for_admin {
            return None;
        }
        self.admin_topic.as_deref().filter(|t| !t.trim().is_empty())
    }
}

/// On-disk locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// JSON file holding the persistent device id.
    pub device_id_file: PathBuf,
    /// SQLite database of buffered readings.
    pub database_file: PathBuf,
    /// Optional log file, in addition to the console.
    pub log_file: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            device_id_file: PathBuf::from("/etc/ratsensor/device_id.json"),
            database_file: PathBuf::from("/var/lib/ratsensor/sensor_data.db"),
            log_file: Some(PathBuf::from("/var/log/ratsensor/ratsensor.log")),
        }
    }
}

impl PathsConfig {
    /// Validate path configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        for (field, path) in [
            ("paths.device_id_file", &self.device_id_file),
            ("paths.database_file", &self.database_file),
        ] {
            if path.as_os_str().is_empty() {
                errors.push(ValidationError {
                    field: field.to_string(),
                    message: "path cannot be empty".to_string(),
                });
            }
        }

        if self.log_file.as_ref().is_some_and(|p| p.as_os_str().is_empty()) {
            errors.push(ValidationError {
                field: "paths.log_file".to_string(),
                message: "path cannot be empty (omit it to disable file logging)".to_string(),
            });
        }

        errors
    }
}

/// Sensor source selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Produce synthetic readings instead of touching hardware.
    pub simulation: bool,
    /// BCM GPIO pin of the DHT22 data line.
    pub dht_pin: u8,
    /// I2C bus of the LTR390.
    pub i2c_bus: u8,
}

impl Default for SensorConfig {
    fn default() -> Self {
        let pins = HardwarePins::default();
        Self {
            simulation: false,
            dht_pin: pins.dht_pin,
            i2c_bus: pins.i2c_bus,
        }
    }
}

impl SensorConfig {
    pub fn pins(&self) -> HardwarePins {
        HardwarePins {
            dht_pin: self.dht_pin,
            i2c_bus: self.i2c_bus,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `mqtt.broker`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ratsensor")
        .join("agent.toml")
}
