//! Startup wiring: identity, source selection, storage, broker and loop.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use ratsensor_core::{
    CommandExecutor, DurableBuffer, FileIdentity, IdentityProvider, SystemCommandExecutor,
    resolve_device_id, select_sources,
};

use crate::broker::{BrokerConnection, BrokerConnector, BrokerError, CommandHandler, ConnectionSettings};
use crate::config::{Config, ConfigError};
use crate::monitor::{AdminCommands, Monitor, MonitorError, MonitorParts, MonitorSettings};
use crate::storage::SqliteBuffer;

/// Errors that stop the agent before the loop starts.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum AppError {
    /// No stable device id; publishing under a throwaway id would split the
    /// device's history.
    #[error("Device identity unavailable: {0}")]
    Identity(#[source] ratsensor_core::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Monitor(#[from] MonitorError),
}

/// Collaborators that tests replace.
pub struct AgentDeps {
    pub identity: Arc<dyn IdentityProvider>,
    pub connector: Arc<dyn BrokerConnector>,
    pub buffer: Arc<dyn DurableBuffer>,
    pub executor: Arc<dyn CommandExecutor>,
}

impl AgentDeps {
    /// Production collaborators for `config`.
    pub fn production(config: &Config) -> Self {
        Self {
            identity: Arc::new(FileIdentity::new(&config.paths.device_id_file)),
            connector: Arc::new(crate::broker::MqttConnector::new()),
            buffer: Arc::new(SqliteBuffer::new(&config.paths.database_file)),
            executor: Arc::new(SystemCommandExecutor::default()),
        }
    }
}

/// A fully wired agent, ready to run.
pub struct Agent {
    config: Config,
    device_id: String,
    connection: Arc<BrokerConnection>,
    monitor: Monitor,
}

impl Agent {
    /// Resolve the device id and wire every component.
    ///
    /// Only an unstable device id (or an unusable configuration) fails here;
    /// sensor and storage problems surface later as degraded operation.
    pub fn build(mut config: Config, deps: AgentDeps) -> Result<Self, AppError> {
        config.validate()?;

        let device_id = resolve_device_id(deps.identity.as_ref()).map_err(|e| {
            error!("CRITICAL: {}; refusing to start", e);
            AppError::Identity(e)
        })?;
        info!(device_id = %device_id, "Resolved device identity");

        let sources = select_sources(config.sensor.simulation, config.sensor.pins());
        if sources.is_simulated() && !config.sensor.simulation {
            warn!("Hardware sensors unavailable; switching to simulation mode");
            config.sensor.simulation = true;
        }

        let settings = ConnectionSettings::from_config(&config.mqtt, &device_id)?;
        let connection = Arc::new(BrokerConnection::new(deps.connector, settings));

        let admin = config.mqtt.admin_topic_template().map(|_| {
            Arc::new(AdminCommands::new(&connection, deps.executor)) as Arc<dyn CommandHandler>
        });

        let monitor = Monitor::new(
            device_id.clone(),
            MonitorSettings::from(&config.monitor),
            MonitorParts {
                sensor: sources.sensor,
                metrics: sources.metrics,
                buffer: deps.buffer,
                connection: Arc::clone(&connection),
                admin,
            },
        )?;

        Ok(Self {
            config,
            device_id,
            connection,
            monitor,
        })
    }

    /// Effective configuration, after hardware fallback.
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn connection(&self) -> &Arc<BrokerConnection> {
        &self.connection
    }

    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    /// Run until `cancel` fires, then shut down.
    pub async fn run(&mut self, cancel: CancellationToken) {
        info!(
            "Starting ratsensor agent for device {} (simulation: {})",
            self.device_id, self.config.sensor.simulation
        );
        self.monitor.run(cancel).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::mock::MockConnector;
    use ratsensor_core::mock::{MockBuffer, MockExecutor, StaticIdentity};

    fn deps(id: &str) -> AgentDeps {
        AgentDeps {
            identity: Arc::new(StaticIdentity(id.to_string())),
            connector: Arc::new(MockConnector::new()),
            buffer: Arc::new(MockBuffer::new()),
            executor: Arc::new(MockExecutor::new()),
        }
    }

    #[tokio::test]
    async fn test_temporary_identity_is_fatal() {
        let err = Agent::build(Config::default(), deps("temp-1234")).err().unwrap();
        assert!(matches!(err, AppError::Identity(_)));
    }

    #[cfg(not(feature = "hardware"))]
    #[tokio::test]
    async fn test_hardware_fallback_flips_simulation() {
        let agent = Agent::build(Config::default(), deps("dev-1")).unwrap();
        assert!(agent.config().sensor.simulation);
        assert_eq!(agent.device_id(), "dev-1");
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = Config::default();
        config.monitor.save_batch_size = 0;
        let err = Agent::build(config, deps("dev-1")).err().unwrap();
        assert!(matches!(err, AppError::Config(ConfigError::Validation(_))));
    }

    #[tokio::test]
    async fn test_topics_use_device_id() {
        let mut config = Config::default();
        config.sensor.simulation = true;
        config.mqtt.listen_for_admin = true;
        config.mqtt.admin_topic = Some("admin/{device_id}".to_string());
        let agent = Agent::build(config, deps("dev-1")).unwrap();

        let topics = agent.connection().topics();
        assert_eq!(topics.sensor, "sensor/dev-1");
        assert_eq!(topics.admin.as_deref(), Some("admin/dev-1"));
    }
}
