//! The fixed-period sense, buffer, persist and publish loop.
//!
//! Each cycle stamps one [`Reading`] and one [`MetricsSnapshot`] with the
//! same timestamp, appends the reading to the pending buffer, saves the
//! buffer once it reaches the batch size and publishes both when the broker
//! connection is up. Saves that fail keep the buffer for the next threshold;
//! publishes that fail are logged and dropped.
//!
//! Shutdown flushes whatever is pending regardless of the batch size, then
//! disconnects from the broker and releases the sensors.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use ratsensor_core::{CommandExecutor, DurableBuffer, MetricsSource, SensorSource};
use ratsensor_types::{MetricsSnapshot, Reading, Timestamp};

use crate::broker::{BrokerConnection, CommandHandler};
use crate::config::MonitorConfig;

/// Errors from the monitoring loop.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum MonitorError {
    #[error("Invalid monitor settings: {0}")]
    InvalidSettings(String),

    /// A cycle panicked; the loop cools down and carries on.
    #[error("Monitoring cycle panicked: {0}")]
    CyclePanicked(String),
}

/// Timing and batching of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    /// Period between cycle starts.
    pub interval: Duration,
    /// Readings buffered before a durable save.
    pub save_batch_size: usize,
    /// Pause after a cycle that panicked.
    pub error_cooldown: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self::from(&MonitorConfig::default())
    }
}

impl From<&MonitorConfig> for MonitorSettings {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            interval: config.interval(),
            save_batch_size: config.save_batch_size,
            error_cooldown: Duration::from_secs(10),
        }
    }
}

/// What one cycle did.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub reading: Reading,
    pub snapshot: MetricsSnapshot,
    /// Rows written by a save this cycle; `None` if no save succeeded.
    pub saved: Option<usize>,
    /// A save was attempted and failed.
    pub save_failed: bool,
    /// Both messages were handed to the broker.
    pub published: bool,
}

/// The data sources and sinks the loop drives.
#[derive(Clone)]
pub struct MonitorParts {
    pub sensor: Arc<dyn SensorSource>,
    pub metrics: Arc<dyn MetricsSource>,
    pub buffer: Arc<dyn DurableBuffer>,
    pub connection: Arc<BrokerConnection>,
    /// Admin handler to register at startup, if admin listening is on.
    pub admin: Option<Arc<dyn CommandHandler>>,
}

/// Drives the monitoring cycle for one device.
pub struct Monitor {
    device_id: String,
    settings: MonitorSettings,
    parts: MonitorParts,
    pending: Vec<Reading>,
    cycles: u64,
    started: bool,
    shut_down: bool,
}

impl Monitor {
    pub fn new(
        device_id: impl Into<String>,
        settings: MonitorSettings,
        parts: MonitorParts,
    ) -> Result<Self, MonitorError> {
        if settings.interval.is_zero() {
            return Err(MonitorError::InvalidSettings(
                "interval must be greater than zero".to_string(),
            ));
        }
        if settings.save_batch_size == 0 {
            return Err(MonitorError::InvalidSettings(
                "save batch size must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            device_id: device_id.into(),
            settings,
            parts,
            pending: Vec::new(),
            cycles: 0,
            started: false,
            shut_down: false,
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    /// Readings not yet durably saved, oldest first.
    pub fn pending(&self) -> &[Reading] {
        &self.pending
    }

    /// Completed cycles.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Bring up sensors, storage and the broker connection.
    ///
    /// Nothing here is fatal: a sensor or buffer that fails to initialize is
    /// logged and the loop runs in degraded mode.
    pub async fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;

        if let Err(e) = self.parts.sensor.initialize().await {
            warn!("Sensor initialization failed: {}; readings will be empty", e);
        }

        if let Err(e) = self.parts.buffer.initialize().await {
            error!(
                "Durable buffer unavailable: {}; buffering readings in memory only",
                e
            );
        }

        let connected = self.parts.connection.connect().await;
        if !connected {
            info!("MQTT broker not reachable yet; will keep retrying in the background");
        }

        if let Some(handler) = &self.parts.admin {
            self.parts
                .connection
                .register_command_handler(Arc::clone(handler))
                .await;
        }

        info!(
            device_id = %self.device_id,
            "Monitoring every {:?}, saving every {} readings",
            self.settings.interval,
            self.settings.save_batch_size
        );
    }

    /// Run one sense, buffer, persist and publish cycle.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let timestamp = Timestamp::now();
        let (values, system) = tokio::join!(
            self.parts.sensor.read_sensors(),
            self.parts.metrics.read_system_info()
        );
        let reading = Reading::new(timestamp, self.device_id.clone(), values);
        let snapshot = MetricsSnapshot::new(timestamp, self.device_id.clone(), system);
        debug!("Read {}", reading);

        self.pending.push(reading.clone());

        let mut saved = None;
        let mut save_failed = false;
        if self.pending.len() >= self.settings.save_batch_size {
            match self.parts.buffer.save_readings(&self.pending).await {
                Ok(inserted) => {
                    info!(
                        "Saved {} readings to durable storage ({} new)",
                        self.pending.len(),
                        inserted
                    );
                    self.pending.clear();
                    saved = Some(inserted);
                }
                Err(e) => {
                    save_failed = true;
                    let kind = if e.is_transient() { "transient" } else { "persistent" };
                    warn!(
                        "Failed to save {} readings ({} error: {}); keeping them buffered",
                        self.pending.len(),
                        kind,
                        e
                    );
                }
            }
        }

        let published = self.publish(&reading, &snapshot);
        self.cycles += 1;

        CycleReport {
            reading,
            snapshot,
            saved,
            save_failed,
            published,
        }
    }

    fn publish(&self, reading: &Reading, snapshot: &MetricsSnapshot) -> bool {
        let connection = &self.parts.connection;
        if !connection.is_connected() {
            debug!("Not connected to MQTT broker; skipping publish");
            return false;
        }

        let topics = connection.topics();
        let sensor = connection.publish_json(&topics.sensor, reading);
        if let Err(e) = &sensor {
            warn!("Failed to publish sensor data: {}", e);
        }
        let info = connection.publish_json(&topics.info, snapshot);
        if let Err(e) = &info {
            warn!("Failed to publish system info: {}", e);
        }

        let published = sensor.is_ok() && info.is_ok();
        if published {
            debug!("Published reading and system info for {}", self.device_id);
        }
        published
    }

    /// Run one cycle, converting a panic into [`MonitorError::CyclePanicked`].
    pub async fn run_cycle_guarded(&mut self) -> Result<CycleReport, MonitorError> {
        AssertUnwindSafe(self.run_cycle())
            .catch_unwind()
            .await
            .map_err(|panic| MonitorError::CyclePanicked(panic_message(panic.as_ref())))
    }

    /// Start, loop until `cancel` fires, then shut down.
    ///
    /// Cancellation is observed between cycles; a cycle in progress always
    /// completes.
    pub async fn run(&mut self, cancel: CancellationToken) {
        self.start().await;

        while !cancel.is_cancelled() {
            let started = Instant::now();
            let pause = match self.run_cycle_guarded().await {
                Ok(_) => {
                    let elapsed = started.elapsed();
                    if elapsed >= self.settings.interval {
                        if elapsed > self.settings.interval {
                            warn!(
                                "Cycle took {:?}, longer than the {:?} interval",
                                elapsed, self.settings.interval
                            );
                        }
                        continue;
                    }
                    self.settings.interval - elapsed
                }
                Err(e) => {
                    error!("{}; pausing for {:?}", e, self.settings.error_cooldown);
                    self.settings.error_cooldown
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        info!("Monitoring loop stopped after {} cycles", self.cycles);
        self.shutdown().await;
    }

    /// Flush, disconnect and release resources. Runs at most once.
    pub async fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        info!("Shutting down");

        if !self.pending.is_empty() {
            match self.parts.buffer.save_readings(&self.pending).await {
                Ok(inserted) => {
                    info!(
                        "Flushed {} pending readings ({} new)",
                        self.pending.len(),
                        inserted
                    );
                    self.pending.clear();
                }
                Err(e) => error!(
                    "Failed to flush {} pending readings at shutdown: {}",
                    self.pending.len(),
                    e
                ),
            }
        }

        self.parts.connection.disconnect().await;
        self.parts.connection.unregister_command_handler().await;
        self.parts.sensor.cleanup().await;
        info!("Shutdown complete");
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Handles commands arriving on the admin topic.
pub struct AdminCommands {
    connection: Weak<BrokerConnection>,
    executor: Arc<dyn CommandExecutor>,
    settle: Duration,
}

impl AdminCommands {
    pub fn new(connection: &Arc<BrokerConnection>, executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            connection: Arc::downgrade(connection),
            executor,
            settle: Duration::from_secs(1),
        }
    }

    /// Pause before tearing down for a reboot.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    async fn reboot(&self) {
        warn!("Reboot requested over the admin channel");
        tokio::time::sleep(self.settle).await;

        if let Some(connection) = self.connection.upgrade() {
            connection.unregister_command_handler().await;
            connection.disconnect().await;
        }

        if let Err(e) = self.executor.execute_reboot().await {
            error!("Reboot failed: {}", e);
        }
    }
}

#[async_trait]
impl CommandHandler for AdminCommands {
    async fn handle_command(&self, command: String) {
        match command.trim().to_lowercase().as_str() {
            "reboot" => self.reboot().await,
            other => info!("Ignoring unknown admin command '{}'", other),
        }
    }
}
