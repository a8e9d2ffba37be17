//! Ports between the monitoring loop and the outside world.
//!
//! Each trait has a production adapter in this crate (or in ratsensor-store
//! for the durable buffer) and a mock in [`crate::mock`] for tests.

use async_trait::async_trait;

use ratsensor_types::{Reading, SensorValues, SystemValues};

use crate::error::Result;

/// Which variant of sensor source is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    Hardware,
    Simulated,
}

/// Produces one environmental sample per poll.
///
/// # Example
///
/// ```
/// use ratsensor_core::{SensorSource, SimulatedSensor};
///
/// # async fn example() -> ratsensor_core::Result<()> {
/// let sensor = SimulatedSensor::new();
/// sensor.initialize().await?;
/// let values = sensor.read_sensors().await;
/// assert!(values.temperature.is_some());
/// sensor.cleanup().await;
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait SensorSource: Send + Sync {
    fn kind(&self) -> SensorKind;

    /// Bring up the underlying buses.
    ///
    /// A partial failure (one sensor missing) is not an error; the missing
    /// sensor reports `None` on every read.
    async fn initialize(&self) -> Result<()>;

    /// Read all sensors. Individual failures are reported as `None` fields.
    async fn read_sensors(&self) -> SensorValues;

    /// Release buses and pins.
    async fn cleanup(&self);
}

/// Produces one host-metrics sample per poll.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn read_system_info(&self) -> SystemValues;
}

/// Persistent, idempotent store for batches of readings.
#[async_trait]
pub trait DurableBuffer: Send + Sync {
    async fn initialize(&self) -> Result<()>;

    /// Persist the batch; readings whose timestamp is already stored are
    /// skipped. Returns how many rows were new.
    async fn save_readings(&self, readings: &[Reading]) -> Result<usize>;
}

/// Resolves the device identifier used in topics and payloads.
pub trait IdentityProvider: Send + Sync {
    /// The device id. Must be stable across restarts; an id starting with
    /// [`TEMPORARY_ID_PREFIX`](crate::identity::TEMPORARY_ID_PREFIX) means no
    /// stable id could be obtained.
    fn device_id(&self) -> String;
}

/// Performs privileged host actions requested over the admin channel.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Reboot the host. May never return on success.
    async fn execute_reboot(&self) -> Result<()>;
}
