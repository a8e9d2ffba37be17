//! Adapters between the ratsensor monitoring loop and the device it runs on.
//!
//! This crate defines the ports the agent consumes ([`SensorSource`],
//! [`MetricsSource`], [`DurableBuffer`], [`IdentityProvider`],
//! [`CommandExecutor`]) and their production implementations:
//!
//! - [`SimulatedSensor`] / [`SimulatedMetrics`] for development machines
//! - `HardwareSensor` (feature `hardware`) for a DHT22 and an LTR390 on a
//!   Raspberry Pi
//! - [`SystemMetrics`] for host disk, memory, CPU and uptime
//! - [`FileIdentity`] for a device id persisted across restarts
//! - [`SystemCommandExecutor`] for the admin reboot
//!
//! It also holds the reconnect backoff ([`RetryPolicy`], [`RetryState`]) used
//! by the broker connection.
//!
//! # Example
//!
//! ```
//! use ratsensor_core::{HardwarePins, select_sources};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let sources = select_sources(true, HardwarePins::default());
//! assert!(sources.is_simulated());
//! let values = sources.sensor.read_sensors().await;
//! println!("{:?}", values);
//! # }
//! ```

pub mod backoff;
pub mod command;
pub mod error;
pub mod hardware;
pub mod identity;
pub mod mock;
pub mod sensor;
pub mod simulated;
pub mod system;
pub mod traits;

pub use backoff::{RetryPolicy, RetryState};
pub use command::SystemCommandExecutor;
pub use error::{Error, Result};
#[cfg(feature = "hardware")]
pub use hardware::HardwareSensor;
pub use identity::{FileIdentity, TEMPORARY_ID_PREFIX, is_stable_device_id, resolve_device_id};
pub use sensor::{HardwarePins, SourceSelection, select_sources};
pub use simulated::{SimulatedMetrics, SimulatedSensor};
pub use system::SystemMetrics;
pub use traits::{
    CommandExecutor, DurableBuffer, IdentityProvider, MetricsSource, SensorKind, SensorSource,
};

// Re-export from ratsensor-types
pub use ratsensor_types::{MetricsSnapshot, Reading, SensorValues, SystemValues, Timestamp};
