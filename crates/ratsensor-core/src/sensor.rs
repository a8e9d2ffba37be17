//! Startup selection of the sensor and metrics sources.

use std::sync::Arc;

use tracing::{info, warn};

use crate::simulated::{SimulatedMetrics, SimulatedSensor};
use crate::system::SystemMetrics;
use crate::traits::{MetricsSource, SensorKind, SensorSource};

/// Hardware selectors for the real sensor source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardwarePins {
    /// BCM GPIO pin of the DHT22 data line.
    pub dht_pin: u8,
    /// I2C bus number of the LTR390.
    pub i2c_bus: u8,
}

impl Default for HardwarePins {
    fn default() -> Self {
        Self {
            dht_pin: 14,
            i2c_bus: 1,
        }
    }
}

/// The sources the monitoring loop will use, decided once at startup.
#[derive(Clone)]
pub struct SourceSelection {
    pub sensor: Arc<dyn SensorSource>,
    pub metrics: Arc<dyn MetricsSource>,
}

impl SourceSelection {
    /// Whether synthetic data is being produced.
    ///
    /// True when simulation was requested and also when hardware was
    /// requested but could not be constructed.
    pub fn is_simulated(&self) -> bool {
        self.sensor.kind() == SensorKind::Simulated
    }
}

impl std::fmt::Debug for SourceSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceSelection")
            .field("sensor", &self.sensor.kind())
            .finish_non_exhaustive()
    }
}

/// Choose the sensor and metrics sources.
///
/// Hardware that cannot be constructed falls back to simulated data; check
/// [`SourceSelection::is_simulated`] for the outcome.
pub fn select_sources(simulation: bool, pins: HardwarePins) -> SourceSelection {
    if simulation {
        info!("Simulation mode enabled; using synthetic sensor data");
        return simulated();
    }

    match hardware_sensor(pins) {
        Ok(sensor) => SourceSelection {
            sensor,
            metrics: Arc::new(SystemMetrics::new()),
        },
        Err(reason) => {
            warn!("Hardware sensors unavailable ({}); falling back to simulation mode", reason);
            simulated()
        }
    }
}

fn simulated() -> SourceSelection {
    SourceSelection {
        sensor: Arc::new(SimulatedSensor::new()),
        metrics: Arc::new(SimulatedMetrics),
    }
}

#[cfg(feature = "hardware")]
fn hardware_sensor(pins: HardwarePins) -> Result<Arc<dyn SensorSource>, String> {
    crate::hardware::HardwareSensor::new(pins.dht_pin, pins.i2c_bus)
        .map(|s| Arc::new(s) as Arc<dyn SensorSource>)
        .map_err(|e| e.to_string())
}

#[cfg(not(feature = "hardware"))]
fn hardware_sensor(_pins: HardwarePins) -> Result<Arc<dyn SensorSource>, String> {
    Err("built without the `hardware` feature".to_string())
}
