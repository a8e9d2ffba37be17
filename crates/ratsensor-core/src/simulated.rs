//! Synthetic sensor and metrics sources.
//!
//! Used when simulation mode is configured and as the fallback when the
//! hardware source cannot be constructed.

use std::f64::consts::PI;

use async_trait::async_trait;
use rand::Rng;
use time::OffsetDateTime;
use tracing::debug;

use ratsensor_types::{SensorValues, SystemValues};

use crate::error::Result;
use crate::traits::{MetricsSource, SensorKind, SensorSource};

const TEMP_BASE: f64 = 23.5;
const HUMIDITY_BASE: f64 = 55.0;
const LIGHT_BASE: f64 = 8500.0;

/// Plausible indoor readings: noise around a base value plus a daily cycle.
///
/// Temperature peaks mid-afternoon, humidity in the morning and light around
/// 13:00 (UTC hour of day).
#[derive(Debug, Default, Clone)]
pub struct SimulatedSensor;

impl SimulatedSensor {
    pub fn new() -> Self {
        Self
    }

    /// Generate a sample for the given hour of day (0-23).
    pub fn sample_at_hour(&self, hour: u8) -> SensorValues {
        let mut rng = rand::rng();
        let hour = f64::from(hour);

        let temperature = TEMP_BASE + rng.random_range(-1.5..=1.5);
        let temp_effect = 0.2 * (temperature - TEMP_BASE);
        let humidity = HUMIDITY_BASE + rng.random_range(-5.0..=5.0) + temp_effect;

        let daily_temp = 1.5 * ((hour - 9.0) * PI / 12.0).sin();
        let daily_humidity = 5.0 * ((hour - 3.0) * PI / 12.0).sin();

        let temperature = (temperature + daily_temp).clamp(18.0, 32.0);
        let humidity = (humidity + daily_humidity).clamp(35.0, 95.0);

        let daylight = (((hour - 7.0) * PI / 12.0).sin() + 1.0) / 2.0;
        let light = (LIGHT_BASE * daylight).trunc() as i64 + rng.random_range(-500..=500);

        SensorValues {
            temperature: Some(round1(temperature)),
            humidity: Some(round1(humidity)),
            light: Some(light.max(0) as u32),
        }
    }
}

#[async_trait]
impl SensorSource for SimulatedSensor {
    fn kind(&self) -> SensorKind {
        SensorKind::Simulated
    }

    async fn initialize(&self) -> Result<()> {
        debug!("Simulated sensor initialized");
        Ok(())
    }

    async fn read_sensors(&self) -> SensorValues {
        self.sample_at_hour(OffsetDateTime::now_utc().hour())
    }

    async fn cleanup(&self) {
        debug!("Simulated sensor cleanup");
    }
}

/// Fixed host metrics for development machines and tests.
#[derive(Debug, Default, Clone)]
pub struct SimulatedMetrics;

#[async_trait]
impl MetricsSource for SimulatedMetrics {
    async fn read_system_info(&self) -> SystemValues {
        SystemValues::simulated()
    }
}

/// Round to one decimal place.
pub(crate) fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
