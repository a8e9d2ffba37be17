//! Core types for ratsensor data.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::timestamp::Timestamp;

/// Raw values produced by one sensor poll, before the cycle stamps them.
///
/// Each field is `None` when the corresponding sensor failed to read.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SensorValues {
    /// Temperature in degrees Celsius.
    pub temperature: Option<f64>,
    /// Relative humidity in percent.
    pub humidity: Option<f64>,
    /// Ambient light in lux.
    pub light: Option<u32>,
}

impl SensorValues {
    /// Whether every sensor failed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.temperature.is_none() && self.humidity.is_none() && self.light.is_none()
    }
}

/// One environmental reading, keyed by its timestamp.
///
/// Optional fields serialize as `null` rather than being omitted, so every
/// message on the sensor topic has the same shape.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Reading {
    /// Cycle timestamp; unique key in the durable buffer.
    pub timestamp: Timestamp,
    /// Device the reading came from.
    pub device_id: String,
    /// Temperature in degrees Celsius.
    pub temperature: Option<f64>,
    /// Relative humidity in percent.
    pub humidity: Option<f64>,
    /// Ambient light in lux.
    pub light: Option<u32>,
}

impl Reading {
    /// Stamp raw sensor values with a cycle timestamp and device id.
    #[must_use]
    pub fn new(timestamp: Timestamp, device_id: impl Into<String>, values: SensorValues) -> Self {
        Self {
            timestamp,
            device_id: device_id.into(),
            temperature: values.temperature,
            humidity: values.humidity,
            light: values.light,
        }
    }

    /// The sensor values without timestamp or device id.
    #[must_use]
    pub fn values(&self) -> SensorValues {
        SensorValues {
            temperature: self.temperature,
            humidity: self.humidity,
            light: self.light,
        }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", self.timestamp)?;
        match self.temperature {
            Some(t) => write!(f, "T={t:.1}°C")?,
            None => write!(f, "T=n/a")?,
        }
        match self.humidity {
            Some(h) => write!(f, " H={h:.1}%")?,
            None => write!(f, " H=n/a")?,
        }
        match self.light {
            Some(l) => write!(f, " L={l}lx"),
            None => write!(f, " L=n/a"),
        }
    }
}

/// Raw host metrics from one poll.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SystemValues {
    /// Root filesystem usage percent.
    pub disk_percent: Option<f64>,
    /// Memory usage percent.
    pub memory_percent: Option<f64>,
    /// CPU usage percent.
    pub cpu_percent: Option<f64>,
    /// Seconds since boot.
    pub uptime_seconds: Option<u64>,
    /// Uptime rendered by [`format_uptime`].
    pub uptime_human: Option<String>,
}

impl SystemValues {
    /// Fixed values used when running without real hardware.
    #[must_use]
    pub fn simulated() -> Self {
        Self {
            disk_percent: Some(50.0),
            memory_percent: Some(60.0),
            cpu_percent: Some(25.0),
            uptime_seconds: Some(3600),
            uptime_human: Some(format_uptime(3600)),
        }
    }
}

/// A timestamped host-metrics snapshot.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MetricsSnapshot {
    /// Cycle timestamp, shared with the matching [`Reading`].
    pub timestamp: Timestamp,
    /// Device the snapshot came from.
    pub device_id: String,
    pub disk_percent: Option<f64>,
    pub memory_percent: Option<f64>,
    pub cpu_percent: Option<f64>,
    pub uptime_seconds: Option<u64>,
    pub uptime_human: Option<String>,
}

impl MetricsSnapshot {
    /// Stamp raw metrics with a cycle timestamp and device id.
    #[must_use]
    pub fn new(timestamp: Timestamp, device_id: impl Into<String>, values: SystemValues) -> Self {
        Self {
            timestamp,
            device_id: device_id.into(),
            disk_percent: values.disk_percent,
            memory_percent: values.memory_percent,
            cpu_percent: values.cpu_percent,
            uptime_seconds: values.uptime_seconds,
            uptime_human: values.uptime_human,
        }
    }
}

/// Why a device announced itself offline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum OfflineReason {
    /// Published by the broker on our behalf (last will).
    UnexpectedDisconnect,
    /// Published explicitly during graceful shutdown.
    Shutdown,
}

impl fmt::Display for OfflineReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OfflineReason::UnexpectedDisconnect => write!(f, "unexpected_disconnect"),
            OfflineReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Device liveness as announced on the status topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum DeviceStatus {
    Offline,
}

/// Retained status message, e.g. `{"status":"offline","reason":"shutdown"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StatusNotice {
    pub status: DeviceStatus,
    pub reason: OfflineReason,
}

impl StatusNotice {
    /// An offline notice with the given reason.
    #[must_use]
    pub fn offline(reason: OfflineReason) -> Self {
        Self {
            status: DeviceStatus::Offline,
            reason,
        }
    }
}

/// Render an uptime in seconds as `H:MM:SS`, prefixed by `N day(s), ` past
/// one day.
///
/// # Examples
///
/// ```
/// use ratsensor_types::format_uptime;
///
/// assert_eq!(format_uptime(3600), "1:00:00");
/// assert_eq!(format_uptime(93_784), "1 day, 2:03:04");
/// ```
#[must_use]
pub fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86_400;
    let rem = seconds % 86_400;
    let clock = format!("{}:{:02}:{:02}", rem / 3600, (rem % 3600) / 60, rem % 60);
    match days {
        0 => clock,
        1 => format!("1 day, {clock}"),
        n => format!("{n} days, {clock}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts() -> Timestamp {
        "2024-03-04T05:06:07.089Z".parse().unwrap()
    }

    #[test]
    fn test_reading_copies_values() {
        let values = SensorValues {
            temperature: Some(21.4),
            humidity: None,
            light: Some(900),
        };
        let reading = Reading::new(ts(), "dev-1", values);
        assert_eq!(reading.device_id, "dev-1");
        assert_eq!(reading.values(), values);
    }

    #[test]
    fn test_sensor_values_empty() {
        assert!(SensorValues::default().is_empty());
        let partial = SensorValues {
            light: Some(0),
            ..Default::default()
        };
        assert!(!partial.is_empty());
    }

    #[test]
    fn test_reading_display() {
        let reading = Reading::new(
            ts(),
            "dev-1",
            SensorValues {
                temperature: Some(21.44),
                humidity: Some(50.0),
                light: None,
            },
        );
        assert_eq!(
            reading.to_string(),
            "2024-03-04T05:06:07.089Z T=21.4°C H=50.0% L=n/a"
        );
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(0), "0:00:00");
        assert_eq!(format_uptime(59), "0:00:59");
        assert_eq!(format_uptime(3600), "1:00:00");
        assert_eq!(format_uptime(86_399), "23:59:59");
        assert_eq!(format_uptime(86_400), "1 day, 0:00:00");
        assert_eq!(format_uptime(3 * 86_400 + 61), "3 days, 0:01:01");
    }

    #[test]
    fn test_simulated_system_values() {
        let values = SystemValues::simulated();
        assert_eq!(values.uptime_seconds, Some(3600));
        assert_eq!(values.uptime_human.as_deref(), Some("1:00:00"));
    }

    #[test]
    fn test_offline_reason_display() {
        assert_eq!(OfflineReason::Shutdown.to_string(), "shutdown");
        assert_eq!(
            OfflineReason::UnexpectedDisconnect.to_string(),
            "unexpected_disconnect"
        );
    }

    #[cfg(feature = "serde")]
    mod serde_tests {
        use super::*;

        #[test]
        fn test_reading_json_keeps_nulls() {
            let reading = Reading::new(
                ts(),
                "dev-1",
                SensorValues {
                    temperature: Some(22.5),
                    humidity: None,
                    light: Some(8000),
                },
            );
            let json = serde_json::to_value(&reading).unwrap();
            assert_eq!(json["timestamp"], "2024-03-04T05:06:07.089Z");
            assert_eq!(json["device_id"], "dev-1");
            assert_eq!(json["temperature"], 22.5);
            assert!(json["humidity"].is_null());
            assert_eq!(json["light"], 8000);
        }

        #[test]
        fn test_reading_deserializes() {
            let json = r#"{"timestamp":"2024-03-04T05:06:07.089Z","device_id":"d","temperature":null,"humidity":40.0,"light":null}"#;
            let reading: Reading = serde_json::from_str(json).unwrap();
            assert_eq!(reading.timestamp, ts());
            assert_eq!(reading.humidity, Some(40.0));
        }

        #[test]
        fn test_status_notice_json() {
            let json =
                serde_json::to_string(&StatusNotice::offline(OfflineReason::UnexpectedDisconnect))
                    .unwrap();
            assert_eq!(json, r#"{"status":"offline","reason":"unexpected_disconnect"}"#);
            let json = serde_json::to_string(&StatusNotice::offline(OfflineReason::Shutdown)).unwrap();
            assert_eq!(json, r#"{"status":"offline","reason":"shutdown"}"#);
        }

        #[test]
        fn test_metrics_snapshot_json() {
            let snapshot = MetricsSnapshot::new(ts(), "dev-1", SystemValues::simulated());
            let json = serde_json::to_value(&snapshot).unwrap();
            assert_eq!(json["cpu_percent"], 25.0);
            assert_eq!(json["uptime_human"], "1:00:00");
            assert_eq!(json["timestamp"], "2024-03-04T05:06:07.089Z");
        }
    }
}
