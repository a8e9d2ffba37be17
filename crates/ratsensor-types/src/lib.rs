//! Platform-agnostic types for the ratsensor edge agent.
//!
//! This crate holds the data that flows through one monitoring cycle and
//! across the wire: sensor readings, host-metrics snapshots and the retained
//! status notice. Adapters (ratsensor-core), the durable buffer
//! (ratsensor-store) and the agent itself all share these definitions.
//!
//! # Example
//!
//! ```
//! use ratsensor_types::{Reading, SensorValues, Timestamp};
//!
//! let values = SensorValues { temperature: Some(22.1), humidity: Some(48.0), light: None };
//! let reading = Reading::new(Timestamp::now(), "device-1", values);
//! assert_eq!(reading.light, None);
//! ```

pub mod error;
pub mod timestamp;
pub mod types;

pub use error::{ParseError, ParseResult};
pub use timestamp::Timestamp;
pub use types::{
    DeviceStatus, MetricsSnapshot, OfflineReason, Reading, SensorValues, StatusNotice,
    SystemValues, format_uptime,
};
