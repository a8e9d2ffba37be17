//! In-memory implementations of the ports for testing.
//!
//! Each mock counts its calls and supports failure injection, so the
//! monitoring loop can be exercised without hardware, a database or root.
//!
//! # Example
//!
//! ```
//! use ratsensor_core::mock::MockBuffer;
//! use ratsensor_core::DurableBuffer;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let buffer = MockBuffer::new();
//! buffer.set_should_fail(true);
//! assert!(buffer.save_readings(&[]).await.is_err());
//! assert_eq!(buffer.save_calls(), 1);
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;

use ratsensor_types::{Reading, SensorValues, SystemValues, Timestamp};

use crate::error::{Error, Result};
use crate::traits::{
    CommandExecutor, DurableBuffer, IdentityProvider, MetricsSource, SensorKind, SensorSource,
};

/// A sensor returning fixed values.
#[derive(Debug)]
pub struct MockSensor {
    values: Mutex<SensorValues>,
    fail_init: AtomicBool,
    read_count: AtomicU32,
    cleanup_count: AtomicU32,
}

impl Default for MockSensor {
    fn default() -> Self {
        Self::new(SensorValues {
            temperature: Some(22.5),
            humidity: Some(48.0),
            light: Some(640),
        })
    }
}

impl MockSensor {
    pub fn new(values: SensorValues) -> Self {
        Self {
            values: Mutex::new(values),
            fail_init: AtomicBool::new(false),
            read_count: AtomicU32::new(0),
            cleanup_count: AtomicU32::new(0),
        }
    }

    pub fn set_values(&self, values: SensorValues) {
        if let Ok(mut v) = self.values.lock() {
            *v = values;
        }
    }

    /// Make `initialize` report a failure.
    pub fn set_fail_init(&self, fail: bool) {
        self.fail_init.store(fail, Ordering::SeqCst);
    }

    pub fn read_count(&self) -> u32 {
        self.read_count.load(Ordering::SeqCst)
    }

    pub fn cleanup_count(&self) -> u32 {
        self.cleanup_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SensorSource for MockSensor {
    fn kind(&self) -> SensorKind {
        SensorKind::Simulated
    }

    async fn initialize(&self) -> Result<()> {
        if self.fail_init.load(Ordering::SeqCst) {
            return Err(Error::SensorInit("mock sensor failure".to_string()));
        }
        Ok(())
    }

    async fn read_sensors(&self) -> SensorValues {
        self.read_count.fetch_add(1, Ordering::SeqCst);
        self.values.lock().map(|v| *v).unwrap_or_default()
    }

    async fn cleanup(&self) {
        self.cleanup_count.fetch_add(1, Ordering::SeqCst);
    }
}

/// Metrics source returning [`SystemValues::simulated`].
#[derive(Debug, Default)]
pub struct MockMetrics {
    read_count: AtomicU32,
}

impl MockMetrics {
    pub fn read_count(&self) -> u32 {
        self.read_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricsSource for MockMetrics {
    async fn read_system_info(&self) -> SystemValues {
        self.read_count.fetch_add(1, Ordering::SeqCst);
        SystemValues::simulated()
    }
}

/// A durable buffer keyed by timestamp, held in memory.
#[derive(Debug, Default)]
pub struct MockBuffer {
    rows: Mutex<BTreeMap<Timestamp, Reading>>,
    batches: Mutex<Vec<Vec<Reading>>>,
    should_fail: AtomicBool,
    transient: AtomicBool,
    fail_init: AtomicBool,
    save_calls: AtomicU32,
}

impl MockBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every save fail until cleared.
    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::SeqCst);
    }

    /// Report injected failures as transient (lock contention) or not.
    pub fn set_transient(&self, transient: bool) {
        self.transient.store(transient, Ordering::SeqCst);
    }

    pub fn set_fail_init(&self, fail: bool) {
        self.fail_init.store(fail, Ordering::SeqCst);
    }

    /// Number of `save_readings` calls, failed ones included.
    pub fn save_calls(&self) -> u32 {
        self.save_calls.load(Ordering::SeqCst)
    }

    /// Batches passed to successful saves, in call order.
    pub fn batches(&self) -> Vec<Vec<Reading>> {
        self.batches.lock().map(|b| b.clone()).unwrap_or_default()
    }

    /// Stored rows in timestamp order.
    pub fn stored(&self) -> Vec<Reading> {
        self.rows
            .lock()
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DurableBuffer for MockBuffer {
    async fn initialize(&self) -> Result<()> {
        if self.fail_init.load(Ordering::SeqCst) {
            return Err(Error::storage(false, "mock buffer unavailable"));
        }
        Ok(())
    }

    async fn save_readings(&self, readings: &[Reading]) -> Result<usize> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        if self.should_fail.load(Ordering::SeqCst) {
            let transient = self.transient.load(Ordering::SeqCst);
            return Err(Error::storage(transient, "mock save failure"));
        }

        let mut rows = self
            .rows
            .lock()
            .map_err(|_| Error::storage(false, "mock buffer poisoned"))?;
        let mut inserted = 0;
        for reading in readings {
            if !rows.contains_key(&reading.timestamp) {
                rows.insert(reading.timestamp, reading.clone());
                inserted += 1;
            }
        }
        if let Ok(mut batches) = self.batches.lock() {
            batches.push(readings.to_vec());
        }
        Ok(inserted)
    }
}

/// An identity provider returning a fixed id.
#[derive(Debug, Clone)]
pub struct StaticIdentity(pub String);

impl IdentityProvider for StaticIdentity {
    fn device_id(&self) -> String {
        self.0.clone()
    }
}

/// A command executor that only counts reboot requests.
#[derive(Debug, Default)]
pub struct MockExecutor {
    reboots: AtomicU32,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reboot_count(&self) -> u32 {
        self.reboots.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommandExecutor for MockExecutor {
    async fn execute_reboot(&self) -> Result<()> {
        self.reboots.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
