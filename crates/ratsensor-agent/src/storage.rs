//! [`DurableBuffer`] over the SQLite store.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use ratsensor_core::{DurableBuffer, Error, Reading, Result};
use ratsensor_store::{DEFAULT_BUSY_TIMEOUT, Store};

/// SQLite durable buffer.
///
/// If the database cannot be opened at startup the agent keeps running on
/// its in-memory buffer; every later save retries the open, so storage comes
/// back on its own once the disk does.
///
/// Store calls run on the blocking pool; a save can wait up to the busy
/// timeout on another writer's lock.
pub struct SqliteBuffer {
    path: PathBuf,
    busy_timeout: Duration,
    store: Arc<Mutex<Option<Store>>>,
}

impl SqliteBuffer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            store: Arc::new(Mutex::new(None)),
        }
    }

    /// Bound on waiting for another writer's lock.
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` against the open store on the blocking pool, opening it first
    /// if needed. `f` receives whether this call did the open.
    async fn with_store<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Store, bool) -> Result<T> + Send + 'static,
    {
        let slot = Arc::clone(&self.store);
        let path = self.path.clone();
        let busy_timeout = self.busy_timeout;

        tokio::task::spawn_blocking(move || {
            let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
            let opened = guard.is_none();
            if opened {
                *guard = Some(Store::open_with_timeout(&path, busy_timeout).map_err(into_core)?);
            }
            match guard.as_mut() {
                Some(store) => f(store, opened),
                None => Err(Error::storage(false, "database not open")),
            }
        })
        .await
        .map_err(|e| Error::storage(false, e))?
    }
}

fn into_core(e: ratsensor_store::Error) -> Error {
    Error::storage(e.is_transient(), e)
}

#[async_trait]
impl DurableBuffer for SqliteBuffer {
    async fn initialize(&self) -> Result<()> {
        if self.with_store(|_, opened| Ok(opened)).await? {
            info!("Durable buffer ready at {}", self.path.display());
        }
        Ok(())
    }

    async fn save_readings(&self, readings: &[Reading]) -> Result<usize> {
        let batch = readings.to_vec();
        let (saved, reopened) = self
            .with_store(move |store, opened| {
                let saved = store.save_readings(&batch).map_err(into_core)?;
                Ok((saved, opened))
            })
            .await?;
        if reopened {
            warn!("Durable buffer at {} is available again", self.path.display());
        }
        Ok(saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratsensor_core::SensorValues;

    fn reading(ts: &str) -> Reading {
        Reading::new(
            ts.parse().unwrap(),
            "dev-1",
            SensorValues {
                temperature: Some(21.5),
                humidity: None,
                light: Some(300),
            },
        )
    }

    #[tokio::test]
    async fn test_save_is_idempotent_per_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = SqliteBuffer::new(dir.path().join("sensor_data.db"));
        buffer.initialize().await.unwrap();

        let r = reading("2024-05-01T10:00:00.000Z");
        assert_eq!(buffer.save_readings(&[r.clone()]).await.unwrap(), 1);
        assert_eq!(buffer.save_readings(&[r]).await.unwrap(), 0);

        let store = Store::open(buffer.path()).unwrap();
        assert_eq!(store.count_readings(None).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_lazy_open_after_failed_initialize() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the parent directory should be.
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, b"").unwrap();
        let buffer = SqliteBuffer::new(blocker.join("sensor_data.db"));

        let err = buffer.initialize().await.unwrap_err();
        assert!(!err.is_transient());
        assert!(
            buffer
                .save_readings(&[reading("2024-05-01T10:00:00.000Z")])
                .await
                .is_err()
        );

        // Storage comes back.
        std::fs::remove_file(&blocker).unwrap();
        let saved = buffer
            .save_readings(&[reading("2024-05-01T10:00:00.000Z")])
            .await
            .unwrap();
        assert_eq!(saved, 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_locked_database_does_not_block_the_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sensor_data.db");
        let buffer = Arc::new(SqliteBuffer::new(&path).with_busy_timeout(Duration::from_secs(5)));
        buffer.initialize().await.unwrap();

        let other = rusqlite::Connection::open(&path).unwrap();
        other.execute_batch("BEGIN EXCLUSIVE").unwrap();

        let pending = Arc::clone(&buffer);
        let save = tokio::spawn(async move {
            pending
                .save_readings(&[reading("2024-05-01T10:00:00.000Z")])
                .await
        });

        // The single runtime thread keeps ticking while the save waits on the lock.
        let started = std::time::Instant::now();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!save.is_finished());

        other.execute_batch("COMMIT").unwrap();
        assert_eq!(save.await.unwrap().unwrap(), 1);
    }
}
