//! Main store implementation.

use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;
use tracing::{debug, info};

use ratsensor_types::{Reading, Timestamp};

use crate::error::{Error, Result};
use crate::queries::ReadingQuery;
use crate::schema;

/// How long a writer waits on a locked database before reporting
/// [`Error::Busy`].
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// SQLite-backed durable buffer for readings.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Open or create a database with a custom lock-contention timeout.
    pub fn open_with_timeout<P: AsRef<Path>>(path: P, busy_timeout: Duration) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }
}

// Reading operations
impl Store {
    /// Persist a batch of readings in one transaction.
    ///
    /// Rows whose timestamp is already stored are skipped. Returns the number
    /// of rows actually inserted. On error nothing from the batch is kept.
    pub fn save_readings(&mut self, readings: &[Reading]) -> Result<usize> {
        if readings.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO sensor_readings
                 (timestamp, device_id, temperature, humidity, light)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for reading in readings {
                inserted += stmt.execute(rusqlite::params![
                    reading.timestamp.to_string(),
                    reading.device_id,
                    reading.temperature,
                    reading.humidity,
                    reading.light,
                ])?;
            }
        }
        tx.commit()?;

        debug!(
            "Saved {} of {} readings ({} duplicates)",
            inserted,
            readings.len(),
            readings.len() - inserted
        );
        Ok(inserted)
    }

    /// Query readings with filters.
    pub fn query_readings(&self, query: &ReadingQuery) -> Result<Vec<Reading>> {
        let (sql, params) = query.to_sql();
        debug!("Executing query: {}", sql);

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(params), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<f64>>(2)?,
                    row.get::<_, Option<f64>>(3)?,
                    row.get::<_, Option<u32>>(4)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(ts, device_id, temperature, humidity, light)| {
                let timestamp: Timestamp = ts.parse().map_err(|_| Error::InvalidTimestamp(ts))?;
                Ok(Reading {
                    timestamp,
                    device_id: device_id.unwrap_or_default(),
                    temperature,
                    humidity,
                    light,
                })
            })
            .collect()
    }

    /// Get the latest reading, optionally for one device.
    pub fn get_latest_reading(&self, device_id: Option<&str>) -> Result<Option<Reading>> {
        let mut query = ReadingQuery::new().limit(1);
        if let Some(id) = device_id {
            query = query.device(id);
        }
        let mut readings = self.query_readings(&query)?;
        Ok(readings.pop())
    }

    /// Count stored readings, optionally for one device.
    pub fn count_readings(&self, device_id: Option<&str>) -> Result<u64> {
        let count: i64 = match device_id {
            Some(id) => self.conn.query_row(
                "SELECT COUNT(*) FROM sensor_readings WHERE device_id = ?",
                [id],
                |row| row.get(0),
            )?,
            None => {
                self.conn
                    .query_row("SELECT COUNT(*) FROM sensor_readings", [], |row| row.get(0))?
            }
        };

        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratsensor_types::SensorValues;

    fn reading(ts: &str, device: &str, temp: f64) -> Reading {
        Reading::new(
            ts.parse().unwrap(),
            device,
            SensorValues {
                temperature: Some(temp),
                humidity: Some(50.0),
                light: Some(1200),
            },
        )
    }

    #[test]
    fn test_open_in_memory() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.count_readings(None).unwrap(), 0);
    }

    #[test]
    fn test_save_and_query() {
        let mut store = Store::open_in_memory().unwrap();
        let batch = vec![
            reading("2024-01-01T00:00:00.000Z", "a", 20.0),
            reading("2024-01-01T00:00:30.000Z", "a", 21.0),
        ];
        assert_eq!(store.save_readings(&batch).unwrap(), 2);

        let stored = store
            .query_readings(&ReadingQuery::new().oldest_first())
            .unwrap();
        assert_eq!(stored, batch);
    }

    #[test]
    fn test_save_same_timestamp_twice_keeps_one_row() {
        let mut store = Store::open_in_memory().unwrap();
        let first = reading("2024-01-01T00:00:00.000Z", "a", 20.0);
        let dup = reading("2024-01-01T00:00:00.000Z", "a", 99.0);

        assert_eq!(store.save_readings(&[first.clone()]).unwrap(), 1);
        assert_eq!(store.save_readings(&[dup]).unwrap(), 0);
        assert_eq!(store.count_readings(None).unwrap(), 1);

        // First write wins.
        let latest = store.get_latest_reading(None).unwrap().unwrap();
        assert_eq!(latest.temperature, Some(20.0));
    }

    #[test]
    fn test_duplicates_within_one_batch() {
        let mut store = Store::open_in_memory().unwrap();
        let r = reading("2024-01-01T00:00:00.000Z", "a", 20.0);
        assert_eq!(store.save_readings(&[r.clone(), r]).unwrap(), 1);
    }

    #[test]
    fn test_save_empty_batch() {
        let mut store = Store::open_in_memory().unwrap();
        assert_eq!(store.save_readings(&[]).unwrap(), 0);
    }

    #[test]
    fn test_null_fields_round_trip() {
        let mut store = Store::open_in_memory().unwrap();
        let r = Reading::new(
            "2024-01-01T00:00:00.000Z".parse().unwrap(),
            "a",
            SensorValues::default(),
        );
        store.save_readings(&[r.clone()]).unwrap();
        let latest = store.get_latest_reading(Some("a")).unwrap().unwrap();
        assert_eq!(latest, r);
    }

    #[test]
    fn test_count_and_filter_by_device() {
        let mut store = Store::open_in_memory().unwrap();
        store
            .save_readings(&[
                reading("2024-01-01T00:00:00.000Z", "a", 20.0),
                reading("2024-01-01T00:00:01.000Z", "b", 20.0),
                reading("2024-01-01T00:00:02.000Z", "b", 20.0),
            ])
            .unwrap();

        assert_eq!(store.count_readings(Some("a")).unwrap(), 1);
        assert_eq!(store.count_readings(Some("b")).unwrap(), 2);
        assert_eq!(store.count_readings(None).unwrap(), 3);

        let latest_b = store.get_latest_reading(Some("b")).unwrap().unwrap();
        assert_eq!(latest_b.timestamp.to_string(), "2024-01-01T00:00:02.000Z");
    }

    #[test]
    fn test_time_range_query() {
        let mut store = Store::open_in_memory().unwrap();
        store
            .save_readings(&[
                reading("2024-01-01T00:00:00.000Z", "a", 1.0),
                reading("2024-01-01T00:01:00.000Z", "a", 2.0),
                reading("2024-01-01T00:02:00.000Z", "a", 3.0),
            ])
            .unwrap();

        let query = ReadingQuery::new()
            .since("2024-01-01T00:00:30.000Z".parse().unwrap())
            .until("2024-01-01T00:01:30.000Z".parse().unwrap());
        let found = store.query_readings(&query).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].temperature, Some(2.0));
    }
}
