//! Schema versioning through SQLite's `user_version` pragma.

use rusqlite::Connection;
use tracing::info;

use crate::error::Result;

/// Migrations in order; entry `n` upgrades a database from version `n` to
/// `n + 1`.
const MIGRATIONS: &[&str] = &[
    // v1: one row per cycle, keyed by the cycle timestamp. `IF NOT EXISTS`
    // adopts databases written before versioning existed.
    r#"
    CREATE TABLE IF NOT EXISTS sensor_readings (
        timestamp TEXT PRIMARY KEY,
        device_id TEXT,
        temperature REAL,
        humidity REAL,
        light INTEGER
    );
    CREATE INDEX IF NOT EXISTS idx_sensor_readings_device
        ON sensor_readings(device_id, timestamp);
    "#,
];

/// Schema version this build writes.
pub const SCHEMA_VERSION: i32 = MIGRATIONS.len() as i32;

/// Bring the schema up to [`SCHEMA_VERSION`].
pub fn initialize(conn: &Connection) -> Result<()> {
    let current = user_version(conn)?;
    if current >= SCHEMA_VERSION {
        return Ok(());
    }

    for (from, sql) in MIGRATIONS.iter().enumerate().skip(current.max(0) as usize) {
        conn.execute_batch(sql)?;
        conn.pragma_update(None, "user_version", from as i32 + 1)?;
    }
    info!("Database schema at version {} (was {})", SCHEMA_VERSION, current);
    Ok(())
}

fn user_version(conn: &Connection) -> Result<i32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_database() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(user_version(&conn).unwrap(), 0);

        initialize(&conn).unwrap();
        assert_eq!(user_version(&conn).unwrap(), SCHEMA_VERSION);

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='sensor_readings'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 1);

        initialize(&conn).unwrap();
        assert_eq!(user_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_adopts_unversioned_readings_table() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE sensor_readings (
                timestamp TEXT PRIMARY KEY, device_id TEXT,
                temperature REAL, humidity REAL, light INTEGER);
             INSERT INTO sensor_readings VALUES ('2024-01-01T00:00:00.000Z', 'd', 20.0, 40.0, 5);",
        )
        .unwrap();

        initialize(&conn).unwrap();

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM sensor_readings", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
        assert_eq!(user_version(&conn).unwrap(), SCHEMA_VERSION);
    }
}
