//! Filters for reading back stored readings.
//!
//! # Example
//!
//! ```
//! use ratsensor_store::{Store, ReadingQuery};
//!
//! let store = Store::open_in_memory()?;
//! let readings = store.query_readings(&ReadingQuery::new().device("b5f0c1d2").limit(50))?;
//! assert!(readings.is_empty());
//! # Ok::<(), ratsensor_store::Error>(())
//! ```

use rusqlite::types::Value;

use ratsensor_types::Timestamp;

const SELECT_READINGS: &str =
    "SELECT timestamp, device_id, temperature, humidity, light FROM sensor_readings";

/// Selection of stored readings, newest first unless
/// [`oldest_first`](Self::oldest_first) is set.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingQuery {
    pub device_id: Option<String>,
    /// Inclusive lower bound.
    pub since: Option<Timestamp>,
    /// Inclusive upper bound.
    pub until: Option<Timestamp>,
    pub limit: Option<u32>,
    /// Rows to skip; ignored without a limit.
    pub offset: Option<u32>,
    pub newest_first: bool,
}

impl Default for ReadingQuery {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadingQuery {
    pub fn new() -> Self {
        Self {
            device_id: None,
            since: None,
            until: None,
            limit: None,
            offset: None,
            newest_first: true,
        }
    }

    pub fn device(mut self, device_id: &str) -> Self {
        self.device_id = Some(device_id.to_string());
        self
    }

    pub fn since(mut self, time: Timestamp) -> Self {
        self.since = Some(time);
        self
    }

    pub fn until(mut self, time: Timestamp) -> Self {
        self.until = Some(time);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn oldest_first(mut self) -> Self {
        self.newest_first = false;
        self
    }

    /// SQL text and its positional parameters.
    ///
    /// Stored timestamps are fixed-width UTC strings, so the range filters
    /// compare them as text.
    pub(crate) fn to_sql(&self) -> (String, Vec<Value>) {
        let mut filters: Vec<(&str, Value)> = Vec::new();
        if let Some(device_id) = &self.device_id {
            filters.push(("device_id = ?", Value::Text(device_id.clone())));
        }
        if let Some(since) = self.since {
            filters.push(("timestamp >= ?", Value::Text(since.to_string())));
        }
        if let Some(until) = self.until {
            filters.push(("timestamp <= ?", Value::Text(until.to_string())));
        }

        let mut sql = String::from(SELECT_READINGS);
        if !filters.is_empty() {
            let clauses: Vec<&str> = filters.iter().map(|(clause, _)| *clause).collect();
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(if self.newest_first {
            " ORDER BY timestamp DESC"
        } else {
            " ORDER BY timestamp ASC"
        });

        let mut params: Vec<Value> = filters.into_iter().map(|(_, value)| value).collect();
        if let Some(limit) = self.limit {
            sql.push_str(" LIMIT ?");
            params.push(Value::Integer(i64::from(limit)));
            if let Some(offset) = self.offset {
                sql.push_str(" OFFSET ?");
                params.push(Value::Integer(i64::from(offset)));
            }
        }

        (sql, params)
    }
}
