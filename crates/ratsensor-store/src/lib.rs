//! Durable local buffer for ratsensor readings.
//!
//! Readings are persisted to SQLite in batches. The cycle timestamp is the
//! primary key, so saving the same reading twice stores it once, and a batch
//! that fails (for example because another process holds the lock past the
//! busy timeout) can simply be saved again later.
//!
//! # Example
//!
//! ```no_run
//! use ratsensor_store::{Store, ReadingQuery};
//!
//! let store = Store::open("sensor_data.db")?;
//!
//! let query = ReadingQuery::new().limit(10);
//! for reading in store.query_readings(&query)? {
//!     println!("{reading}");
//! }
//! # Ok::<(), ratsensor_store::Error>(())
//! ```

mod error;
mod queries;
mod schema;
mod store;

pub use error::{Error, Result};
pub use queries::ReadingQuery;
pub use schema::SCHEMA_VERSION;
pub use store::{DEFAULT_BUSY_TIMEOUT, Store};

