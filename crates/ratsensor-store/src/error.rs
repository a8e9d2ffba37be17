//! Error types for ratsensor-store.

use std::path::PathBuf;

use rusqlite::ErrorCode;

/// Result type for ratsensor-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in ratsensor-store.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Another connection held the database lock past the busy timeout.
    #[error("Database is locked: {0}")]
    Busy(rusqlite::Error),

    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(rusqlite::Error),

    /// Failed to create database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A stored timestamp could not be parsed.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

impl Error {
    /// Whether retrying the same operation later may succeed.
    ///
    /// Lock contention is transient; the caller keeps its data and tries
    /// again on the next save.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Busy(_))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => Error::Busy(err),
            _ => Error::Database(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_error(code: i32) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(code), None)
    }

    #[test]
    fn test_busy_and_locked_are_transient() {
        let busy = Error::from(sqlite_error(rusqlite::ffi::SQLITE_BUSY));
        assert!(matches!(busy, Error::Busy(_)));
        assert!(busy.is_transient());

        let locked = Error::from(sqlite_error(rusqlite::ffi::SQLITE_LOCKED));
        assert!(locked.is_transient());
    }

    #[test]
    fn test_other_errors_are_not_transient() {
        let full = Error::from(sqlite_error(rusqlite::ffi::SQLITE_FULL));
        assert!(matches!(full, Error::Database(_)));
        assert!(!full.is_transient());

        let dir = Error::CreateDirectory {
            path: PathBuf::from("/nope"),
            source: std::io::Error::other("denied"),
        };
        assert!(!dir.is_transient());
        assert!(dir.to_string().contains("/nope"));
    }
}
