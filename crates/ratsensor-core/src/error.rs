//! Error types for ratsensor-core.
//!
//! Most adapter failures never surface as an `Error`: a sensor that cannot be
//! read yields `None` fields, a metric that cannot be collected is `None`. The
//! variants here cover the cases a caller has to decide about.
//!
//! | Error | Transient | Typical caller reaction |
//! |-------|-----------|-------------------------|
//! | [`Error::SensorInit`] | no | Fall back to the simulated source |
//! | [`Error::Storage`] | depends | Keep the pending batch, try again later |
//! | [`Error::UnstableIdentity`] | no | Abort startup |
//! | [`Error::Command`] | no | Log; the admin channel is fire-and-forget |

use thiserror::Error;

/// Errors raised by ratsensor adapters.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A sensor bus or device could not be brought up.
    #[error("Sensor initialization failed: {0}")]
    SensorInit(String),

    /// The durable buffer rejected a write.
    #[error("Storage error: {source}")]
    Storage {
        /// Whether the same write may succeed later.
        transient: bool,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Only a temporary device id could be produced.
    #[error("No stable device identity available (got '{0}')")]
    UnstableIdentity(String),

    /// An external command could not be run or exited unsuccessfully.
    #[error("Command '{program}' failed: {message}")]
    Command { program: String, message: String },

    /// Invalid configuration passed to an adapter.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap a storage backend error.
    pub fn storage(
        transient: bool,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Error::Storage {
            transient,
            source: source.into(),
        }
    }

    /// Whether retrying the failed operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Storage { transient: true, .. })
    }
}

/// Result type alias using ratsensor-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
