//! Error types for ratsensor-types.

use thiserror::Error;

/// Errors that can occur when parsing ratsensor data.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// A timestamp string did not match `YYYY-MM-DDTHH:MM:SS.mmmZ`.
    #[error("Invalid timestamp '{input}': {source}")]
    InvalidTimestamp {
        /// The rejected input.
        input: String,
        /// Underlying parse failure.
        source: time::error::Parse,
    },
}

/// Result type alias using ratsensor-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
