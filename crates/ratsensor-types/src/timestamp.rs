//! Millisecond-precision UTC timestamps.
//!
//! Every reading produced in one monitoring cycle carries the same
//! [`Timestamp`]. Its string form is also the primary key in the durable
//! buffer, so formatting is fixed-width and sorts lexicographically in
//! chronological order.

use core::fmt;
use core::str::FromStr;

use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

use crate::error::{ParseError, ParseResult};

const FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z");

/// A UTC instant truncated to whole milliseconds.
///
/// # Examples
///
/// ```
/// use ratsensor_types::Timestamp;
///
/// let ts: Timestamp = "2024-05-01T12:30:00.250Z".parse().unwrap();
/// assert_eq!(ts.to_string(), "2024-05-01T12:30:00.250Z");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(OffsetDateTime);

impl Timestamp {
    /// The current UTC time, truncated to milliseconds.
    #[must_use]
    pub fn now() -> Self {
        Self::from(OffsetDateTime::now_utc())
    }

    /// The underlying date-time value.
    #[must_use]
    pub fn as_datetime(&self) -> OffsetDateTime {
        self.0
    }

    /// Parse the canonical `YYYY-MM-DDTHH:MM:SS.mmmZ` form.
    pub fn parse(input: &str) -> ParseResult<Self> {
        PrimitiveDateTime::parse(input, FORMAT)
            .map(|dt| Self(dt.assume_utc()))
            .map_err(|source| ParseError::InvalidTimestamp {
                input: input.to_string(),
                source,
            })
    }
}

impl From<OffsetDateTime> for Timestamp {
    fn from(value: OffsetDateTime) -> Self {
        let utc = value.to_offset(time::UtcOffset::UTC);
        let millis = u32::from(utc.millisecond()) * 1_000_000;
        Self(utc.replace_nanosecond(millis).unwrap_or(utc))
    }
}

impl FromStr for Timestamp {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // FORMAT only contains components a UTC date-time always has.
        match self.0.format(FORMAT) {
            Ok(s) => f.write_str(&s),
            Err(_) => Err(fmt::Error),
        }
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Timestamp {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Timestamp {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
