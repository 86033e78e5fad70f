//! Wire date formatting.
//!
//! The remote store writes UTC timestamps with millisecond precision but may
//! trim trailing zeroes from the fraction, so parsing accepts any number of
//! fractional digits.

use crate::{TypesError, TypesResult};
use chrono::{DateTime, NaiveDateTime, Utc};

/// Format used when writing dates to the wire.
pub const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

const PARSE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.fZ";

/// Formats a date as `yyyy-MM-ddTHH:mm:ss.fffZ`.
#[must_use]
pub fn format_date(date: &DateTime<Utc>) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Parses a wire date.
pub fn parse_date(input: &str) -> TypesResult<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(input, PARSE_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| TypesError::InvalidDate(format!("{input}: {e}")))
}
