//! Text timestamps as persisted in tournament files.
//!
//! Timestamps are written with second resolution as `YYYY-MM-DDTHH:MM:SS`.
//! Older files may hold space separated or fractional values; those read
//! back truncated to the second. An empty string means "not set".

use chrono::{NaiveDateTime, Timelike};

use crate::error::{Result, StorageError};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

const ACCEPTED_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
];

pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn format_optional(ts: Option<&NaiveDateTime>) -> String {
    ts.map(format_timestamp).unwrap_or_default()
}

/// Parse a persisted timestamp, truncated to the second. `None`/empty means
/// absent.
pub fn parse_timestamp(raw: Option<&str>) -> Result<Option<NaiveDateTime>> {
    let raw = match raw.map(str::trim) {
        None | Some("") => return Ok(None),
        Some(raw) => raw,
    };

    ACCEPTED_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|ts| Some(truncate(ts)))
        .ok_or_else(|| StorageError::InvalidRow(format!("unparseable timestamp '{}'", raw)))
}

/// Current local time truncated to the persisted resolution.
pub fn now() -> NaiveDateTime {
    truncate(chrono::Local::now().naive_local())
}

pub fn truncate(ts: NaiveDateTime) -> NaiveDateTime {
    ts.with_nanosecond(0).unwrap_or(ts)
}
