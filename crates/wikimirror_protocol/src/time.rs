//! Timestamp helpers.
//!
//! The remote reports timestamps as ISO 8601 UTC strings with second
//! precision (`2024-01-01T12:00:00Z`). The mirror stores them in exactly
//! that form so lexical and chronological order agree.

use crate::error::{ProtocolError, ProtocolResult};
use chrono::{DateTime, SecondsFormat, Utc};

/// Formats a timestamp in the canonical second-precision form.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parses an RFC 3339 timestamp into UTC.
pub fn parse_timestamp(value: &str) -> ProtocolResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| ProtocolError::InvalidTimestamp {
            value: value.to_string(),
        })
}

/// Parses a protection expiry. The remote spells "never expires" in
/// several ways; all of them map to `None`.
pub fn parse_expiry(value: &str) -> ProtocolResult<Option<DateTime<Utc>>> {
    match value {
        "" | "infinity" | "infinite" | "indefinite" | "never" => Ok(None),
        other => parse_timestamp(other).map(Some),
    }
}
