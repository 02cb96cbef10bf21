//! # Stage Timestamp Codec
//!
//! Stage records carry their `Start`/`End` times as text in one fixed layout:
//! `YYYY-MM-DDTHH:MM:SS.ffffff`, local wall-clock time with no offset and
//! exactly six fractional digits. The layout is shared with the stage writer
//! and must be preserved byte for byte.

use chrono::NaiveDateTime;

/// `chrono` format string for the stage timestamp layout.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Format a timestamp in the stage layout.
#[must_use]
pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a timestamp in the stage layout.
///
/// The literal must be canonical: formatting the parsed value has to give the
/// literal back. This rejects inputs `chrono` alone would tolerate, such as a
/// short fraction, a signed year or a missing fraction.
///
/// The error string describes why the literal was rejected.
pub fn parse_timestamp(literal: &str) -> Result<NaiveDateTime, String> {
    let parsed =
        NaiveDateTime::parse_from_str(literal, TIMESTAMP_FORMAT).map_err(|e| e.to_string())?;

    if format_timestamp(&parsed) != literal {
        return Err(format!(
            "not in layout YYYY-MM-DDTHH:MM:SS.ffffff (read back as {})",
            format_timestamp(&parsed)
        ));
    }
    Ok(parsed)
}

// =============================================================================
// TESTS
// =============================================================================
