//! Boundary formatting helpers: phone numbers and timestamps.

use chrono::{Local, NaiveDateTime, TimeZone};

use crate::alert::TIMESTAMP_FORMAT;

/// Country prefix applied to normalized numbers.
const COUNTRY_PREFIX: &str = "+254";

/// Significant digits kept after the country prefix.
const SUBSCRIBER_DIGITS: usize = 9;

/// Accepted digit count before normalization.
const MIN_DIGITS: usize = 9;
const MAX_DIGITS: usize = 12;

/// Normalizes a Kenyan mobile or landline number to `+254XXXXXXXXX`.
///
/// Non-digits are ignored. Between 9 and 12 digits are accepted; the last
/// nine are kept and must start with `7` or `1`. Anything else yields an
/// empty string.
#[must_use]
pub fn normalize_phone(raw: &str) -> String {
    let digits: String = raw.trim().chars().filter(char::is_ascii_digit).collect();
    if !(MIN_DIGITS..=MAX_DIGITS).contains(&digits.len()) {
        return String::new();
    }

    let subscriber = &digits[digits.len() - SUBSCRIBER_DIGITS..];
    if !(subscriber.starts_with('7') || subscriber.starts_with('1')) {
        return String::new();
    }
    format!("{COUNTRY_PREFIX}{subscriber}")
}

/// Converts a `YYYY-MM-DD HH:MM:SS` local timestamp to RFC 3339 using the
/// process's local offset. Input that does not parse is returned unchanged.
#[must_use]
pub fn to_iso(raw: &str) -> String {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .ok()
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .map_or_else(|| raw.to_string(), |at| at.to_rfc3339())
}
