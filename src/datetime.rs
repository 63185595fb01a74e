// Date and time handling for instant values
// Instants print as yyyy-MM-ddTHH:mm:ss.SSSZ and compare by epoch second

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use thiserror::Error;

/// DateTime errors
#[derive(Error, Debug)]
pub enum DateTimeError {
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Could not parse duration {0} as a valid Duration. Expected format is 'PnnDTnnHnnMnnS'.")]
    InvalidDuration(String),
}

/// Parse an ISO 8601 instant. Offsets are honoured; a missing offset means UTC.
pub fn parse_iso8601(s: &str) -> Result<DateTime<Utc>, DateTimeError> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }
    Err(DateTimeError::ParseError(format!("'{}' is not an ISO 8601 date", s)))
}

/// Format an instant with millisecond precision in UTC.
pub fn format_iso8601(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Seconds since the Unix epoch; sub-second precision is ignored when comparing.
#[inline]
pub fn epoch_second(dt: &DateTime<Utc>) -> i64 {
    dt.timestamp()
}

/// Parse an ISO 8601 duration of days, hours, minutes and seconds (`P1D`,
/// `PT1H30M`, `-PT0.5S`). Each component may carry its own sign.
pub fn parse_duration(s: &str) -> Result<Duration, DateTimeError> {
    let invalid = || DateTimeError::InvalidDuration(s.to_string());
    let text = s.trim().to_ascii_uppercase();
    let (negate, rest) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text.as_str())),
    };
    let rest = rest.strip_prefix('P').ok_or_else(invalid)?;

    let mut millis: i64 = 0;
    let mut in_time = false;
    let mut components = 0;
    let mut number = String::new();
    for c in rest.chars() {
        match c {
            'T' if !in_time && number.is_empty() => in_time = true,
            '0'..='9' | '.' | '-' | '+' => number.push(c),
            unit => {
                let scale: i64 = match (in_time, unit) {
                    (false, 'D') => 86_400_000,
                    (true, 'H') => 3_600_000,
                    (true, 'M') => 60_000,
                    (true, 'S') => 1_000,
                    _ => return Err(invalid()),
                };
                let amount: f64 = number.parse().map_err(|_| invalid())?;
                if unit != 'S' && amount.fract() != 0.0 {
                    return Err(invalid());
                }
                let part = (amount * scale as f64).round();
                if !part.is_finite() || part.abs() > i64::MAX as f64 / 2.0 {
                    return Err(invalid());
                }
                millis = millis.checked_add(part as i64).ok_or_else(invalid)?;
                number.clear();
                components += 1;
            }
        }
    }
    if components == 0 || !number.is_empty() || (in_time && rest.ends_with('T')) {
        return Err(invalid());
    }
    if negate {
        millis = millis.checked_neg().ok_or_else(invalid)?;
    }
    Duration::try_milliseconds(millis).ok_or_else(invalid)
}
