//! Number and date filters registered on every configuration.
//!
//! Numbers follow the fixed pattern [`NUMBER_FORMAT_PATTERN`]: no grouping
//! separator and at most six fraction digits, trailing zeros dropped.
//!
//! Dates use a `chrono` pattern. The effective pattern for a `date` filter
//! call is, in order:
//!
//! 1. the explicit argument: `{{ created | date("%Y") }}`
//! 2. the per-render locale pattern carried in the context under
//!    [`DATE_FORMAT_KEY`]
//! 3. the configuration's build-time pattern, registered as a global under
//!    the same key
//!
//! Keeping the per-render pattern in the render context means concurrent
//! renders with different locales never share it.

use std::fmt::Write;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use minijinja::value::ValueKind;
use minijinja::{Environment, Error, ErrorKind, State, Value};

/// Number format applied by the `number` filter.
pub const NUMBER_FORMAT_PATTERN: &str = "0.######";

/// Context key holding the active date pattern.
pub const DATE_FORMAT_KEY: &str = "__date_format";

/// Pattern used when neither the context nor the configuration sets one.
const FALLBACK_DATE_PATTERN: &str = "%Y-%m-%d";

const MAX_FRACTION_DIGITS: usize = 6;

/// Registers the `number` and `date` filters.
pub fn register_filters(env: &mut Environment<'static>) {
    env.add_filter("number", number_filter);
    env.add_filter("date", date_filter);
}

/// Format a float with the fixed number pattern.
pub fn format_number(value: f64) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    let mut out = format!("{:.*}", MAX_FRACTION_DIGITS, value);
    if out.contains('.') {
        let trimmed = out.trim_end_matches('0').trim_end_matches('.').len();
        out.truncate(trimmed);
    }
    if out == "-0" {
        out = "0".to_string();
    }
    out
}

/// Format `value` with a chrono pattern.
///
/// Returns `None` when the pattern contains an invalid specifier.
pub fn format_date(value: &NaiveDateTime, pattern: &str) -> Option<String> {
    let mut out = String::new();
    write!(out, "{}", value.format(pattern)).ok()?;
    Some(out)
}

fn number_filter(value: Value) -> Result<String, Error> {
    if value.kind() != ValueKind::Number {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            format!("number filter expects a number, got {}", value.kind()),
        ));
    }
    if let Ok(int) = i64::try_from(value.clone()) {
        return Ok(int.to_string());
    }
    let float = f64::try_from(value)?;
    Ok(format_number(float))
}

fn date_filter(state: &State, value: Value, pattern: Option<String>) -> Result<String, Error> {
    if value.is_undefined() || value.is_none() {
        return Ok(String::new());
    }
    let pattern = match pattern {
        Some(pattern) => pattern,
        None => state
            .lookup(DATE_FORMAT_KEY)
            .and_then(|value| value.as_str().map(str::to_string))
            .unwrap_or_else(|| FALLBACK_DATE_PATTERN.to_string()),
    };
    let parsed = parse_date(&value).ok_or_else(|| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("date filter cannot interpret `{value}` as a date"),
        )
    })?;
    format_date(&parsed, &pattern).ok_or_else(|| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("invalid date pattern `{pattern}`"),
        )
    })
}

/// Accepts Unix timestamps (seconds), RFC 3339 strings, and
/// `YYYY-MM-DD[THH:MM:SS]` strings.
fn parse_date(value: &Value) -> Option<NaiveDateTime> {
    if value.kind() == ValueKind::Number {
        let secs = i64::try_from(value.clone()).ok()?;
        return DateTime::from_timestamp(secs, 0).map(|dt| dt.naive_utc());
    }
    let text = value.as_str()?.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_local());
    }
    for pattern in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, pattern) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}
