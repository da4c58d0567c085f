//! Shared parsing utilities for attribute and flow records.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
];

/// Parses a calendar date.
///
/// Accepts `YYYY-MM-DD`, `YYYY/MM/DD`, month strings (`YYYY-MM`, resolved
/// to the first of the month), RFC 3339 timestamps, and naive timestamps.
#[must_use]
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            return Some(date);
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }

    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.date());
        }
    }

    // Monthly series use `YYYY-MM`.
    if s.len() == 7 {
        return NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d").ok();
    }

    None
}

/// Parses a date held in a JSON value. Non-string values yield `None`.
#[must_use]
pub fn parse_date_value(value: &serde_json::Value) -> Option<NaiveDate> {
    value.as_str().and_then(parse_date)
}

/// Parses a number from a string field. The result may be non-finite
/// (`"inf"`, `"NaN"`); callers decide how to treat that.
#[must_use]
pub fn parse_number(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok()
}

/// Formats a date as ISO-8601 (`YYYY-MM-DD`).
#[must_use]
pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}
