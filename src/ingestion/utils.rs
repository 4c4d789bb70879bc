//! Utility functions for parsing export cell values
//!
//! Every parser reports failure as a value; nothing here panics on bad input.

use crate::ingestion::types::FieldValue;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::OnceLock;

const CURRENCY_SYMBOLS: &[char] = &['$', '€', '£', '¥', '₹'];

/// Accepted date formats, tried in order; the first match wins
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%Y/%m/%d",
    "%m-%d-%Y",
    "%d-%m-%Y",
    "%b %d, %Y",
    "%d %b %Y",
];

/// Timestamp formats whose date part is kept
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
];

/// Parse a currency or count cell
///
/// Strips currency symbols, thousands separators and whitespace. Accounting
/// negatives like `(12.50)` become `-12.50`; negativity is left for the
/// validator to judge.
pub fn parse_amount(raw: &str) -> FieldValue<Decimal> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return FieldValue::Missing;
    }

    let (negative, body) = match trimmed
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
    {
        Some(inner) => (true, inner),
        None => (false, trimmed),
    };

    let cleaned: String = body
        .chars()
        .filter(|c| !CURRENCY_SYMBOLS.contains(c) && *c != ',' && !c.is_whitespace())
        .collect();

    let parsed = Decimal::from_str(&cleaned).or_else(|_| Decimal::from_scientific(&cleaned));

    match parsed {
        Ok(value) if negative => FieldValue::Present(-value),
        Ok(value) => FieldValue::Present(value),
        Err(_) => FieldValue::Unparsable(raw.to_string()),
    }
}

/// Parse a date cell against the accepted formats
pub fn parse_date(raw: &str) -> FieldValue<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return FieldValue::Missing;
    }

    let date = DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
                .map(|dt| dt.date())
        });

    match date {
        Some(d) => FieldValue::Present(d),
        None => FieldValue::Unparsable(raw.to_string()),
    }
}

/// Trim an attribution cell; the column being present is what matters
pub fn clean_text(raw: &str) -> String {
    raw.trim().to_string()
}

fn date_range_patterns() -> &'static [(Regex, &'static str)] {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            (
                Regex::new(r"\((\d{4}-\d{2}-\d{2})\s+to\s+(\d{4}-\d{2}-\d{2})\)")
                    .expect("valid parenthesised range regex"),
                "%Y-%m-%d",
            ),
            (
                Regex::new(r"(\d{4}-\d{2}-\d{2})_to_(\d{4}-\d{2}-\d{2})")
                    .expect("valid underscore range regex"),
                "%Y-%m-%d",
            ),
            (
                Regex::new(r"([A-Za-z]{3}-\d{2}-\d{4})_([A-Za-z]{3}-\d{2}-\d{4})")
                    .expect("valid month-name range regex"),
                "%b-%d-%Y",
            ),
        ]
    })
}

/// Extract a reporting date range embedded in an export filename
pub fn date_range_from_name(name: &str) -> Option<(NaiveDate, NaiveDate)> {
    date_range_patterns().iter().find_map(|(re, fmt)| {
        let caps = re.captures(name)?;
        let start = NaiveDate::parse_from_str(caps.get(1)?.as_str(), fmt).ok()?;
        let end = NaiveDate::parse_from_str(caps.get(2)?.as_str(), fmt).ok()?;
        (start <= end).then_some((start, end))
    })
}

/// Midpoint of the filename date range, used when an export has no date column
pub fn implied_date_from_name(name: &str) -> Option<NaiveDate> {
    let (start, end) = date_range_from_name(name)?;
    Some(start + Duration::days((end - start).num_days() / 2))
}
