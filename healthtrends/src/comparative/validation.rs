//! Input checks for the comparative engine's public methods

use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::OnceLock;

/// Youngest age accepted for cohort comparisons
pub const MIN_AGE: i32 = 13;
/// Oldest age accepted for cohort comparisons
pub const MAX_AGE: i32 = 120;
/// Longest accepted date range, and the longest historical lookback
pub const MAX_RANGE_DAYS: i64 = 3650;
/// Longest accepted metric name
pub const MAX_METRIC_NAME_LEN: usize = 100;

fn metric_name_regex() -> &'static Regex {
    static METRIC_NAME: OnceLock<Regex> = OnceLock::new();
    METRIC_NAME.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_.\-]{1,100}$").expect("metric name regex should be valid")
    })
}

/// Letters, digits, `_`, `-` and `.`; 1 to 100 characters
pub fn is_safe_metric_name(name: &str) -> bool {
    metric_name_regex().is_match(name)
}

/// Age within `[MIN_AGE, MAX_AGE]`
pub fn is_valid_age(age: i32) -> bool {
    (MIN_AGE..=MAX_AGE).contains(&age)
}

/// `start <= end` and the span is at most `MAX_RANGE_DAYS`
pub fn is_valid_date_range(start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
    start <= end && (end - start) <= chrono::Duration::days(MAX_RANGE_DAYS)
}

/// Lookback within `1..=MAX_RANGE_DAYS`
pub fn is_valid_lookback(days: i64) -> bool {
    (1..=MAX_RANGE_DAYS).contains(&days)
}
