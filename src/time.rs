//! Whole-day date arithmetic for deadline constraints.
//!
//! Dates travel through the fact store as atoms (`"2025-06-01"`). They are
//! only parsed when a deadline constraint needs them, so a malformed value
//! costs one binding, not the run.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::DataQualityError;
use crate::value::Value;

const DAY_FORMAT: &str = "%Y-%m-%d";

/// Offset-free timestamp layouts. `%.f` also matches an absent fraction.
const TIMESTAMP_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parses a `YYYY-MM-DD` date.
///
/// ISO timestamps are accepted and truncated to the calendar day they name:
/// `T` or space separated, with or without seconds, fractional seconds, and
/// a `Z` or `±HH:MM` suffix. No timezone adjustment is applied, so
/// `2025-01-01T23:30:00-05:00` is still January 1st.
///
/// # Errors
///
/// Returns `DataQualityError::MalformedDate` when no form parses.
pub fn parse_day(value: &str) -> Result<NaiveDate, DataQualityError> {
    let trimmed = value.trim();
    let day_err = match NaiveDate::parse_from_str(trimmed, DAY_FORMAT) {
        Ok(day) => return Ok(day),
        Err(e) => e,
    };
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
        .map(|ts| ts.date())
        .or_else(|| DateTime::parse_from_rfc3339(trimmed).ok().map(|ts| ts.date_naive()))
        .ok_or_else(|| DataQualityError::MalformedDate {
            value: value.to_string(),
            reason: day_err.to_string(),
        })
}

/// Whole-day offset of a date from the common era epoch.
#[must_use]
pub fn day_offset(day: NaiveDate) -> i64 {
    i64::from(day.num_days_from_ce())
}

/// Number of whole days from `start` to `end` (negative if `end` is earlier).
///
/// # Errors
///
/// Returns `DataQualityError::MalformedDate` if either date is malformed.
///
/// # Examples
///
/// ```
/// use ace_audit::days_since;
///
/// assert_eq!(days_since("2025-01-01", "2025-01-31").unwrap(), 30);
/// assert_eq!(days_since("2025-01-01", "2025-01-01").unwrap(), 0);
/// ```
pub fn days_since(start: &str, end: &str) -> Result<i64, DataQualityError> {
    let start = parse_day(start)?;
    let end = parse_day(end)?;
    Ok(day_offset(end) - day_offset(start))
}

/// The single per-run date every deadline constraint is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditDate(NaiveDate);

impl AuditDate {
    /// Wraps a calendar date.
    #[must_use]
    pub const fn new(day: NaiveDate) -> Self {
        Self(day)
    }

    /// Parses an audit date from `YYYY-MM-DD`.
    ///
    /// # Errors
    ///
    /// Returns `DataQualityError::MalformedDate` for malformed input.
    pub fn parse(value: &str) -> Result<Self, DataQualityError> {
        parse_day(value).map(Self)
    }

    /// Returns the calendar date.
    #[must_use]
    pub const fn date(&self) -> NaiveDate {
        self.0
    }

    /// Whole days elapsed from the date held by `value` to the audit date.
    ///
    /// # Errors
    ///
    /// - `NotADate` if `value` is not an atom.
    /// - `MalformedDate` if the atom does not parse as a date.
    pub fn elapsed_since(&self, value: &Value) -> Result<i64, DataQualityError> {
        let Some(text) = value.as_atom() else {
            return Err(DataQualityError::NotADate {
                value: value.to_string(),
                type_name: value.type_name().to_string(),
            });
        };
        let start = parse_day(text)?;
        Ok(day_offset(self.0) - day_offset(start))
    }
}

impl FromStr for AuditDate {
    type Err = DataQualityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for AuditDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(DAY_FORMAT))
    }
}
