use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;

const KEY_FORMAT: &str = "%Y-%m-%d";

/// Canonical `YYYY-MM-DD` identifier for one local calendar day.
///
/// Always derived from local-timezone calendar fields, never from UTC
/// truncation. Lexicographic order equals chronological order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DateKey(String);

impl DateKey {
    pub fn from_date(date: NaiveDate) -> Self {
        Self(date.format(KEY_FORMAT).to_string())
    }

    /// Local calendar day of a UTC instant in the given timezone.
    pub fn from_instant(instant: DateTime<Utc>, timezone: Tz) -> Self {
        Self::from_date(instant.with_timezone(&timezone).date_naive())
    }

    pub fn today(timezone: Tz, now: DateTime<Utc>) -> Self {
        Self::from_instant(now, timezone)
    }

    /// Inverse of `from_date`. `None` for a malformed key, which is a
    /// contract violation upstream rather than a handled condition.
    pub fn to_date(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&self.0, KEY_FORMAT).ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DateKey {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl From<NaiveDate> for DateKey {
    fn from(date: NaiveDate) -> Self {
        Self::from_date(date)
    }
}
