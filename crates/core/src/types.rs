//! Core types for Tally
//!
//! - DocKey: collection-qualified document key
//! - Level: rollup granularity of a counter shard (Total, Year, Month, Day, Hour)

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{TallyError, TallyResult};

/// Key of a single document: a collection plus a document name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocKey {
    /// Collection the document lives in
    pub collection: String,
    /// Document name within the collection
    pub name: String,
}

impl DocKey {
    /// Create a new document key
    pub fn new(collection: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for DocKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.name)
    }
}

/// Rollup level of a counter shard
///
/// `Total` is the base counter. The other levels are the optional date
/// hierarchy; each is keyed by the UTC period it covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Level {
    /// All-time total
    Total,
    /// Calendar year
    Year,
    /// Calendar month
    Month,
    /// Calendar day
    Day,
    /// Clock hour
    Hour,
}

impl Level {
    /// Date levels from coarsest to finest
    pub const DATE_LEVELS: [Level; 4] = [Level::Year, Level::Month, Level::Day, Level::Hour];

    /// Stored name of the level (the `Level` field and key segment)
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Total => "Total",
            Level::Year => "Year",
            Level::Month => "Month",
            Level::Day => "Day",
            Level::Hour => "Hour",
        }
    }

    /// Whether this is a date level (anything but `Total`)
    pub fn is_dated(&self) -> bool {
        !matches!(self, Level::Total)
    }

    /// Period suffix used in shard keys, `None` for `Total`
    ///
    /// Formats: Year `YYYY`, Month `YYYYMM`, Day `YYYYMMDD`, Hour `YYYYMMDDHH`.
    pub fn period_suffix(&self, at: &DateTime<Utc>) -> Option<String> {
        match self {
            Level::Total => None,
            Level::Year => Some(format!("{:04}", at.year())),
            Level::Month => Some(format!("{:04}{:02}", at.year(), at.month())),
            Level::Day => Some(format!("{:04}{:02}{:02}", at.year(), at.month(), at.day())),
            Level::Hour => Some(format!(
                "{:04}{:02}{:02}{:02}",
                at.year(),
                at.month(),
                at.day(),
                at.hour()
            )),
        }
    }

    /// Start of the period containing `at`
    ///
    /// Fails with `InvalidInput` for `Total`, which has no period.
    pub fn period_start(&self, at: &DateTime<Utc>) -> TallyResult<DateTime<Utc>> {
        let start = match self {
            Level::Total => {
                return Err(TallyError::invalid_input(
                    "Total level has no period; use count_all",
                ))
            }
            Level::Year => Utc.with_ymd_and_hms(at.year(), 1, 1, 0, 0, 0),
            Level::Month => Utc.with_ymd_and_hms(at.year(), at.month(), 1, 0, 0, 0),
            Level::Day => Utc.with_ymd_and_hms(at.year(), at.month(), at.day(), 0, 0, 0),
            Level::Hour => {
                Utc.with_ymd_and_hms(at.year(), at.month(), at.day(), at.hour(), 0, 0)
            }
        };
        start
            .single()
            .ok_or_else(|| TallyError::invalid_input(format!("no {} period for {}", self, at)))
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = TallyError;

    fn from_str(s: &str) -> TallyResult<Self> {
        match s {
            "Total" => Ok(Level::Total),
            "Year" => Ok(Level::Year),
            "Month" => Ok(Level::Month),
            "Day" => Ok(Level::Day),
            "Hour" => Ok(Level::Hour),
            other => Err(TallyError::type_mismatch("Level", "level name", other)),
        }
    }
}
