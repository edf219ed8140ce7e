use crate::error::{EngineError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use time::{Date, Duration, Month, OffsetDateTime, Time, UtcOffset};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FhirDateTime(pub OffsetDateTime);

impl FhirDateTime {
    pub fn new(datetime: OffsetDateTime) -> Self {
        Self(datetime)
    }

    pub fn inner(&self) -> &OffsetDateTime {
        &self.0
    }

    pub fn into_inner(self) -> OffsetDateTime {
        self.0
    }

    pub fn timestamp(&self) -> i64 {
        self.0.unix_timestamp()
    }
}

impl fmt::Display for FhirDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let formatted = self
            .0
            .format(&time::format_description::well_known::Rfc3339)
            .map_err(|_| fmt::Error)?;
        write!(f, "{formatted}")
    }
}

impl FromStr for FhirDateTime {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        let datetime = OffsetDateTime::parse(s, &time::format_description::well_known::Rfc3339)
            .map_err(|e| {
                EngineError::InvalidDateTime(format!("Failed to parse FHIR DateTime '{s}': {e}"))
            })?;
        Ok(FhirDateTime(datetime))
    }
}

impl Serialize for FhirDateTime {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let formatted = self
            .0
            .format(&time::format_description::well_known::Rfc3339)
            .map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&formatted)
    }
}

impl<'de> Deserialize<'de> for FhirDateTime {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        FhirDateTime::from_str(&s).map_err(serde::de::Error::custom)
    }
}

pub fn now_utc() -> FhirDateTime {
    FhirDateTime(OffsetDateTime::now_utc())
}

/// Precision a FHIR date or dateTime literal was written at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DatePrecision {
    Year,
    Month,
    Day,
    Instant,
}

/// A FHIR date/dateTime value with its original precision.
///
/// A partial date denotes the whole interval it covers: `2023` covers the
/// full year, `2023-05` the month, `2023-05-15` the day. Comparison prefixes
/// operate on the `[start_instant, end_instant]` interval, so callers get the
/// FHIR range semantics instead of a lossy point comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FhirDate {
    raw: String,
    precision: DatePrecision,
    start: OffsetDateTime,
}

impl FhirDate {
    pub fn precision(&self) -> DatePrecision {
        self.precision
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Inclusive lower bound of the interval the literal denotes.
    pub fn start_instant(&self) -> OffsetDateTime {
        self.start
    }

    /// Inclusive upper bound of the interval the literal denotes.
    pub fn end_instant(&self) -> OffsetDateTime {
        match self.precision {
            DatePrecision::Instant => self.start,
            DatePrecision::Day => self.start + Duration::days(1) - Duration::nanoseconds(1),
            DatePrecision::Month => {
                let date = self.start.date();
                let days =
                    time::util::days_in_year_month(date.year(), date.month()) as i64;
                self.start + Duration::days(days) - Duration::nanoseconds(1)
            }
            DatePrecision::Year => {
                let days = if time::util::is_leap_year(self.start.year()) {
                    366
                } else {
                    365
                };
                self.start + Duration::days(days) - Duration::nanoseconds(1)
            }
        }
    }

    /// True when this value's interval is fully inside `other`'s interval.
    pub fn within(&self, other: &FhirDate) -> bool {
        other.start_instant() <= self.start_instant()
            && self.end_instant() <= other.end_instant()
    }

    /// True when the two intervals share at least one instant.
    pub fn overlaps(&self, other: &FhirDate) -> bool {
        self.start_instant() <= other.end_instant()
            && other.start_instant() <= self.end_instant()
    }

    fn parse_year(s: &str) -> Option<i32> {
        if s.len() != 4 {
            return None;
        }
        s.parse::<i32>().ok()
    }

    fn parse_month(s: &str) -> Option<Month> {
        let m: u8 = s.parse().ok()?;
        Month::try_from(m).ok()
    }
}

impl fmt::Display for FhirDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl FromStr for FhirDate {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || EngineError::InvalidDateTime(format!("Invalid FHIR date '{s}'"));

        if let Some(t_pos) = s.find('T') {
            // Full dateTime; a missing offset is taken as UTC.
            let time_part = &s[t_pos + 1..];
            let has_offset =
                s.ends_with('Z') || time_part.contains('+') || time_part.contains('-');
            let normalized = if has_offset {
                s.to_string()
            } else {
                format!("{s}Z")
            };
            let dt = OffsetDateTime::parse(
                &normalized,
                &time::format_description::well_known::Rfc3339,
            )
            .map_err(|_| invalid())?;
            return Ok(FhirDate {
                raw: s.to_string(),
                precision: DatePrecision::Instant,
                start: dt,
            });
        }

        let parts: Vec<&str> = s.split('-').collect();
        let (precision, year, month, day) = match parts.as_slice() {
            [y] => (DatePrecision::Year, Self::parse_year(y), None, None),
            [y, m] => (
                DatePrecision::Month,
                Self::parse_year(y),
                Self::parse_month(m),
                None,
            ),
            [y, m, d] => (
                DatePrecision::Day,
                Self::parse_year(y),
                Self::parse_month(m),
                d.parse::<u8>().ok(),
            ),
            _ => return Err(invalid()),
        };

        let year = year.ok_or_else(invalid)?;
        let month = match precision {
            DatePrecision::Year => Month::January,
            _ => month.ok_or_else(invalid)?,
        };
        let day = match precision {
            DatePrecision::Day => day.ok_or_else(invalid)?,
            _ => 1,
        };
        let date = Date::from_calendar_date(year, month, day).map_err(|_| invalid())?;
        let start = date.with_time(Time::MIDNIGHT).assume_offset(UtcOffset::UTC);
        Ok(FhirDate {
            raw: s.to_string(),
            precision,
            start,
        })
    }
}
