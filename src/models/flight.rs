//! Flight schedule data structures.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// One row as published upstream, keyed by field name.
pub type RawRow = BTreeMap<String, String>;

/// Canonical raw field names produced by the schedule parser.
pub mod fields {
    pub const FLIGHT_NUMBER: &str = "flight_number";
    pub const AIRLINE: &str = "airline";
    pub const SCHEDULED_TIME: &str = "scheduled_time";
    pub const ACTUAL_TIME: &str = "actual_time";
    pub const LOCATION: &str = "location";
    pub const TERMINAL: &str = "terminal";
    pub const GATE: &str = "gate";
    pub const STATUS: &str = "status";
}

/// Whether a movement leaves from or arrives at the scraped airport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Departure,
    Arrival,
}

impl Direction {
    /// Both directions, departures first.
    pub const ALL: [Direction; 2] = [Direction::Departure, Direction::Arrival];

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Departure => "departure",
            Direction::Arrival => "arrival",
        }
    }

    /// Label for the counterpart airport column.
    pub fn location_label(&self) -> &'static str {
        match self {
            Direction::Departure => "Destination",
            Direction::Arrival => "Origin",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "departure" | "dep" => Ok(Direction::Departure),
            "arrival" | "arr" => Ok(Direction::Arrival),
            other => Err(AppError::validation(format!("unknown direction '{other}'"))),
        }
    }
}

/// Serde adapter for `YYYYMMDD` dates.
pub mod yyyymmdd {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub const FORMAT: &str = "%Y%m%d";

    pub fn serialize<S: Serializer>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&date.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDate, D::Error> {
        let s = String::deserialize(deserializer)?;
        NaiveDate::parse_from_str(&s, FORMAT).map_err(D::Error::custom)
    }
}

/// One scheduled cargo movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlightRecord {
    /// Identity key across snapshots
    pub flight_number: String,

    /// Day the movement is scheduled for
    #[serde(with = "yyyymmdd")]
    pub date: NaiveDate,

    /// Scheduled time exactly as published
    pub scheduled_time: String,

    pub direction: Direction,

    /// Counterpart airport the schedule was queried for
    pub airport: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub airline: Option<String>,

    /// Destination for departures, origin for arrivals
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal: Option<String>,

    /// Parking stand
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// Any further published columns
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl FlightRecord {
    /// Build a record from a raw row.
    ///
    /// Returns `None` when the row carries no flight number.
    pub fn from_raw(
        mut row: RawRow,
        date: NaiveDate,
        direction: Direction,
        airport: &str,
    ) -> Option<Self> {
        let mut take = |key: &str| row.remove(key).and_then(normalize);

        let flight_number = take(fields::FLIGHT_NUMBER)?;
        let scheduled_time = take(fields::SCHEDULED_TIME).unwrap_or_default();
        let actual_time = take(fields::ACTUAL_TIME);
        let airline = take(fields::AIRLINE);
        let location = take(fields::LOCATION);
        let terminal = take(fields::TERMINAL);
        let gate = take(fields::GATE);
        let status = take(fields::STATUS);

        let extra = row
            .into_iter()
            .filter_map(|(k, v)| normalize(v).map(|v| (k, v)))
            .collect();

        Some(Self {
            flight_number,
            date,
            scheduled_time,
            direction,
            airport: airport.to_string(),
            actual_time,
            airline,
            location,
            terminal,
            gate,
            status,
            extra,
        })
    }

    /// Key used for exact (flight number, date) matching.
    pub fn pair_key(&self) -> (&str, NaiveDate) {
        (self.flight_number.as_str(), self.date)
    }
}

/// Trim a published value, mapping blanks and `NaN` to absent.
fn normalize(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Inclusive range of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(with = "yyyymmdd")]
    pub start: NaiveDate,
    #[serde(with = "yyyymmdd")]
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// `days` consecutive days beginning at `start`, clamped to the last
    /// representable date.
    pub fn starting(start: NaiveDate, days: u32) -> Self {
        let span = i64::from(days.max(1)) - 1;
        Self {
            start,
            end: start
                .checked_add_signed(Duration::days(span))
                .unwrap_or(NaiveDate::MAX),
        }
    }

    pub fn single(day: NaiveDate) -> Self {
        Self::new(day, day)
    }

    /// Every day in the range, in order.
    pub fn days(self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }

    pub fn len(&self) -> usize {
        self.days().count()
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ~ {}",
            self.start.format(yyyymmdd::FORMAT),
            self.end.format(yyyymmdd::FORMAT)
        )
    }
}

/// Full set of records for one (airport, direction) pulled in one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub airport: String,
    pub direction: Direction,
    pub range: DateRange,
    pub captured_at: DateTime<Utc>,
    pub records: Vec<FlightRecord>,
}

impl Snapshot {
    pub fn new(
        airport: impl Into<String>,
        direction: Direction,
        range: DateRange,
        records: Vec<FlightRecord>,
    ) -> Self {
        Self {
            airport: airport.into(),
            direction,
            range,
            captured_at: Utc::now(),
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
