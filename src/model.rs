//! Record types shared by the classifier, the downtime detector and the
//! aggregation engine.
//!
//! Timestamps are naive local wall-clock times, exactly as the recorder
//! wrote them. Weekday, hour and rush-hour buckets are computed on them
//! directly.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Timelike, Weekday};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::ParseCategoryError;

/// Serde adapter for the `%Y-%m-%d %H:%M:%S` timestamps used in the sample
/// log and in every export.
pub mod timestamp_format {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    const ACCEPTED: &[&str] = &[
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ];

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&ts.format(FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{raw}'")))
    }

    /// Parses any of the accepted timestamp layouts.
    pub fn parse(raw: &str) -> Option<NaiveDateTime> {
        let raw = raw.trim();
        ACCEPTED
            .iter()
            .find_map(|layout| NaiveDateTime::parse_from_str(raw, layout).ok())
    }
}

/// One observation of a line's published status, as written by the recorder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSample {
    pub line_id: String,
    #[serde(with = "timestamp_format")]
    pub timestamp: NaiveDateTime,
    pub raw_text: String,
}

impl StatusSample {
    pub fn new(
        line_id: impl Into<String>,
        timestamp: NaiveDateTime,
        raw_text: impl Into<String>,
    ) -> Self {
        Self {
            line_id: line_id.into(),
            timestamp,
            raw_text: raw_text.into(),
        }
    }
}

/// The fixed service-state taxonomy every raw status text is mapped onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    Normal,
    Maintenance,
    PartialDisruption,
    CompleteDisruption,
    Unknown,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Normal,
        Category::Maintenance,
        Category::PartialDisruption,
        Category::CompleteDisruption,
        Category::Unknown,
    ];

    pub fn is_disruption(self) -> bool {
        matches!(
            self,
            Category::PartialDisruption | Category::CompleteDisruption
        )
    }

    /// Contribution of a single sample to its day's [`DisruptionScore`].
    pub fn severity(self) -> DisruptionScore {
        match self {
            Category::Normal | Category::Maintenance => DisruptionScore::Normal,
            Category::PartialDisruption => DisruptionScore::Partial,
            Category::CompleteDisruption => DisruptionScore::Complete,
            Category::Unknown => DisruptionScore::NoData,
        }
    }

    /// Label shown to end users.
    pub fn label(self) -> &'static str {
        match self {
            Category::Normal => "Normal service",
            Category::Maintenance => "Closed for maintenance",
            Category::PartialDisruption => "Partial disruption",
            Category::CompleteDisruption => "Complete service disruption",
            Category::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Category {
    type Err = ParseCategoryError;

    /// Accepts the variant names and the user-facing labels, ignoring case,
    /// spaces, dashes and underscores.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(char::to_lowercase)
            .collect();

        match key.as_str() {
            "normal" | "normalservice" => Ok(Category::Normal),
            "maintenance" | "closedformaintenance" | "plannedmaintenance" => {
                Ok(Category::Maintenance)
            }
            "partial" | "partialdisruption" | "partialservicedisruption" => {
                Ok(Category::PartialDisruption)
            }
            "complete" | "completedisruption" | "completeservicedisruption" => {
                Ok(Category::CompleteDisruption)
            }
            "unknown" => Ok(Category::Unknown),
            _ => Err(ParseCategoryError(s.to_string())),
        }
    }
}

/// Single-day severity summary. Ordering follows severity, so the worst
/// observation of a day is simply the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(into = "i8")]
pub enum DisruptionScore {
    NoData = -1,
    Normal = 0,
    Partial = 1,
    Complete = 2,
}

impl DisruptionScore {
    pub fn interpretation(self) -> &'static str {
        match self {
            DisruptionScore::NoData => "Unknown status",
            DisruptionScore::Normal => "Normal service",
            DisruptionScore::Partial => "Partial disruption",
            DisruptionScore::Complete => "Complete disruption",
        }
    }
}

impl From<DisruptionScore> for i8 {
    fn from(score: DisruptionScore) -> i8 {
        score as i8
    }
}

fn join_stations<S: Serializer>(stations: &BTreeSet<String>, s: S) -> Result<S::Ok, S::Error> {
    let joined = stations
        .iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("; ");
    s.serialize_str(&joined)
}

/// A [`StatusSample`] with the mapping applied.
///
/// `unmapped` marks raw text the mapping table had no entry for; `downtime`
/// marks synthetic placeholders standing in for samples that were never
/// collected. Both carry [`Category::Unknown`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassifiedSample {
    pub line_id: String,
    #[serde(with = "timestamp_format")]
    pub timestamp: NaiveDateTime,
    pub raw_text: String,
    pub category: Category,
    #[serde(serialize_with = "join_stations")]
    pub affected_stations: BTreeSet<String>,
    pub reason: Option<String>,
    pub unmapped: bool,
    pub downtime: bool,
}

impl ClassifiedSample {
    /// Placeholder for a sampling slot that falls inside a downtime interval.
    pub fn placeholder(line_id: impl Into<String>, timestamp: NaiveDateTime) -> Self {
        Self {
            line_id: line_id.into(),
            timestamp,
            raw_text: String::new(),
            category: Category::Unknown,
            affected_stations: BTreeSet::new(),
            reason: None,
            unmapped: false,
            downtime: true,
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }

    pub fn weekday(&self) -> Weekday {
        self.timestamp.weekday()
    }

    pub fn hour(&self) -> u32 {
        self.timestamp.hour()
    }

    pub fn affects(&self, station: &str) -> bool {
        self.affected_stations.contains(station)
    }
}

/// A stretch of time in which no samples were collected for a line.
///
/// `open_start` / `open_end` are set when that side of the interval is the
/// analysis window edge rather than an observed sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DowntimeInterval {
    pub line_id: String,
    #[serde(with = "timestamp_format")]
    pub start: NaiveDateTime,
    #[serde(with = "timestamp_format")]
    pub end: NaiveDateTime,
    pub duration_minutes: i64,
    pub open_start: bool,
    pub open_end: bool,
}

impl DowntimeInterval {
    pub fn new(
        line_id: impl Into<String>,
        start: NaiveDateTime,
        end: NaiveDateTime,
        open_start: bool,
        open_end: bool,
    ) -> Self {
        Self {
            line_id: line_id.into(),
            start,
            end,
            duration_minutes: (end - start).num_minutes(),
            open_start,
            open_end,
        }
    }

    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    /// Whether `ts` is a slot with no observation. Observed endpoints are
    /// not part of the gap; a window edge is.
    pub fn contains(&self, ts: NaiveDateTime) -> bool {
        let after_start = if self.open_start {
            ts >= self.start
        } else {
            ts > self.start
        };
        after_start && ts < self.end
    }
}

/// Official rush-hour bucket of a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum RushHour {
    Morning,
    Afternoon,
    Regular,
}

impl RushHour {
    pub fn label(self) -> &'static str {
        match self {
            RushHour::Morning => "Morning rush hour",
            RushHour::Afternoon => "Afternoon rush hour",
            RushHour::Regular => "Regular hour",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum DayType {
    Workday,
    Weekend,
}

impl DayType {
    pub fn of(weekday: Weekday) -> Self {
        match weekday {
            Weekday::Sat | Weekday::Sun => DayType::Weekend,
            _ => DayType::Workday,
        }
    }
}

/// Half-open `[start, end)` span a query is evaluated over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AnalysisWindow {
    #[serde(with = "timestamp_format")]
    pub start: NaiveDateTime,
    #[serde(with = "timestamp_format")]
    pub end: NaiveDateTime,
}

impl AnalysisWindow {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    /// Covers the calendar days `first..=last`.
    pub fn from_dates(first: NaiveDate, last: NaiveDate) -> Self {
        let end = last
            .succ_opt()
            .map(|d| d.and_time(NaiveTime::MIN))
            .unwrap_or(NaiveDateTime::MAX);
        Self {
            start: first.and_time(NaiveTime::MIN),
            end,
        }
    }

    /// The `days` calendar days ending with `last` (inclusive).
    pub fn last_days(last: NaiveDate, days: u32) -> Self {
        let span = i64::from(days.max(1)) - 1;
        let first = last
            .checked_sub_signed(TimeDelta::days(span))
            .unwrap_or(NaiveDate::MIN);
        Self::from_dates(first, last)
    }

    pub fn contains(&self, ts: NaiveDateTime) -> bool {
        ts >= self.start && ts < self.end
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Pulls the end back to `limit` when it lies in the future of the data.
    pub fn clamp_end(self, limit: NaiveDateTime) -> Self {
        Self {
            start: self.start,
            end: self.end.min(limit).max(self.start),
        }
    }

    /// Calendar days touched by the window, in order.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.start
            .date()
            .iter_days()
            .take_while(move |d| d.and_time(NaiveTime::MIN) < self.end)
    }
}
