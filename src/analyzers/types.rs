//! Data types produced by the aggregation engine and the calculator.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::downtime::DowntimeSummary;
use crate::mapping::UnmappedSummary;
use crate::model::{AnalysisWindow, Category, DisruptionScore, timestamp_format};

/// Carried in every metric so no consumer mistakes a sample share for
/// measured time.
pub const METHOD_NOTE: &str = "Percentages are shares of sampled observations \
(one per line per sampling interval), not measured wall-clock time. Durations are \
approximated as consecutive sample count x sampling interval.";

/// Dimension a metric can be broken down by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    Day,
    Weekday,
    Hour,
    RushHour,
    DayType,
    Station,
    Line,
}

impl FromStr for GroupBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "day" | "date" => Ok(GroupBy::Day),
            "weekday" => Ok(GroupBy::Weekday),
            "hour" => Ok(GroupBy::Hour),
            "rush_hour" | "rush" => Ok(GroupBy::RushHour),
            "day_type" => Ok(GroupBy::DayType),
            "station" => Ok(GroupBy::Station),
            "line" => Ok(GroupBy::Line),
            other => Err(format!("unknown grouping '{other}'")),
        }
    }
}

impl fmt::Display for GroupBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GroupBy::Day => "day",
            GroupBy::Weekday => "weekday",
            GroupBy::Hour => "hour",
            GroupBy::RushHour => "rush_hour",
            GroupBy::DayType => "day_type",
            GroupBy::Station => "station",
            GroupBy::Line => "line",
        };
        f.write_str(name)
    }
}

/// Sample counts per category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CategoryCounts {
    pub normal: usize,
    pub maintenance: usize,
    pub partial_disruption: usize,
    pub complete_disruption: usize,
    pub unknown: usize,
}

impl CategoryCounts {
    pub fn add(&mut self, category: Category) {
        *self.slot(category) += 1;
    }

    pub fn get(&self, category: Category) -> usize {
        match category {
            Category::Normal => self.normal,
            Category::Maintenance => self.maintenance,
            Category::PartialDisruption => self.partial_disruption,
            Category::CompleteDisruption => self.complete_disruption,
            Category::Unknown => self.unknown,
        }
    }

    pub fn total(&self) -> usize {
        Category::ALL.iter().map(|c| self.get(*c)).sum()
    }

    pub fn disrupted(&self) -> usize {
        self.partial_disruption + self.complete_disruption
    }

    fn slot(&mut self, category: Category) -> &mut usize {
        match category {
            Category::Normal => &mut self.normal,
            Category::Maintenance => &mut self.maintenance,
            Category::PartialDisruption => &mut self.partial_disruption,
            Category::CompleteDisruption => &mut self.complete_disruption,
            Category::Unknown => &mut self.unknown,
        }
    }
}

/// One category's part of the distribution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryShare {
    pub category: Category,
    pub label: &'static str,
    pub count: usize,
    pub pct: f64,
}

/// A single bucket of a breakdown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupMetric {
    pub key: String,
    pub total: usize,
    pub counts: CategoryCounts,
    pub disruption_pct: f64,
    pub maintenance_pct: f64,
}

/// All buckets of one dimension, in natural order (weekdays Monday first,
/// hours ascending, stations alphabetically).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupBreakdown {
    pub dimension: GroupBy,
    pub groups: Vec<GroupMetric>,
}

/// Score of one day, for a line or (`line_id: None`) for the whole network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyScore {
    pub date: NaiveDate,
    pub line_id: Option<String>,
    pub score: DisruptionScore,
    pub interpretation: &'static str,
}

/// A maximal run of disrupted samples on one line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisruptionEvent {
    pub line_id: String,
    #[serde(with = "timestamp_format")]
    pub start: NaiveDateTime,
    /// Last disrupted sample plus one sampling interval.
    #[serde(with = "timestamp_format")]
    pub end: NaiveDateTime,
    pub samples: usize,
    pub duration_minutes: i64,
    pub worst: Category,
    pub raw_texts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayEvents {
    pub date: NaiveDate,
    pub events: usize,
    pub mean_duration_minutes: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EventSummary {
    pub count: usize,
    pub total_duration_minutes: i64,
    pub mean_duration_minutes: f64,
    pub stddev_duration_minutes: f64,
    /// Events attributed to the day they started on.
    pub per_day: Vec<DayEvents>,
    pub events: Vec<DisruptionEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StationImpact {
    pub station: String,
    pub samples: usize,
}

/// Read-only result of one aggregation query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateMetric {
    pub window: AnalysisWindow,
    pub exclude_downtime: bool,
    pub method: &'static str,
    pub included_samples: usize,
    pub excluded_samples: usize,
    pub categories: Vec<CategoryShare>,
    pub disruption_pct: f64,
    pub breakdowns: Vec<GroupBreakdown>,
    pub daily_scores: Vec<DailyScore>,
    pub events: EventSummary,
    /// Most impacted first.
    pub station_impacts: Vec<StationImpact>,
}

impl AggregateMetric {
    pub fn is_empty(&self) -> bool {
        self.included_samples == 0
    }

    pub fn share(&self, category: Category) -> f64 {
        self.categories
            .iter()
            .find(|c| c.category == category)
            .map_or(0.0, |c| c.pct)
    }

    pub fn breakdown(&self, dimension: GroupBy) -> Option<&[GroupMetric]> {
        self.breakdowns
            .iter()
            .find(|b| b.dimension == dimension)
            .map(|b| b.groups.as_slice())
    }

    /// Score of `date` for `line_id`, or for the network when `None`.
    pub fn score(&self, line_id: Option<&str>, date: NaiveDate) -> Option<DisruptionScore> {
        self.daily_scores
            .iter()
            .find(|s| s.date == date && s.line_id.as_deref() == line_id)
            .map(|s| s.score)
    }

    pub fn station_impact(&self, station: &str) -> usize {
        self.station_impacts
            .iter()
            .find(|s| s.station == station)
            .map_or(0, |s| s.samples)
    }
}

/// Document written by the report pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub schema_version: u8,
    pub generated_at: DateTime<Utc>,
    pub mapping_version: String,
    pub warning: Option<String>,
    pub unmapped: UnmappedSummary,
    pub downtime: DowntimeSummary,
    pub metric: AggregateMetric,
}
