use crate::analyzers::events::{EventTracker, summarize};
use crate::analyzers::score::DailyScores;
use crate::analyzers::types::{
    AggregateMetric, CategoryCounts, CategoryShare, GroupBreakdown, GroupBy, GroupMetric,
    METHOD_NOTE, StationImpact,
};
use crate::analyzers::utility::pct;
use crate::config::{EngineConfig, RushHourWindows};
use crate::downtime::{DowntimeReport, placeholders};
use crate::model::{AnalysisWindow, Category, ClassifiedSample, DayType, RushHour};
use chrono::{Datelike, NaiveDate};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::debug;

const WEEKDAYS: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

/// Bucket key of a breakdown. The derived ordering is the order buckets are
/// reported in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum GroupKey {
    Day(NaiveDate),
    Weekday(u32),
    Hour(u32),
    RushHour(RushHour),
    DayType(DayType),
    Station(String),
    Line(String),
}

impl GroupKey {
    fn label(&self) -> String {
        match self {
            GroupKey::Day(date) => date.format("%Y-%m-%d").to_string(),
            GroupKey::Weekday(idx) => WEEKDAYS[*idx as usize % 7].to_string(),
            GroupKey::Hour(h) => format!("{:02}-{:02}", h, (h + 1) % 24),
            GroupKey::RushHour(r) => r.label().to_string(),
            GroupKey::DayType(DayType::Workday) => "Workday".to_string(),
            GroupKey::DayType(DayType::Weekend) => "Weekend".to_string(),
            GroupKey::Station(s) | GroupKey::Line(s) => s.clone(),
        }
    }
}

fn keys_for(sample: &ClassifiedSample, dimension: GroupBy, rush: &RushHourWindows) -> Vec<GroupKey> {
    match dimension {
        GroupBy::Day => vec![GroupKey::Day(sample.date())],
        GroupBy::Weekday => vec![GroupKey::Weekday(sample.weekday().num_days_from_monday())],
        GroupBy::Hour => vec![GroupKey::Hour(sample.hour())],
        GroupBy::RushHour => vec![GroupKey::RushHour(rush.classify(sample.timestamp.time()))],
        GroupBy::DayType => vec![GroupKey::DayType(DayType::of(sample.weekday()))],
        GroupBy::Station => sample
            .affected_stations
            .iter()
            .map(|s| GroupKey::Station(s.clone()))
            .collect(),
        GroupBy::Line => vec![GroupKey::Line(sample.line_id.clone())],
    }
}

/// Streaming reduction of classified samples into an [`AggregateMetric`].
///
/// Samples must be pushed in time order per line (lines may interleave).
/// Samples outside the window are ignored. With `exclude_downtime`, every
/// downtime placeholder and every sample of a `(line, day)` touched by
/// downtime is dropped from the denominator; otherwise placeholders count
/// as Unknown.
#[derive(Debug)]
pub struct Aggregator {
    window: AnalysisWindow,
    rush_hours: RushHourWindows,
    group_by: Vec<GroupBy>,
    exclude_downtime: bool,
    affected_days: HashSet<(String, NaiveDate)>,
    whole_days: HashSet<(String, NaiveDate)>,
    lines: BTreeSet<String>,
    counts: CategoryCounts,
    excluded: usize,
    groups: BTreeMap<GroupBy, BTreeMap<GroupKey, CategoryCounts>>,
    scores: DailyScores,
    events: EventTracker,
    stations: BTreeMap<String, usize>,
}

impl Aggregator {
    pub fn new(
        window: AnalysisWindow,
        downtime: &DowntimeReport,
        group_by: &[GroupBy],
        exclude_downtime: bool,
        config: &EngineConfig,
    ) -> Self {
        let mut dims: Vec<GroupBy> = group_by.to_vec();
        dims.sort();
        dims.dedup();

        Self {
            window,
            rush_hours: config.rush_hours,
            groups: dims.iter().map(|d| (*d, BTreeMap::new())).collect(),
            group_by: dims,
            exclude_downtime,
            affected_days: downtime.affected_days(),
            whole_days: downtime.whole_days(),
            lines: downtime.lines().into_iter().map(str::to_string).collect(),
            counts: CategoryCounts::default(),
            excluded: 0,
            scores: DailyScores::default(),
            events: EventTracker::new(config.sample_interval, config.downtime_threshold()),
            stations: BTreeMap::new(),
        }
    }

    pub fn push(&mut self, sample: &ClassifiedSample) {
        if !self.window.contains(sample.timestamp) {
            return;
        }
        self.lines.insert(sample.line_id.clone());

        // Scores describe what was observed, independent of the exclusion flag.
        if !sample.downtime {
            self.scores
                .observe(&sample.line_id, sample.date(), sample.category);
        }

        if self.exclude_downtime
            && (sample.downtime
                || self
                    .affected_days
                    .contains(&(sample.line_id.clone(), sample.date())))
        {
            self.excluded += 1;
            return;
        }

        self.counts.add(sample.category);

        for dim in &self.group_by {
            let buckets = self.groups.entry(*dim).or_default();
            for key in keys_for(sample, *dim, &self.rush_hours) {
                buckets.entry(key).or_default().add(sample.category);
            }
        }

        for station in &sample.affected_stations {
            *self.stations.entry(station.clone()).or_default() += 1;
        }

        if !sample.downtime {
            self.events.observe(sample);
        }
    }

    pub fn finish(self) -> AggregateMetric {
        let total = self.counts.total();

        let categories = Category::ALL
            .iter()
            .map(|c| {
                let count = self.counts.get(*c);
                CategoryShare {
                    category: *c,
                    label: c.label(),
                    count,
                    pct: pct(count, total),
                }
            })
            .collect();

        let breakdowns = self
            .groups
            .into_iter()
            .map(|(dimension, buckets)| GroupBreakdown {
                dimension,
                groups: buckets
                    .into_iter()
                    .map(|(key, counts)| GroupMetric {
                        key: key.label(),
                        total: counts.total(),
                        disruption_pct: pct(counts.disrupted(), counts.total()),
                        maintenance_pct: pct(counts.maintenance, counts.total()),
                        counts,
                    })
                    .collect(),
            })
            .collect();

        let daily_scores = self
            .scores
            .finish(self.window.days(), &self.lines, &self.whole_days);

        let mut station_impacts: Vec<StationImpact> = self
            .stations
            .into_iter()
            .map(|(station, samples)| StationImpact { station, samples })
            .collect();
        station_impacts.sort_by(|a, b| {
            b.samples
                .cmp(&a.samples)
                .then_with(|| a.station.cmp(&b.station))
        });

        let events = summarize(self.events.finish());

        debug!(
            included = total,
            excluded = self.excluded,
            events = events.count,
            "Aggregation finished"
        );

        AggregateMetric {
            window: self.window,
            exclude_downtime: self.exclude_downtime,
            method: METHOD_NOTE,
            included_samples: total,
            excluded_samples: self.excluded,
            disruption_pct: pct(self.counts.disrupted(), total),
            categories,
            breakdowns,
            daily_scores,
            events,
            station_impacts,
        }
    }
}

/// Aggregates a classified window in one call.
///
/// Downtime placeholders are synthesized from `downtime` and merged with the
/// observed samples; placeholders already present in `classified` are
/// ignored. Input order does not matter.
pub fn aggregate(
    classified: &[ClassifiedSample],
    downtime: &DowntimeReport,
    window: &AnalysisWindow,
    group_by: &[GroupBy],
    exclude_downtime: bool,
    config: &EngineConfig,
) -> AggregateMetric {
    let synthetic = placeholders(downtime, config);

    let mut rows: Vec<&ClassifiedSample> = classified
        .iter()
        .filter(|s| !s.downtime)
        .chain(synthetic.iter())
        .collect();
    rows.sort_by(|a, b| {
        a.line_id
            .cmp(&b.line_id)
            .then_with(|| a.timestamp.cmp(&b.timestamp))
    });

    let mut aggregator = Aggregator::new(*window, downtime, group_by, exclude_downtime, config);
    for row in rows {
        aggregator.push(row);
    }
    aggregator.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downtime::detect_downtime;
    use crate::model::{DisruptionScore, StatusSample};
    use chrono::{NaiveDateTime, TimeDelta};

    #[test]
    fn test_percentages_sum_to_hundred() {
        let config = EngineConfig::default();
        let window = AnalysisWindow::from_dates(day(4), day(4));
        let mut rows = full_day("M1", day(4), Category::Normal);
        rows[3].category = Category::PartialDisruption;
        rows[4].category = Category::Maintenance;
        // Two hour hole in the afternoon.
        rows.retain(|r| !(14..16).contains(&r.hour()));

        let downtime = detect(&rows, &window, &config);
        assert_eq!(downtime.intervals.len(), 1);

        for exclude in [false, true] {
            let metric = aggregate(&rows, &downtime, &window, &[], exclude, &config);
            let sum: f64 = metric.categories.iter().map(|c| c.pct).sum();
            assert!((sum - 100.0).abs() < 1e-9, "exclude={exclude} sum={sum}");
        }
    }

    #[test]
    fn test_downtime_counts_as_unknown_unless_excluded() {
        let config = EngineConfig::default();
        let window = AnalysisWindow::from_dates(day(4), day(5));
        let mut rows = full_day("M1", day(4), Category::Normal);
        rows.extend(full_day("M1", day(5), Category::Normal));
        rows.retain(|r| !(r.date() == day(5) && (2..4).contains(&r.hour())));

        let downtime = detect(&rows, &window, &config);

        let included = aggregate(&rows, &downtime, &window, &[], false, &config);
        assert_eq!(included.included_samples, 288);
        assert!(included.share(Category::Unknown) > 0.0);

        let excluded = aggregate(&rows, &downtime, &window, &[], true, &config);
        assert_eq!(excluded.included_samples, 144);
        assert_eq!(excluded.share(Category::Unknown), 0.0);
        assert_eq!(excluded.share(Category::Normal), 100.0);
        assert_eq!(excluded.excluded_samples, 144);
    }

    #[test]
    fn test_worst_category_scores_the_day() {
        let config = EngineConfig::default();
        let window = AnalysisWindow::from_dates(day(4), day(4));
        let mut rows = full_day("M1", day(4), Category::Normal);
        rows[10].category = Category::PartialDisruption;
        rows[20].category = Category::CompleteDisruption;

        let downtime = detect(&rows, &window, &config);
        let metric = aggregate(&rows, &downtime, &window, &[], false, &config);

        assert_eq!(metric.score(Some("M1"), day(4)), Some(DisruptionScore::Complete));
        assert_eq!(metric.score(None, day(4)), Some(DisruptionScore::Complete));
    }

    #[test]
    fn test_day_inside_downtime_scores_no_data() {
        let config = EngineConfig::default();
        let window = AnalysisWindow::from_dates(day(4), day(6));
        let mut rows = full_day("M1", day(4), Category::Normal);
        rows.extend(full_day("M1", day(6), Category::Normal));

        let downtime = detect(&rows, &window, &config);
        let metric = aggregate(&rows, &downtime, &window, &[], false, &config);

        assert_eq!(metric.score(Some("M1"), day(4)), Some(DisruptionScore::Normal));
        assert_eq!(metric.score(Some("M1"), day(5)), Some(DisruptionScore::NoData));
        assert_eq!(metric.score(Some("M1"), day(6)), Some(DisruptionScore::Normal));
    }

    #[test]
    fn test_breakdowns() {
        let config = EngineConfig::default();
        let window = AnalysisWindow::from_dates(day(4), day(4));
        let mut rows = full_day("M1", day(4), Category::Normal);
        for row in rows.iter_mut().filter(|r| r.hour() == 8) {
            row.category = Category::PartialDisruption;
        }

        let downtime = detect(&rows, &window, &config);
        let metric = aggregate(
            &rows,
            &downtime,
            &window,
            &[GroupBy::Hour, GroupBy::RushHour, GroupBy::Weekday],
            false,
            &config,
        );

        let hours = metric.breakdown(GroupBy::Hour).unwrap();
        assert_eq!(hours.len(), 24);
        assert_eq!(hours[0].key, "00-01");
        assert_eq!(hours[8].key, "08-09");
        assert_eq!(hours[8].disruption_pct, 100.0);
        assert_eq!(hours[9].disruption_pct, 0.0);

        let rush = metric.breakdown(GroupBy::RushHour).unwrap();
        assert_eq!(rush[0].key, "Morning rush hour");
        assert_eq!(rush[0].total, 12);
        assert_eq!(rush[0].disruption_pct, 50.0);

        let weekdays = metric.breakdown(GroupBy::Weekday).unwrap();
        assert_eq!(weekdays.len(), 1);
        assert_eq!(weekdays[0].key, "Monday");
        assert!(metric.breakdown(GroupBy::Station).is_none());
    }

    #[test]
    fn test_station_impacts_and_events() {
        let config = EngineConfig::default();
        let window = AnalysisWindow::from_dates(day(4), day(4));
        let mut rows = full_day("M1", day(4), Category::Normal);
        for row in &mut rows[30..33] {
            row.category = Category::PartialDisruption;
            row.affected_stations = ["Nørreport".to_string(), "Kongens Nytorv".to_string()].into();
        }
        rows[40].category = Category::CompleteDisruption;
        rows[40].affected_stations = ["Nørreport".to_string()].into();

        let downtime = detect(&rows, &window, &config);
        let metric = aggregate(&rows, &downtime, &window, &[GroupBy::Station], false, &config);

        assert_eq!(metric.station_impacts[0].station, "Nørreport");
        assert_eq!(metric.station_impact("Nørreport"), 4);
        assert_eq!(metric.station_impact("Kongens Nytorv"), 3);
        assert_eq!(metric.station_impact("Vanløse"), 0);

        assert_eq!(metric.events.count, 2);
        assert_eq!(metric.events.total_duration_minutes, 40);
        assert_eq!(metric.events.events[0].duration_minutes, 30);

        let stations = metric.breakdown(GroupBy::Station).unwrap();
        assert_eq!(stations[0].key, "Kongens Nytorv");
        assert_eq!(stations[1].total, 4);
    }

    #[test]
    fn test_empty_window() {
        let config = EngineConfig::default();
        let window = AnalysisWindow::new(at(day(4), 0), at(day(4), 0));
        let metric = aggregate(&[], &DowntimeReport::default(), &window, &[GroupBy::Day], false, &config);

        assert!(metric.is_empty());
        assert_eq!(metric.disruption_pct, 0.0);
        assert!(metric.categories.iter().all(|c| c.pct == 0.0));
        assert!(metric.daily_scores.is_empty());
        assert_eq!(metric.method, METHOD_NOTE);
    }

    #[test]
    fn test_streaming_matches_aggregate() {
        let config = EngineConfig::default();
        let window = AnalysisWindow::from_dates(day(4), day(4));
        let mut rows = full_day("M1", day(4), Category::Normal);
        rows[7].category = Category::CompleteDisruption;

        let downtime = detect(&rows, &window, &config);
        let mut aggregator = Aggregator::new(window, &downtime, &[GroupBy::Day], false, &config);
        for chunk in rows.chunks(50) {
            for row in chunk {
                aggregator.push(row);
            }
        }

        assert_eq!(
            aggregator.finish(),
            aggregate(&rows, &downtime, &window, &[GroupBy::Day], false, &config)
        );
    }

    fn detect(rows: &[ClassifiedSample], window: &AnalysisWindow, config: &EngineConfig) -> DowntimeReport {
        let samples: Vec<StatusSample> = rows
            .iter()
            .map(|r| StatusSample::new(&r.line_id, r.timestamp, &r.raw_text))
            .collect();
        detect_downtime(&samples, &[], window, config)
    }

    fn full_day(line: &str, date: NaiveDate, category: Category) -> Vec<ClassifiedSample> {
        (0..144)
            .map(|i| ClassifiedSample {
                category,
                raw_text: category.label().to_string(),
                downtime: false,
                ..ClassifiedSample::placeholder(line, at(date, i * 10))
            })
            .collect()
    }

    fn at(date: NaiveDate, minutes: i64) -> NaiveDateTime {
        date.and_hms_opt(0, 0, 0).unwrap() + TimeDelta::minutes(minutes)
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }
}
