//! Detection of sampling gaps ("system downtime").
//!
//! A gap between two consecutive samples of a line that exceeds
//! `sample_interval × downtime_tolerance` is downtime. Each qualifying gap
//! yields its own interval; intervals are not merged across a sample.
//! Gaps at the edges of the analysis window are reported open-ended and
//! clipped to the window.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::debug;

use crate::config::EngineConfig;
use crate::model::{AnalysisWindow, ClassifiedSample, DowntimeInterval, StatusSample};

/// Downtime intervals for one line, within `window`.
///
/// `timestamps` may include samples just outside the window so that gaps
/// spanning the window edges are measured against real neighbours.
pub fn detect_line(
    line_id: &str,
    timestamps: &[NaiveDateTime],
    window: &AnalysisWindow,
    config: &EngineConfig,
) -> Vec<DowntimeInterval> {
    if window.is_empty() {
        return Vec::new();
    }

    let mut ts = timestamps.to_vec();
    ts.sort();
    ts.dedup();

    let (Some(&first), Some(&last)) = (ts.first(), ts.last()) else {
        return vec![DowntimeInterval::new(
            line_id,
            window.start,
            window.end,
            true,
            true,
        )];
    };

    let threshold = config.downtime_threshold();
    let mut raw: Vec<(NaiveDateTime, NaiveDateTime, bool, bool)> = Vec::new();

    if first - window.start > threshold {
        raw.push((window.start, first, true, false));
    }
    for pair in ts.windows(2) {
        if pair[1] - pair[0] > threshold {
            raw.push((pair[0], pair[1], false, false));
        }
    }
    if window.end - last > threshold {
        raw.push((last, window.end, false, true));
    }

    raw.into_iter()
        .filter(|(start, end, _, _)| *end > window.start && *start < window.end)
        .map(|(start, end, open_start, open_end)| {
            let clipped_start = start.max(window.start);
            let clipped_end = end.min(window.end);
            DowntimeInterval::new(
                line_id,
                clipped_start,
                clipped_end,
                open_start || clipped_start != start,
                open_end || clipped_end != end,
            )
        })
        .collect()
}

/// Runs [`detect_line`] for every line in `samples` plus every line in
/// `expected_lines` (a line with no samples at all is down for the whole
/// window).
pub fn detect_downtime(
    samples: &[StatusSample],
    expected_lines: &[String],
    window: &AnalysisWindow,
    config: &EngineConfig,
) -> DowntimeReport {
    let mut by_line: BTreeMap<&str, Vec<NaiveDateTime>> = BTreeMap::new();
    for line in expected_lines {
        by_line.entry(line.as_str()).or_default();
    }
    for sample in samples {
        by_line
            .entry(sample.line_id.as_str())
            .or_default()
            .push(sample.timestamp);
    }

    let intervals: Vec<DowntimeInterval> = by_line
        .iter()
        .flat_map(|(line, ts)| detect_line(line, ts, window, config))
        .collect();

    debug!(
        lines = by_line.len(),
        intervals = intervals.len(),
        "Downtime detection complete"
    );
    DowntimeReport { intervals }
}

/// All downtime intervals of a query, ordered by line then start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DowntimeReport {
    pub intervals: Vec<DowntimeInterval>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineDowntime {
    pub line_id: String,
    pub minutes: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayDowntime {
    pub line_id: String,
    pub date: NaiveDate,
    pub minutes: i64,
    pub whole_day: bool,
}

/// Serializable totals for reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DowntimeSummary {
    pub intervals: Vec<DowntimeInterval>,
    pub per_line: Vec<LineDowntime>,
    pub per_day: Vec<DayDowntime>,
}

impl DowntimeReport {
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn lines(&self) -> BTreeSet<&str> {
        self.intervals.iter().map(|i| i.line_id.as_str()).collect()
    }

    pub fn for_line<'a>(&'a self, line_id: &'a str) -> impl Iterator<Item = &'a DowntimeInterval> {
        self.intervals.iter().filter(move |i| i.line_id == line_id)
    }

    /// Whether `ts` is an unobserved slot of `line_id`.
    pub fn contains(&self, line_id: &str, ts: NaiveDateTime) -> bool {
        self.for_line(line_id).any(|i| i.contains(ts))
    }

    pub fn total_by_line(&self) -> BTreeMap<String, TimeDelta> {
        let mut totals: BTreeMap<String, TimeDelta> = BTreeMap::new();
        for interval in &self.intervals {
            *totals
                .entry(interval.line_id.clone())
                .or_insert_with(TimeDelta::zero) += interval.duration();
        }
        totals
    }

    /// Downtime per `(line, day)`; intervals crossing midnight are split.
    pub fn total_by_day(&self) -> BTreeMap<(String, NaiveDate), TimeDelta> {
        let mut totals: BTreeMap<(String, NaiveDate), TimeDelta> = BTreeMap::new();
        for interval in &self.intervals {
            let mut cursor = interval.start;
            while cursor < interval.end {
                let Some(next_day) = cursor.date().succ_opt() else {
                    break;
                };
                let segment_end = next_day.and_time(NaiveTime::MIN).min(interval.end);
                *totals
                    .entry((interval.line_id.clone(), cursor.date()))
                    .or_insert_with(TimeDelta::zero) += segment_end - cursor;
                cursor = segment_end;
            }
        }
        totals
    }

    /// `(line, day)` pairs with any downtime at all.
    pub fn affected_days(&self) -> HashSet<(String, NaiveDate)> {
        self.total_by_day().into_keys().collect()
    }

    /// `(line, day)` pairs the line spent entirely in downtime.
    pub fn whole_days(&self) -> HashSet<(String, NaiveDate)> {
        self.total_by_day()
            .into_iter()
            .filter(|(_, total)| *total >= TimeDelta::days(1))
            .map(|(key, _)| key)
            .collect()
    }

    pub fn summary(&self) -> DowntimeSummary {
        let per_line = self
            .total_by_line()
            .into_iter()
            .map(|(line_id, total)| LineDowntime {
                line_id,
                minutes: total.num_minutes(),
            })
            .collect();

        let per_day = self
            .total_by_day()
            .into_iter()
            .map(|((line_id, date), total)| DayDowntime {
                line_id,
                date,
                minutes: total.num_minutes(),
                whole_day: total >= TimeDelta::days(1),
            })
            .collect();

        DowntimeSummary {
            intervals: self.intervals.clone(),
            per_line,
            per_day,
        }
    }
}

/// Synthetic Unknown samples for every nominal sampling slot inside the
/// report's intervals. Observed endpoints are skipped; a window edge that
/// opened an interval is itself a missing slot.
pub fn placeholders(report: &DowntimeReport, config: &EngineConfig) -> Vec<ClassifiedSample> {
    let step = config.sample_interval;
    if step <= TimeDelta::zero() {
        return Vec::new();
    }

    let mut out = Vec::new();
    for interval in &report.intervals {
        let mut slot = if interval.open_start {
            interval.start
        } else {
            interval.start + step
        };
        while slot < interval.end {
            out.push(ClassifiedSample::placeholder(&interval.line_id, slot));
            slot += step;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_interior_gap() {
        let config = EngineConfig::default();
        let window = AnalysisWindow::new(at(0), at(80));
        let ts = [at(0), at(10), at(20), at(60), at(70)];

        let intervals = detect_line("M1", &ts, &window, &config);

        assert_eq!(intervals.len(), 1);
        assert_eq!(intervals[0].start, at(20));
        assert_eq!(intervals[0].end, at(60));
        assert_eq!(intervals[0].duration_minutes, 40);
        assert!(!intervals[0].open_start);
        assert!(!intervals[0].open_end);
    }

    #[test]
    fn test_jitter_within_tolerance_is_not_downtime() {
        let config = EngineConfig::default();
        let window = AnalysisWindow::new(at(0), at(40));
        let ts = [at(0), at(14), at(25), at(35)];

        assert!(detect_line("M1", &ts, &window, &config).is_empty());
    }

    #[test]
    fn test_consecutive_gaps_are_separate_intervals() {
        let config = EngineConfig::default();
        let window = AnalysisWindow::new(at(0), at(130));
        let ts = [at(0), at(60), at(120)];

        let intervals = detect_line("M1", &ts, &window, &config);
        assert_eq!(intervals.len(), 2);
        assert_eq!(intervals[0].end, intervals[1].start);
    }

    #[test]
    fn test_edge_gaps_are_open_and_clipped() {
        let config = EngineConfig::default();
        let window = AnalysisWindow::new(at(0), at(120));
        let ts = [at(30), at(40), at(50)];

        let intervals = detect_line("M1", &ts, &window, &config);

        assert_eq!(intervals.len(), 2);
        assert_eq!((intervals[0].start, intervals[0].end), (at(0), at(30)));
        assert!(intervals[0].open_start);
        assert_eq!((intervals[1].start, intervals[1].end), (at(50), at(120)));
        assert!(intervals[1].open_end);
    }

    #[test]
    fn test_gap_crossing_window_start_is_clipped() {
        let config = EngineConfig::default();
        let window = AnalysisWindow::new(at(60), at(120));
        let ts = [at(0), at(90), at(100), at(110)];

        let intervals = detect_line("M1", &ts, &window, &config);

        assert_eq!(intervals.len(), 1);
        assert_eq!((intervals[0].start, intervals[0].end), (at(60), at(90)));
        assert!(intervals[0].open_start);
    }

    #[test]
    fn test_line_without_samples_is_down_for_whole_window() {
        let config = EngineConfig::default();
        let window = AnalysisWindow::new(at(0), at(60));
        let samples = vec![StatusSample::new("M1", at(0), "ok")];

        let report = detect_downtime(&samples, &["M1".to_string(), "M2".to_string()], &window, &config);
        let m2: Vec<_> = report.for_line("M2").collect();

        assert_eq!(m2.len(), 1);
        assert!(m2[0].open_start && m2[0].open_end);
        assert_eq!(m2[0].duration_minutes, 60);
    }

    #[test]
    fn test_total_by_day_splits_midnight() {
        let start = day(1).and_hms_opt(23, 0, 0).unwrap();
        let end = day(2).and_hms_opt(2, 0, 0).unwrap();
        let report = DowntimeReport {
            intervals: vec![DowntimeInterval::new("M1", start, end, false, false)],
        };

        let by_day = report.total_by_day();
        assert_eq!(by_day[&("M1".to_string(), day(1))], TimeDelta::hours(1));
        assert_eq!(by_day[&("M1".to_string(), day(2))], TimeDelta::hours(2));
        assert_eq!(report.total_by_line()["M1"], TimeDelta::hours(3));
        assert!(report.whole_days().is_empty());
    }

    #[test]
    fn test_whole_day_detected() {
        let start = day(1).and_hms_opt(23, 50, 0).unwrap();
        let end = day(3).and_hms_opt(0, 10, 0).unwrap();
        let report = DowntimeReport {
            intervals: vec![DowntimeInterval::new("M1", start, end, false, false)],
        };

        let whole = report.whole_days();
        assert!(whole.contains(&("M1".to_string(), day(2))));
        assert_eq!(whole.len(), 1);
        assert!(report.summary().per_day.iter().any(|d| d.whole_day && d.date == day(2)));
    }

    #[test]
    fn test_placeholders_fill_missing_slots() {
        let config = EngineConfig::default();
        let report = DowntimeReport {
            intervals: vec![
                DowntimeInterval::new("M1", at(20), at(60), false, false),
                DowntimeInterval::new("M2", at(0), at(20), true, false),
            ],
        };

        let slots: Vec<_> = placeholders(&report, &config)
            .into_iter()
            .map(|p| (p.line_id, p.timestamp))
            .collect();

        assert_eq!(
            slots,
            vec![
                ("M1".to_string(), at(30)),
                ("M1".to_string(), at(40)),
                ("M1".to_string(), at(50)),
                ("M2".to_string(), at(0)),
                ("M2".to_string(), at(10)),
            ]
        );
        assert!(report.contains("M1", at(30)));
        assert!(!report.contains("M1", at(20)));
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn at(minutes: i64) -> NaiveDateTime {
        day(4).and_hms_opt(0, 0, 0).unwrap() + TimeDelta::minutes(minutes)
    }
}
