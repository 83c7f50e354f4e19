//! Disruption events: maximal runs of consecutive disrupted samples on one
//! line. Any non-disrupted sample, or a sampling gap wider than the downtime
//! threshold, ends the run.

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use std::collections::{BTreeMap, BTreeSet};

use crate::analyzers::types::{DayEvents, DisruptionEvent, EventSummary};
use crate::analyzers::utility::{mean, stddev};
use crate::model::{Category, ClassifiedSample};

#[derive(Debug)]
struct OpenRun {
    start: NaiveDateTime,
    last: NaiveDateTime,
    samples: usize,
    worst: Category,
    raw_texts: BTreeSet<String>,
}

/// Builds events from observed samples fed in time order per line.
#[derive(Debug)]
pub struct EventTracker {
    interval: TimeDelta,
    threshold: TimeDelta,
    open: BTreeMap<String, OpenRun>,
    last_seen: BTreeMap<String, NaiveDateTime>,
    done: Vec<DisruptionEvent>,
}

impl EventTracker {
    pub fn new(interval: TimeDelta, threshold: TimeDelta) -> Self {
        Self {
            interval,
            threshold,
            open: BTreeMap::new(),
            last_seen: BTreeMap::new(),
            done: Vec::new(),
        }
    }

    pub fn observe(&mut self, sample: &ClassifiedSample) {
        let line = sample.line_id.as_str();

        let gap_too_wide = self
            .last_seen
            .get(line)
            .is_some_and(|prev| sample.timestamp - *prev > self.threshold);
        if gap_too_wide || !sample.category.is_disruption() {
            self.close(line);
        }
        self.last_seen.insert(line.to_string(), sample.timestamp);

        if !sample.category.is_disruption() {
            return;
        }

        let run = self.open.entry(line.to_string()).or_insert_with(|| OpenRun {
            start: sample.timestamp,
            last: sample.timestamp,
            samples: 0,
            worst: sample.category,
            raw_texts: BTreeSet::new(),
        });
        run.last = sample.timestamp;
        run.samples += 1;
        if sample.category == Category::CompleteDisruption {
            run.worst = Category::CompleteDisruption;
        }
        run.raw_texts.insert(sample.raw_text.trim().to_string());
    }

    fn close(&mut self, line: &str) {
        if let Some(run) = self.open.remove(line) {
            let duration = self.interval * run.samples as i32;
            self.done.push(DisruptionEvent {
                line_id: line.to_string(),
                start: run.start,
                end: run.last + self.interval,
                samples: run.samples,
                duration_minutes: duration.num_minutes(),
                worst: run.worst,
                raw_texts: run.raw_texts.into_iter().collect(),
            });
        }
    }

    /// Closes every open run and returns events ordered by start.
    pub fn finish(mut self) -> Vec<DisruptionEvent> {
        let lines: Vec<String> = self.open.keys().cloned().collect();
        for line in lines {
            self.close(&line);
        }
        self.done
            .sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.line_id.cmp(&b.line_id)));
        self.done
    }
}

/// Count, total, mean and spread of event durations, with a per-day split.
pub fn summarize(events: Vec<DisruptionEvent>) -> EventSummary {
    let durations: Vec<f64> = events.iter().map(|e| e.duration_minutes as f64).collect();
    let avg = mean(&durations);

    let mut per_day: BTreeMap<NaiveDate, Vec<f64>> = BTreeMap::new();
    for event in &events {
        per_day
            .entry(event.start.date())
            .or_default()
            .push(event.duration_minutes as f64);
    }

    EventSummary {
        count: events.len(),
        total_duration_minutes: events.iter().map(|e| e.duration_minutes).sum(),
        mean_duration_minutes: avg,
        stddev_duration_minutes: stddev(&durations, avg),
        per_day: per_day
            .into_iter()
            .map(|(date, d)| DayEvents {
                date,
                events: d.len(),
                mean_duration_minutes: mean(&d),
            })
            .collect(),
        events,
    }
}
