//! Point query: how likely is a disruption at a station on a given weekday
//! and hour, judged from the recorded history.

use chrono::{NaiveDate, Weekday};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::analyzers::utility::pct;
use crate::mapping::StationDirectory;
use crate::model::ClassifiedSample;

/// Disruption share of one station within the queried bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationChance {
    pub station: String,
    pub pct: f64,
    pub disrupted: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Probability {
    pub station: String,
    pub weekday: Weekday,
    pub hour: u32,
    pub selected: StationChance,
    pub most_likely: Option<StationChance>,
    pub least_likely: Option<StationChance>,
    pub bucket_samples: usize,
    pub insufficient_data: bool,
    /// First and last day with samples in the bucket.
    pub period: Option<(NaiveDate, NaiveDate)>,
}

#[derive(Default)]
struct Tally {
    disrupted: usize,
    total: usize,
}

impl Tally {
    fn chance(&self, station: &str) -> StationChance {
        StationChance {
            station: station.to_string(),
            pct: pct(self.disrupted, self.total),
            disrupted: self.disrupted,
            total: self.total,
        }
    }
}

/// Per-station disruption share for the `(weekday, hour)` bucket.
///
/// A station's denominator is the bucket samples of the lines serving it;
/// its numerator is those of them that are disrupted and name it.
/// Stations the directory does not know are measured against the whole
/// bucket. Stations without any bucket samples are left out of the
/// ranking, and ties go to the alphabetically first station.
pub fn probability(
    station: &str,
    weekday: Weekday,
    hour: u32,
    samples: &[ClassifiedSample],
    directory: &StationDirectory,
) -> Probability {
    let bucket: Vec<&ClassifiedSample> = samples
        .iter()
        .filter(|s| !s.downtime && s.weekday() == weekday && s.hour() == hour)
        .collect();

    let mut per_line: BTreeMap<&str, usize> = BTreeMap::new();
    for sample in &bucket {
        *per_line.entry(sample.line_id.as_str()).or_default() += 1;
    }

    let mut universe: BTreeSet<String> = directory.stations().map(str::to_string).collect();
    for sample in &bucket {
        universe.extend(sample.affected_stations.iter().cloned());
    }
    universe.insert(station.to_string());

    let tallies: BTreeMap<String, Tally> = universe
        .into_iter()
        .map(|name| {
            let serving = directory.lines_serving(&name);
            let total = match serving {
                Some(lines) => lines
                    .iter()
                    .map(|l| per_line.get(l.as_str()).copied().unwrap_or(0))
                    .sum(),
                None => bucket.len(),
            };
            let disrupted = bucket
                .iter()
                .filter(|s| serving.is_none_or(|lines| lines.contains(&s.line_id)))
                .filter(|s| s.category.is_disruption() && s.affects(&name))
                .count();
            (name, Tally { disrupted, total })
        })
        .collect();

    let mut most: Option<StationChance> = None;
    let mut least: Option<StationChance> = None;
    for (name, tally) in tallies.iter().filter(|(_, t)| t.total > 0) {
        let chance = tally.chance(name);
        if most.as_ref().is_none_or(|m| chance.pct > m.pct) {
            most = Some(chance.clone());
        }
        if least.as_ref().is_none_or(|l| chance.pct < l.pct) {
            least = Some(chance);
        }
    }

    let selected = tallies
        .get(station)
        .map(|t| t.chance(station))
        .unwrap_or_else(|| Tally::default().chance(station));

    let period = bucket
        .iter()
        .map(|s| s.date())
        .min()
        .zip(bucket.iter().map(|s| s.date()).max());

    Probability {
        station: station.to_string(),
        weekday,
        hour,
        insufficient_data: selected.total == 0,
        selected,
        most_likely: most,
        least_likely: least,
        bucket_samples: bucket.len(),
        period,
    }
}
