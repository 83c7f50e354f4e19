use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::analyzers::types::DailyScore;
use crate::model::{Category, DisruptionScore};

/// Running worst-severity per `(line, day)`.
///
/// | Worst observation                  | Score |
/// |------------------------------------|-------|
/// | Complete disruption                | 2     |
/// | Partial disruption                 | 1     |
/// | Normal service or maintenance      | 0     |
/// | Only Unknown, nothing, or a day    | -1    |
/// | spent entirely in downtime         |       |
#[derive(Debug, Default)]
pub struct DailyScores {
    worst: BTreeMap<(String, NaiveDate), DisruptionScore>,
}

impl DailyScores {
    pub fn observe(&mut self, line_id: &str, date: NaiveDate, category: Category) {
        let worst = self
            .worst
            .entry((line_id.to_string(), date))
            .or_insert(DisruptionScore::NoData);
        *worst = (*worst).max(category.severity());
    }

    /// Emits one score per line and day plus a network score per day (the
    /// worst line score). A `(line, day)` in `whole_days` is `NoData`
    /// regardless of what was observed on its boundary.
    pub fn finish<I>(
        self,
        days: I,
        lines: &BTreeSet<String>,
        whole_days: &HashSet<(String, NaiveDate)>,
    ) -> Vec<DailyScore>
    where
        I: IntoIterator<Item = NaiveDate>,
    {
        let mut out = Vec::new();

        for date in days {
            let mut network = DisruptionScore::NoData;

            for line in lines {
                let key = (line.clone(), date);
                let score = if whole_days.contains(&key) {
                    DisruptionScore::NoData
                } else {
                    self.worst
                        .get(&key)
                        .copied()
                        .unwrap_or(DisruptionScore::NoData)
                };
                network = network.max(score);
                out.push(DailyScore {
                    date,
                    line_id: Some(line.clone()),
                    score,
                    interpretation: score.interpretation(),
                });
            }

            out.push(DailyScore {
                date,
                line_id: None,
                score: network,
                interpretation: network.interpretation(),
            });
        }

        out
    }
}
