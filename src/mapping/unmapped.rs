use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::analyzers::utility::pct;
use crate::classify::classify_sample;
use crate::mapping::{MappingTable, normalize_key};
use crate::model::{ClassifiedSample, StatusSample};

/// How much of a batch the mapping table failed to cover.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnmappedSummary {
    /// Distinct unmapped texts (first spelling seen), ordered by key.
    pub distinct_texts: Vec<String>,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub affected_rows: usize,
    pub total_rows: usize,
    pub affected_pct: f64,
}

impl UnmappedSummary {
    /// Summarizes classified rows. Downtime placeholders are not observations
    /// and are left out of both counts.
    pub fn from_classified<'a, I>(rows: I) -> Self
    where
        I: IntoIterator<Item = &'a ClassifiedSample>,
    {
        let mut texts: BTreeMap<String, String> = BTreeMap::new();
        let mut first_date: Option<NaiveDate> = None;
        let mut last_date: Option<NaiveDate> = None;
        let mut affected_rows = 0;
        let mut total_rows = 0;

        for row in rows {
            if row.downtime {
                continue;
            }
            total_rows += 1;
            if !row.unmapped {
                continue;
            }

            affected_rows += 1;
            texts
                .entry(normalize_key(&row.raw_text))
                .or_insert_with(|| row.raw_text.trim().to_string());

            let date = row.date();
            first_date = Some(first_date.map_or(date, |d| d.min(date)));
            last_date = Some(last_date.map_or(date, |d| d.max(date)));
        }

        Self {
            distinct_texts: texts.into_values().collect(),
            first_date,
            last_date,
            affected_rows,
            total_rows,
            affected_pct: pct(affected_rows, total_rows),
        }
    }

    pub fn distinct_count(&self) -> usize {
        self.distinct_texts.len()
    }

    pub fn is_clean(&self) -> bool {
        self.distinct_texts.is_empty()
    }

    /// User-facing banner text, or `None` when every row was mapped.
    pub fn warning(&self) -> Option<String> {
        let last = self.last_date?;
        let n = self.distinct_count();
        let period = match self.first_date {
            Some(first) if first != last => format!(
                "in the period {} - {}",
                first.format("%d %B %Y"),
                last.format("%d %B %Y")
            ),
            _ => format!("on {}", last.format("%d %B %Y")),
        };

        Some(format!(
            "There are {n} status messages that have not yet been classified in terms of \
             their impact on service. This means that {period}, the numbers in the 'Unknown' \
             category may be overestimated and the numbers in the other categories may be \
             underestimated. {:.1}% of the records are affected.",
            self.affected_pct
        ))
    }
}

impl MappingTable {
    /// Unmapped-text summary for a batch of raw samples. Never fails: the
    /// engine degrades unmapped text to Unknown and carries on.
    pub fn unmapped_summary(&self, samples: &[StatusSample]) -> UnmappedSummary {
        let classified: Vec<ClassifiedSample> = samples
            .iter()
            .filter(|s| self.lookup(&s.raw_text).is_none())
            .map(|s| classify_sample(s, self))
            .collect();

        let mut summary = UnmappedSummary::from_classified(&classified);
        summary.total_rows = samples.len();
        summary.affected_pct = pct(summary.affected_rows, summary.total_rows);
        summary
    }
}
