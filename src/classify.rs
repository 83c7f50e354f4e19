//! Applies a mapping snapshot to raw samples.
//!
//! Classification is never cached: every call recomputes from the raw text,
//! so a corrected mapping entry reclassifies the entire history the next
//! time it is run.

use std::collections::BTreeSet;

use crate::mapping::MappingTable;
use crate::model::{Category, ClassifiedSample, StatusSample};

/// Classifies one sample. Raw text without a mapping entry becomes
/// [`Category::Unknown`] with the `unmapped` flag set.
pub fn classify_sample(sample: &StatusSample, mapping: &MappingTable) -> ClassifiedSample {
    let (category, affected_stations, reason, unmapped) = match mapping.lookup(&sample.raw_text) {
        Some(entry) => (
            entry.category,
            entry.affected_stations.clone(),
            entry.reason.clone(),
            false,
        ),
        None => (Category::Unknown, BTreeSet::new(), None, true),
    };

    ClassifiedSample {
        line_id: sample.line_id.clone(),
        timestamp: sample.timestamp,
        raw_text: sample.raw_text.clone(),
        category,
        affected_stations,
        reason,
        unmapped,
        downtime: false,
    }
}

/// One output row per input sample, in input order.
pub fn classify(samples: &[StatusSample], mapping: &MappingTable) -> Vec<ClassifiedSample> {
    samples
        .iter()
        .map(|sample| classify_sample(sample, mapping))
        .collect()
}

/// Lazy form of [`classify`] for streaming over a large log.
pub fn classify_iter<'a, I>(
    samples: I,
    mapping: &'a MappingTable,
) -> impl Iterator<Item = ClassifiedSample> + 'a
where
    I: IntoIterator<Item = StatusSample>,
    I::IntoIter: 'a,
{
    samples
        .into_iter()
        .map(move |sample| classify_sample(&sample, mapping))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::MappingEntry;
    use chrono::{NaiveDate, NaiveDateTime};

    #[test]
    fn test_mapped_text_takes_entry_values() {
        let mapping = mapping();
        let rows = classify(&[sample(0, "Signal fault at Nørreport")], &mapping);

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].category, Category::PartialDisruption);
        assert!(rows[0].affects("Nørreport"));
        assert_eq!(rows[0].reason.as_deref(), Some("Signal fault"));
        assert!(!rows[0].unmapped);
        assert!(!rows[0].downtime);
    }

    #[test]
    fn test_unmapped_text_defaults_to_unknown() {
        let rows = classify(&[sample(0, "Something new")], &mapping());

        assert_eq!(rows[0].category, Category::Unknown);
        assert!(rows[0].unmapped);
        assert!(rows[0].affected_stations.is_empty());
        assert_eq!(rows[0].raw_text, "Something new");
    }

    #[test]
    fn test_every_input_yields_one_row_in_order() {
        let samples = vec![
            sample(0, "Normal service"),
            sample(10, "???"),
            sample(20, "Signal fault at Nørreport"),
        ];
        let rows = classify(&samples, &mapping());

        assert_eq!(rows.len(), samples.len());
        for (row, sample) in rows.iter().zip(&samples) {
            assert_eq!(row.timestamp, sample.timestamp);
            assert_eq!(row.raw_text, sample.raw_text);
        }
    }

    #[test]
    fn test_classify_is_idempotent() {
        let samples = vec![sample(0, "Normal service"), sample(10, "???")];
        let mapping = mapping();
        assert_eq!(classify(&samples, &mapping), classify(&samples, &mapping));
    }

    #[test]
    fn test_mapping_change_only_touches_matching_rows() {
        let samples = vec![
            sample(0, "Normal service"),
            sample(10, "Signal fault at Nørreport"),
            sample(20, "???"),
        ];
        let v1 = mapping();
        let v2 = v1.with_entry("v2", MappingEntry::new("???", Category::Maintenance));

        let before = classify(&samples, &v1);
        let after = classify(&samples, &v2);

        assert_eq!(before[0], after[0]);
        assert_eq!(before[1], after[1]);
        assert_ne!(before[2], after[2]);
        assert_eq!(after[2].category, Category::Maintenance);
        assert!(!after[2].unmapped);
    }

    #[test]
    fn test_classify_iter_matches_classify() {
        let samples = vec![sample(0, "Normal service"), sample(10, "???")];
        let mapping = mapping();
        let lazy: Vec<_> = classify_iter(samples.clone(), &mapping).collect();
        assert_eq!(lazy, classify(&samples, &mapping));
    }

    fn mapping() -> MappingTable {
        MappingTable::new(
            "v1",
            vec![
                MappingEntry::new("Normal service", Category::Normal),
                MappingEntry::new("Signal fault at Nørreport", Category::PartialDisruption)
                    .with_stations(["Nørreport"])
                    .with_reason("Signal fault"),
            ],
        )
        .unwrap()
    }

    fn sample(minute: u32, text: &str) -> StatusSample {
        StatusSample::new("M1", ts(minute), text)
    }

    fn ts(minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 4)
            .unwrap()
            .and_hms_opt(8, minute, 0)
            .unwrap()
    }
}
