use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

use crate::error::MappingError;
use crate::model::Category;

/// A curated translation of one raw status text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappingEntry {
    pub raw_text: String,
    pub category: Category,
    pub affected_stations: BTreeSet<String>,
    pub reason: Option<String>,
}

impl MappingEntry {
    pub fn new(raw_text: impl Into<String>, category: Category) -> Self {
        Self {
            raw_text: raw_text.into(),
            category,
            affected_stations: BTreeSet::new(),
            reason: None,
        }
    }

    pub fn with_stations<I, S>(mut self, stations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.affected_stations
            .extend(stations.into_iter().map(Into::into));
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    fn same_meaning(&self, other: &MappingEntry) -> bool {
        self.category == other.category
            && self.affected_stations == other.affected_stations
            && self.reason == other.reason
    }

    fn describe(&self) -> String {
        let stations = self
            .affected_stations
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        match &self.reason {
            Some(reason) => format!("{} [{}] ({})", self.category, stations, reason),
            None => format!("{} [{}]", self.category, stations),
        }
    }
}

/// Lookup key for a raw status text: surrounding whitespace trimmed,
/// case folded.
pub fn normalize_key(raw_text: &str) -> String {
    raw_text.trim().to_lowercase()
}

/// Versioned snapshot of the mapping entries.
///
/// Every classification run receives one of these explicitly, so re-running
/// against the same snapshot always reproduces the same result.
#[derive(Debug, Clone)]
pub struct MappingTable {
    version: String,
    entries: HashMap<String, MappingEntry>,
}

impl MappingTable {
    /// Builds a snapshot, rejecting empty keys and keys that appear twice
    /// with different meanings. Exact duplicates are collapsed.
    pub fn new(
        version: impl Into<String>,
        entries: impl IntoIterator<Item = MappingEntry>,
    ) -> Result<Self, MappingError> {
        let version = version.into();
        let mut map: HashMap<String, MappingEntry> = HashMap::new();

        for (idx, entry) in entries.into_iter().enumerate() {
            let key = normalize_key(&entry.raw_text);
            if key.is_empty() {
                return Err(MappingError::EmptyKey { row: idx + 1 });
            }

            match map.get(&key) {
                Some(existing) if existing.same_meaning(&entry) => {
                    warn!(raw_text = %entry.raw_text, "Duplicate mapping entry collapsed");
                }
                Some(existing) => {
                    return Err(MappingError::Conflict {
                        key,
                        first: existing.describe(),
                        second: entry.describe(),
                    });
                }
                None => {
                    map.insert(key, entry);
                }
            }
        }

        debug!(version = %version, entries = map.len(), "Mapping table built");
        Ok(Self {
            version,
            entries: map,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Exact lookup on the normalized key. `None` means the text is unmapped.
    pub fn lookup(&self, raw_text: &str) -> Option<&MappingEntry> {
        self.entries.get(&normalize_key(raw_text))
    }

    /// A new snapshot with `entry` added, or replacing the entry with the same
    /// key. The receiver is left untouched.
    pub fn with_entry(&self, version: impl Into<String>, entry: MappingEntry) -> Self {
        let mut entries = self.entries.clone();
        entries.insert(normalize_key(&entry.raw_text), entry);
        Self {
            version: version.into(),
            entries,
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &MappingEntry> {
        self.entries.values()
    }
}
