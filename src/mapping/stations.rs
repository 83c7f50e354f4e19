use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::MappingError;

/// Suffix of a mapping token that stands for every station on a line,
/// e.g. `M1_All`.
const LINE_WIDE_SUFFIX: &str = "_All";

#[derive(Debug, Deserialize)]
struct StationRow {
    station: String,
    line: String,
}

/// Which lines serve which station.
#[derive(Debug, Clone, Default)]
pub struct StationDirectory {
    lines_by_station: BTreeMap<String, BTreeSet<String>>,
}

impl StationDirectory {
    pub fn from_pairs<I, S, L>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, L)>,
        S: Into<String>,
        L: Into<String>,
    {
        let mut lines_by_station: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (station, line) in pairs {
            lines_by_station
                .entry(station.into())
                .or_default()
                .insert(line.into());
        }
        Self { lines_by_station }
    }

    /// Loads a `station,line` CSV. Interchange stations appear once per line.
    pub fn load_csv(path: impl AsRef<Path>) -> Result<Self, MappingError> {
        let file = File::open(path.as_ref())?;
        let mut rdr = csv::Reader::from_reader(file);
        let mut pairs = Vec::new();

        for result in rdr.deserialize() {
            let row: StationRow = result?;
            pairs.push((row.station.trim().to_string(), row.line.trim().to_string()));
        }

        let directory = Self::from_pairs(pairs);
        debug!(stations = directory.len(), "Station directory loaded");
        Ok(directory)
    }

    pub fn len(&self) -> usize {
        self.lines_by_station.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines_by_station.is_empty()
    }

    /// All known stations, alphabetically.
    pub fn stations(&self) -> impl Iterator<Item = &str> {
        self.lines_by_station.keys().map(String::as_str)
    }

    pub fn lines_serving(&self, station: &str) -> Option<&BTreeSet<String>> {
        self.lines_by_station.get(station)
    }

    pub fn stations_on_line(&self, line: &str) -> BTreeSet<String> {
        self.lines_by_station
            .iter()
            .filter(|(_, lines)| lines.contains(line))
            .map(|(station, _)| station.clone())
            .collect()
    }

    /// Resolves station tokens from a mapping entry. `<LINE>_All` becomes
    /// every station on that line; tokens for lines the directory does not
    /// know are kept verbatim.
    pub fn expand<I, S>(&self, tokens: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut stations = BTreeSet::new();
        for token in tokens {
            let token = token.as_ref().trim();
            if token.is_empty() {
                continue;
            }

            match token.strip_suffix(LINE_WIDE_SUFFIX) {
                Some(line) => {
                    let on_line = self.stations_on_line(line);
                    if on_line.is_empty() {
                        warn!(token, "Line-wide station token for unknown line");
                        stations.insert(token.to_string());
                    } else {
                        stations.extend(on_line);
                    }
                }
                None => {
                    stations.insert(token.to_string());
                }
            }
        }
        stations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> StationDirectory {
        StationDirectory::from_pairs(vec![
            ("Vanløse", "M1"),
            ("Vanløse", "M2"),
            ("Nørreport", "M1"),
            ("Nørreport", "M2"),
            ("Lufthavnen", "M2"),
            ("Vestamager", "M1"),
            ("Kongens Nytorv", "M3"),
        ])
    }

    #[test]
    fn test_expand_line_wide_token() {
        let stations = directory().expand(["M2_All", "Kongens Nytorv"]);
        let expected: BTreeSet<String> = ["Kongens Nytorv", "Lufthavnen", "Nørreport", "Vanløse"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(stations, expected);
    }

    #[test]
    fn test_expand_keeps_unknown_line_token() {
        let stations = directory().expand(["M9_All", " "]);
        assert_eq!(stations.len(), 1);
        assert!(stations.contains("M9_All"));
    }

    #[test]
    fn test_lines_serving() {
        let dir = directory();
        assert_eq!(dir.lines_serving("Vanløse").unwrap().len(), 2);
        assert!(dir.lines_serving("Nowhere").is_none());
        assert_eq!(dir.stations().next(), Some("Kongens Nytorv"));
    }

    #[test]
    fn test_load_csv() {
        let path = std::env::temp_dir().join("metro_status_test_stations.csv");
        std::fs::write(&path, "station,line\nVanløse,M1\nVanløse,M2\nLufthavnen,M2\n").unwrap();

        let dir = StationDirectory::load_csv(&path).unwrap();
        assert_eq!(dir.len(), 2);
        assert_eq!(dir.stations_on_line("M2").len(), 2);

        std::fs::remove_file(&path).unwrap();
    }
}
