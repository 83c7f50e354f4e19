use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fs::{self, File};
use std::io;
use std::path::Path;
use tracing::info;

use crate::error::MappingError;
use crate::mapping::{MappingEntry, MappingTable, StationDirectory};
use crate::model::Category;

/// One row of the maintained mapping CSV.
#[derive(Debug, Deserialize)]
struct MappingRow {
    raw_text: String,
    category: String,
    #[serde(default)]
    affected_stations: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

/// Reads `raw_text,category,affected_stations,reason` rows.
///
/// Stations may be separated by `,` or `;`. Line-wide tokens are expanded
/// through `directory`.
pub fn read_mapping_entries<R: io::Read>(
    reader: R,
    directory: &StationDirectory,
) -> Result<Vec<MappingEntry>, MappingError> {
    let mut rdr = csv::Reader::from_reader(reader);
    let mut entries = Vec::new();

    for (idx, result) in rdr.deserialize().enumerate() {
        let row: MappingRow = result?;
        let category: Category = row
            .category
            .parse()
            .map_err(|source| MappingError::Category {
                row: idx + 1,
                source,
            })?;

        let tokens = row
            .affected_stations
            .as_deref()
            .unwrap_or_default()
            .split([',', ';']);

        entries.push(MappingEntry {
            raw_text: row.raw_text,
            category,
            affected_stations: directory.expand(tokens),
            reason: row
                .reason
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty()),
        });
    }

    Ok(entries)
}

/// Loads and validates a mapping snapshot from a CSV file.
///
/// Without an explicit `version` the snapshot is versioned by the file's
/// modification time.
pub fn load_mapping_csv(
    path: impl AsRef<Path>,
    version: Option<&str>,
    directory: &StationDirectory,
) -> Result<MappingTable, MappingError> {
    let path = path.as_ref();
    let version = match version {
        Some(v) => v.to_string(),
        None => {
            let modified: DateTime<Utc> = fs::metadata(path)?.modified()?.into();
            modified.to_rfc3339()
        }
    };

    let entries = read_mapping_entries(File::open(path)?, directory)?;
    let table = MappingTable::new(version, entries)?;

    info!(
        path = %path.display(),
        version = table.version(),
        entries = table.len(),
        "Mapping table loaded"
    );
    Ok(table)
}
