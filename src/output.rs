//! Output formatting and persistence for records and reports.
//!
//! Supports CSV append and overwrite, JSON files and JSON to the log.

use anyhow::{Context, Result};
use csv::WriterBuilder;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::path::Path;
use tracing::{debug, info};

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    Ok(())
}

/// Logs a value as pretty-printed JSON.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Appends records as rows to a CSV file.
///
/// Creates the file (and its directory) with headers if it does not already
/// exist or is empty.
pub fn append_records<T: Serialize>(path: impl AsRef<Path>, records: &[T]) -> Result<()> {
    let path = path.as_ref();
    let has_content = fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);
    debug!(path = %path.display(), has_content, rows = records.len(), "Appending CSV records");

    ensure_parent(path)?;
    let file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    let mut writer = WriterBuilder::new()
        .has_headers(!has_content)
        .from_writer(file);

    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;

    Ok(())
}

/// Writes records to a CSV file, replacing any previous content.
pub fn write_csv<T: Serialize>(path: impl AsRef<Path>, records: &[T]) -> Result<()> {
    let path = path.as_ref();
    ensure_parent(path)?;
    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = WriterBuilder::new().from_writer(file);

    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;

    info!(path = %path.display(), rows = records.len(), "CSV written");
    Ok(())
}

/// Writes a value as pretty-printed JSON, replacing any previous content.
pub fn write_json<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let path = path.as_ref();
    ensure_parent(path)?;
    let body = serde_json::to_vec_pretty(value)?;
    fs::write(path, body).with_context(|| format!("failed to write {}", path.display()))?;

    info!(path = %path.display(), "JSON written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StatusSample;
    use chrono::NaiveDate;
    use std::env;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        env::temp_dir().join(name)
    }

    #[test]
    fn test_print_json_does_not_panic() {
        print_json(&sample(0)).unwrap();
    }

    #[test]
    fn test_append_records_creates_file() {
        let path = temp_path("metro_status_test_create.csv");
        let _ = fs::remove_file(&path); // clean up any prior run

        append_records(&path, &[sample(0)]).unwrap();

        assert!(path.exists());
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("line_id,timestamp,raw_text"));

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_append_records_writes_header_once() {
        let path = temp_path("metro_status_test_header.csv");
        let _ = fs::remove_file(&path);

        append_records(&path, &[sample(0)]).unwrap();
        append_records(&path, &[sample(10), sample(20)]).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let header_count = content.lines().filter(|l| l.contains("timestamp")).count();
        assert_eq!(header_count, 1);
        // 1 header + 3 data rows
        assert_eq!(content.lines().count(), 4);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_write_csv_replaces_content() {
        let path = temp_path("metro_status_test_overwrite.csv");
        let _ = fs::remove_file(&path);

        write_csv(&path, &[sample(0), sample(10)]).unwrap();
        write_csv(&path, &[sample(20)]).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.contains("2024-03-04 08:20:00"));

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_write_json_creates_parent_dir() {
        let dir = temp_path("metro_status_test_json_dir");
        let _ = fs::remove_dir_all(&dir);
        let path = dir.join("report.json");

        write_json(&path, &sample(0)).unwrap();

        let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["line_id"], "M1");
        assert_eq!(value["timestamp"], "2024-03-04 08:00:00");

        fs::remove_dir_all(&dir).unwrap();
    }

    fn sample(minute: u32) -> StatusSample {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 4)
            .unwrap()
            .and_hms_opt(8, minute, 0)
            .unwrap();
        StatusSample::new("M1", ts, "Normal service")
    }
}
