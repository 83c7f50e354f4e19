//! One recording round: fetch the published status, split it per line and
//! append it to the sample log.

use anyhow::Result;
use chrono::{Local, NaiveDateTime, Timelike};
use std::time::Duration;
use tracing::{info, warn};

use crate::fetch::{HttpClient, load_source};
use crate::model::StatusSample;
use crate::parser::{parse_status_payload, to_samples, unknown_samples};
use crate::store::SampleLog;

#[derive(Debug, Clone)]
pub struct RecorderOptions {
    /// URL or local file of the status payload.
    pub source: String,
    /// Lines to record, in report order.
    pub lines: Vec<String>,
    /// Fetch attempts before the round falls back to Unknown.
    pub attempts: u32,
    pub retry_delay: Duration,
}

/// Current local time truncated to whole seconds, as recorded in the log.
pub fn now_local() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

/// Records one round stamped with `timestamp`.
///
/// A round always produces one sample per configured line: if every attempt
/// to fetch or parse the payload fails, every line is recorded as Unknown.
/// Only a failure to write the log is an error.
#[tracing::instrument(skip(client, log, options), fields(source = %options.source))]
pub async fn record_once<C: HttpClient>(
    client: &C,
    log: &SampleLog,
    options: &RecorderOptions,
    timestamp: NaiveDateTime,
) -> Result<Vec<StatusSample>> {
    let attempts = options.attempts.max(1);
    let mut samples = None;

    for attempt in 1..=attempts {
        let result = match load_source(client, &options.source).await {
            Ok(bytes) => parse_status_payload(&bytes),
            Err(e) => Err(e),
        };

        match result {
            Ok(tokens) => {
                samples = Some(to_samples(&tokens, &options.lines, timestamp));
                break;
            }
            Err(e) => {
                warn!(attempt, attempts, error = %e, "Status fetch failed");
                if attempt < attempts {
                    tokio::time::sleep(options.retry_delay).await;
                }
            }
        }
    }

    let samples = samples.unwrap_or_else(|| {
        warn!("No status obtained, recording Unknown for all lines");
        unknown_samples(&options.lines, timestamp)
    });

    let written = log.append(&samples)?;
    info!(lines = samples.len(), written, "Recording round complete");
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::StatusClient;
    use crate::parser::UNKNOWN_STATUS;
    use chrono::NaiveDate;
    use std::env;
    use std::fs;

    #[tokio::test]
    async fn test_record_once_from_local_file() {
        let payload = env::temp_dir().join("metro_status_test_record_payload.json");
        fs::write(&payload, r#"["M1", "M2", "Normal service", "M3", "M4", "Signal fault"]"#).unwrap();
        let log = temp_log("metro_status_test_record_log.csv");

        let samples = record_once(&client(), &log, &options(payload.to_str().unwrap()), ts())
            .await
            .unwrap();

        assert_eq!(samples.len(), 4);
        assert_eq!(samples[3].raw_text, "Signal fault");
        assert_eq!(log.read_all().unwrap(), samples);

        fs::remove_file(&payload).unwrap();
        fs::remove_file(log.path()).unwrap();
    }

    #[tokio::test]
    async fn test_record_once_falls_back_to_unknown() {
        let log = temp_log("metro_status_test_record_unknown.csv");

        let samples = record_once(
            &client(),
            &log,
            &options("/nonexistent/metro_status_payload.json"),
            ts(),
        )
        .await
        .unwrap();

        assert_eq!(samples.len(), 4);
        assert!(samples.iter().all(|s| s.raw_text == UNKNOWN_STATUS));
        assert_eq!(log.read_all().unwrap().len(), 4);

        fs::remove_file(log.path()).unwrap();
    }

    #[test]
    fn test_now_local_has_whole_seconds() {
        assert_eq!(now_local().nanosecond(), 0);
    }

    fn client() -> StatusClient {
        StatusClient::new(Duration::from_secs(1)).unwrap()
    }

    fn options(source: &str) -> RecorderOptions {
        RecorderOptions {
            source: source.to_string(),
            lines: ["M1", "M2", "M3", "M4"].iter().map(|s| s.to_string()).collect(),
            attempts: 2,
            retry_delay: Duration::from_millis(1),
        }
    }

    fn temp_log(name: &str) -> SampleLog {
        let path = env::temp_dir().join(name);
        let _ = fs::remove_file(&path);
        SampleLog::new(path)
    }

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 4)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }
}
