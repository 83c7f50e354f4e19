use crate::analyzers::aggregate::aggregate;
use crate::analyzers::types::{GroupBy, StatusReport};
use crate::analyzers::writetos3::write_json_to_s3;
use crate::classify::classify;
use crate::config::EngineConfig;
use crate::downtime::detect_downtime;
use crate::mapping::{MappingTable, UnmappedSummary};
use crate::model::{AnalysisWindow, StatusSample};
use crate::output::write_json;
use crate::store::SampleLog;
use anyhow::{Result, bail};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use std::path::Path;
use tracing::{info, warn};

pub const REPORT_SCHEMA_VERSION: u8 = 1;

/// S3 key of the latest report.
pub const LATEST_REPORT_KEY: &str = "aggregates/status_report.json";

/// What a report run covers and how it is broken down.
#[derive(Debug, Clone, Default)]
pub struct ReportOptions {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub group_by: Vec<GroupBy>,
    pub exclude_downtime: bool,
    /// Lines expected in every sampling round. A listed line with no samples
    /// is down for the whole window.
    pub lines: Vec<String>,
}

/// Picks the analysis window.
///
/// Explicit `from`/`to` dates win; a missing `from` goes back
/// `lookback_days` from `to`, and a missing `to` is the day of the latest
/// sample (or of `now` for an empty log). The end never lies past `now`.
pub fn resolve_window(
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    latest: Option<NaiveDateTime>,
    now: NaiveDateTime,
    lookback_days: u32,
) -> Result<AnalysisWindow> {
    let last = to.unwrap_or_else(|| latest.unwrap_or(now).date());
    let window = match from {
        Some(first) if first > last => bail!("window starts ({first}) after it ends ({last})"),
        Some(first) => AnalysisWindow::from_dates(first, last),
        None => AnalysisWindow::last_days(last, lookback_days),
    };
    Ok(window.clamp_end(now))
}

/// Classifies, detects downtime and aggregates one window of samples.
///
/// `samples` may include neighbours just outside the window; only in-window
/// samples are classified and counted.
#[tracing::instrument(skip_all, fields(mapping = mapping.version(), samples = samples.len()))]
pub fn build_report(
    samples: &[StatusSample],
    mapping: &MappingTable,
    window: &AnalysisWindow,
    options: &ReportOptions,
    config: &EngineConfig,
) -> StatusReport {
    let in_window: Vec<StatusSample> = samples
        .iter()
        .filter(|s| window.contains(s.timestamp))
        .cloned()
        .collect();

    let classified = classify(&in_window, mapping);
    let unmapped = UnmappedSummary::from_classified(&classified);
    let warning = unmapped.warning();
    if let Some(text) = &warning {
        warn!(distinct = unmapped.distinct_count(), "{text}");
    }

    let downtime = detect_downtime(samples, &options.lines, window, config);
    let metric = aggregate(
        &classified,
        &downtime,
        window,
        &options.group_by,
        options.exclude_downtime,
        config,
    );

    info!(
        included = metric.included_samples,
        excluded = metric.excluded_samples,
        downtime_intervals = downtime.intervals.len(),
        disruption_pct = metric.disruption_pct,
        "Report built"
    );

    StatusReport {
        schema_version: REPORT_SCHEMA_VERSION,
        generated_at: Utc::now(),
        mapping_version: mapping.version().to_string(),
        warning,
        unmapped,
        downtime: downtime.summary(),
        metric,
    }
}

/// Reads the window from the sample log and builds the report.
pub fn run_report(
    log: &SampleLog,
    mapping: &MappingTable,
    options: &ReportOptions,
    config: &EngineConfig,
    now: NaiveDateTime,
) -> Result<StatusReport> {
    let latest = match options.to {
        Some(_) => None,
        None => log.latest_timestamp()?,
    };
    let window = resolve_window(options.from, options.to, latest, now, config.lookback_days)?;
    info!(start = %window.start, end = %window.end, "Analysis window");

    let samples = log.read_range(&window)?;
    Ok(build_report(&samples, mapping, &window, options, config))
}

/// Writes the report locally and, when a bucket is given, uploads it both
/// as the latest report and under a dated key.
pub async fn publish_report(
    report: &StatusReport,
    output: &Path,
    s3: Option<(&aws_sdk_s3::Client, &str)>,
) -> Result<()> {
    write_json(output, report)?;

    if let Some((client, bucket)) = s3 {
        let dated = format!(
            "aggregates/reports/{}.json",
            report.generated_at.format("%Y-%m-%d")
        );
        write_json_to_s3(client, bucket, &dated, report).await?;
        write_json_to_s3(client, bucket, LATEST_REPORT_KEY, report).await?;
        info!(bucket, key = %dated, "Report uploaded");
    } else {
        info!("S3 bucket not specified, skipping upload");
    }

    Ok(())
}
