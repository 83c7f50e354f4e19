//! CLI entry point for the metro status tool.
//!
//! Provides subcommands for recording the published line status, checking
//! the mapping table, exporting classified samples and downtime, building
//! the disruption report, querying the disruption calculator and backing
//! the sample log up to S3.

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate, Weekday};
use clap::{Args, Parser, Subcommand};
use metro_status::analyzers::analyzer::{ReportOptions, publish_report, resolve_window, run_report};
use metro_status::analyzers::calculator::probability;
use metro_status::analyzers::types::GroupBy;
use metro_status::{
    backup::backup_log,
    classify::classify,
    config::{self, EngineConfig},
    downtime::detect_downtime,
    fetch::StatusClient,
    mapping::{MappingTable, StationDirectory, UnmappedSummary, load_mapping_csv},
    model::{AnalysisWindow, StatusSample},
    output::{print_json, write_csv, write_json},
    recorder::{RecorderOptions, now_local, record_once},
    store::SampleLog,
};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "metro_status")]
#[command(about = "Record and analyze metro line operation status", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct LogArgs {
    /// Sample log CSV (line_id,timestamp,raw_text)
    #[arg(short, long, default_value = "data/operation_raw.csv")]
    log: PathBuf,
}

#[derive(Args)]
struct MappingArgs {
    /// Mapping CSV (raw_text,category,affected_stations,reason)
    #[arg(short, long, default_value = "data/mapping.csv")]
    mapping: PathBuf,

    /// Mapping version; defaults to the mapping file's modification time
    #[arg(long)]
    mapping_version: Option<String>,

    /// Station directory CSV (station,line)
    #[arg(long)]
    stations: Option<PathBuf>,
}

#[derive(Args)]
struct WindowArgs {
    /// First day of the analysis window (YYYY-MM-DD)
    #[arg(long)]
    from: Option<NaiveDate>,

    /// Last day of the analysis window (YYYY-MM-DD)
    #[arg(long)]
    to: Option<NaiveDate>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the current status of every line and append it to the sample log
    Record {
        /// URL or local file with the published status payload
        #[arg(value_name = "FILE_OR_URL")]
        source: String,

        #[command(flatten)]
        log: LogArgs,

        /// Lines to record
        #[arg(long, value_delimiter = ',', default_value = "M1,M2,M3,M4")]
        lines: Vec<String>,

        /// Fetch attempts per round before recording Unknown
        #[arg(long, default_value_t = 5)]
        attempts: u32,

        /// HTTP timeout in seconds
        #[arg(long, default_value_t = 30)]
        timeout: u64,

        /// Number of rounds, one per sampling interval (0 = infinite)
        #[arg(short = 'n', long, default_value_t = 1)]
        rounds: usize,
    },
    /// Report raw status texts the mapping table does not cover
    CheckMapping {
        #[command(flatten)]
        log: LogArgs,

        #[command(flatten)]
        mapping: MappingArgs,

        #[command(flatten)]
        window: WindowArgs,
    },
    /// Export the classified samples of a window as CSV
    Classify {
        #[command(flatten)]
        log: LogArgs,

        #[command(flatten)]
        mapping: MappingArgs,

        #[command(flatten)]
        window: WindowArgs,

        /// CSV file to write
        #[arg(short, long, default_value = "data/operation_classified.csv")]
        output: PathBuf,
    },
    /// Detect sampling gaps and write them as JSON
    Downtime {
        #[command(flatten)]
        log: LogArgs,

        #[command(flatten)]
        window: WindowArgs,

        /// Lines expected in every sampling round
        #[arg(long, value_delimiter = ',', default_value = "M1,M2,M3,M4")]
        lines: Vec<String>,

        /// JSON file to write
        #[arg(short, long, default_value = "data/system_downtime.json")]
        output: PathBuf,
    },
    /// Build the disruption report and optionally upload it to S3
    Aggregate {
        #[command(flatten)]
        log: LogArgs,

        #[command(flatten)]
        mapping: MappingArgs,

        #[command(flatten)]
        window: WindowArgs,

        /// Breakdown dimensions (day, weekday, hour, rush_hour, day_type, station, line)
        #[arg(short, long, value_delimiter = ',', default_value = "day,weekday,hour,rush_hour,station")]
        group_by: Vec<GroupBy>,

        /// Drop days touched by system downtime from every percentage
        #[arg(long, default_value_t = false)]
        exclude_downtime: bool,

        /// Lines expected in every sampling round
        #[arg(long, value_delimiter = ',', default_value = "M1,M2,M3,M4")]
        lines: Vec<String>,

        /// JSON file to write the report to
        #[arg(short, long, default_value = "data/status_report.json")]
        output: PathBuf,

        /// Optional: S3 bucket name to upload the report to (e.g., "my-bucket")
        #[arg(long)]
        s3_bucket: Option<String>,
    },
    /// Chance of a disruption at a station on a weekday and hour
    Calculate {
        #[command(flatten)]
        log: LogArgs,

        #[command(flatten)]
        mapping: MappingArgs,

        /// Station name
        #[arg(long)]
        station: String,

        /// Day of travel (e.g. "Monday" or "mon")
        #[arg(long)]
        weekday: Weekday,

        /// Hour of travel, 0-23
        #[arg(long, value_parser = clap::value_parser!(u32).range(0..24))]
        hour: u32,

        /// Recent days to base the calculation on (default: configured lookback)
        #[arg(long)]
        days: Option<u32>,
    },
    /// Upload a dated copy of the sample log to S3
    Backup {
        #[command(flatten)]
        log: LogArgs,

        /// S3 bucket name (e.g., "my-bucket")
        #[arg(long)]
        s3_bucket: String,

        /// Gzip compress the log before uploading
        #[arg(long, default_value_t = false)]
        gzip: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/metro_status.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("metro_status.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let config = config::load_from_env()?;
    config.log_config();

    match cli.command {
        Commands::Record {
            source,
            log,
            lines,
            attempts,
            timeout,
            rounds,
        } => {
            let client = StatusClient::new(Duration::from_secs(timeout))?;
            let options = RecorderOptions {
                source,
                lines,
                attempts,
                retry_delay: Duration::from_secs(5),
            };
            record(&client, &SampleLog::new(log.log), &options, rounds, &config).await?;
        }
        Commands::CheckMapping {
            log,
            mapping,
            window,
        } => {
            let (table, _) = load_mapping(&mapping)?;
            let samples = load_window(&log, &window, &config)?;

            let summary = table.unmapped_summary(&samples);
            match summary.warning() {
                Some(text) => warn!("{text}"),
                None => info!(rows = summary.total_rows, "Every status text is mapped"),
            }
            for text in &summary.distinct_texts {
                info!(raw_text = %text, "Unmapped status text");
            }
        }
        Commands::Classify {
            log,
            mapping,
            window,
            output,
        } => {
            let (table, _) = load_mapping(&mapping)?;
            let samples = load_window(&log, &window, &config)?;

            let classified = classify(&samples, &table);
            let summary = UnmappedSummary::from_classified(&classified);
            if let Some(text) = summary.warning() {
                warn!("{text}");
            }
            write_csv(&output, &classified)?;
        }
        Commands::Downtime {
            log,
            window,
            lines,
            output,
        } => {
            let store = SampleLog::new(&log.log);
            let window = pick_window(&store, &window, &config, None)?;
            let samples = store.read_range(&window)?;

            let report = detect_downtime(&samples, &lines, &window, &config);
            let summary = report.summary();
            for line in &summary.per_line {
                info!(line = %line.line_id, minutes = line.minutes, "Downtime");
            }
            write_json(&output, &summary)?;
        }
        Commands::Aggregate {
            log,
            mapping,
            window,
            group_by,
            exclude_downtime,
            lines,
            output,
            s3_bucket,
        } => {
            let (table, _) = load_mapping(&mapping)?;
            let options = ReportOptions {
                from: window.from,
                to: window.to,
                group_by,
                exclude_downtime,
                lines,
            };
            let report = run_report(&SampleLog::new(log.log), &table, &options, &config, now_local())?;

            match s3_bucket.filter(|b| !b.is_empty()) {
                Some(bucket) => {
                    let aws = aws_config::load_from_env().await;
                    let s3 = aws_sdk_s3::Client::new(&aws);
                    publish_report(&report, &output, Some((&s3, bucket.as_str()))).await?;
                }
                None => publish_report(&report, &output, None).await?,
            }
        }
        Commands::Calculate {
            log,
            mapping,
            station,
            weekday,
            hour,
            days,
        } => {
            let (table, directory) = load_mapping(&mapping)?;
            let store = SampleLog::new(&log.log);
            let window = pick_window(&store, &WindowArgs { from: None, to: None }, &config, days)?;
            let samples: Vec<StatusSample> = store
                .read_range(&window)?
                .into_iter()
                .filter(|s| window.contains(s.timestamp))
                .collect();

            let result = probability(&station, weekday, hour, &classify(&samples, &table), &directory);
            if result.insufficient_data {
                warn!(station = %station, "Not enough data for this day and hour");
            }
            info!(
                station = %result.station,
                pct = result.selected.pct,
                most_likely = result.most_likely.as_ref().map(|c| c.station.as_str()),
                least_likely = result.least_likely.as_ref().map(|c| c.station.as_str()),
                "Chance of disruption"
            );
            print_json(&result)?;
        }
        Commands::Backup {
            log,
            s3_bucket,
            gzip,
        } => {
            let aws = aws_config::load_from_env().await;
            let s3 = aws_sdk_s3::Client::new(&aws);
            let today = Local::now().date_naive();
            backup_log(&s3, &s3_bucket, &log.log, today, gzip).await?;
        }
    }

    Ok(())
}

/// Runs recording rounds, one per configured sampling interval.
#[tracing::instrument(skip(client, log, options, config))]
async fn record(
    client: &StatusClient,
    log: &SampleLog,
    options: &RecorderOptions,
    rounds: usize,
    config: &EngineConfig,
) -> Result<()> {
    let pause = config
        .sample_interval
        .to_std()
        .context("sample interval must be positive")?;

    if rounds == 0 {
        info!(interval_secs = pause.as_secs(), "Recording indefinitely. Press Ctrl+C to stop.");
    }

    let mut round = 0;
    loop {
        if rounds > 0 && round >= rounds {
            break;
        }
        round += 1;

        record_once(client, log, options, now_local()).await?;

        if rounds == 0 || round < rounds {
            tokio::time::sleep(pause).await;
        }
    }

    info!(rounds = round, path = %log.path().display(), "Finished recording");
    Ok(())
}

fn load_mapping(args: &MappingArgs) -> Result<(MappingTable, StationDirectory)> {
    let directory = match &args.stations {
        Some(path) => StationDirectory::load_csv(path)
            .with_context(|| format!("failed to load stations from {}", path.display()))?,
        None => StationDirectory::default(),
    };
    let table = load_mapping_csv(&args.mapping, args.mapping_version.as_deref(), &directory)
        .with_context(|| format!("failed to load mapping from {}", args.mapping.display()))?;
    Ok((table, directory))
}

fn pick_window(
    store: &SampleLog,
    window: &WindowArgs,
    config: &EngineConfig,
    lookback_days: Option<u32>,
) -> Result<AnalysisWindow> {
    let latest = match window.to {
        Some(_) => None,
        None => store.latest_timestamp()?,
    };
    resolve_window(
        window.from,
        window.to,
        latest,
        now_local(),
        lookback_days.unwrap_or(config.lookback_days),
    )
}

/// In-window samples of the log.
fn load_window(log: &LogArgs, window: &WindowArgs, config: &EngineConfig) -> Result<Vec<StatusSample>> {
    let store = SampleLog::new(&log.log);
    let window = pick_window(&store, window, config, None)?;
    Ok(store
        .read_range(&window)?
        .into_iter()
        .filter(|s| window.contains(s.timestamp))
        .collect())
}
