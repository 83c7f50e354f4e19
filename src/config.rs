//! Engine parameters.
//!
//! The engine itself only ever sees an [`EngineConfig`] value. Reading
//! overrides from the environment (with optional `.env` support provided by
//! the caller) lives here so the CLI does not scatter `env::var` calls.

use anyhow::{Result, anyhow, bail};
use chrono::{NaiveTime, TimeDelta};
use std::env;
use std::fmt;
use std::str::FromStr;

use crate::model::RushHour;

/// Parse an optional environment variable with a default value.
macro_rules! parse_env {
    ($var_name:expr, $ty:ty, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.trim().parse::<$ty>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).expect("static clock time is valid")
}

/// Half-open `[start, end)` range of clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeRange {
    pub fn contains(&self, t: NaiveTime) -> bool {
        t >= self.start && t < self.end
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start.format("%H:%M"), self.end.format("%H:%M"))
    }
}

impl FromStr for TimeRange {
    type Err = anyhow::Error;

    /// Parses `HH:MM-HH:MM`.
    fn from_str(s: &str) -> Result<Self> {
        let (start, end) = s
            .split_once('-')
            .ok_or_else(|| anyhow!("expected HH:MM-HH:MM, got '{s}'"))?;
        let start = NaiveTime::parse_from_str(start.trim(), "%H:%M")?;
        let end = NaiveTime::parse_from_str(end.trim(), "%H:%M")?;
        if end <= start {
            bail!("range '{s}' ends before it starts");
        }
        Ok(Self { start, end })
    }
}

/// The two official rush-hour windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RushHourWindows {
    pub morning: TimeRange,
    pub afternoon: TimeRange,
}

impl Default for RushHourWindows {
    fn default() -> Self {
        Self {
            morning: TimeRange {
                start: hm(7, 0),
                end: hm(9, 0),
            },
            afternoon: TimeRange {
                start: hm(15, 0),
                end: hm(18, 0),
            },
        }
    }
}

impl RushHourWindows {
    pub fn classify(&self, t: NaiveTime) -> RushHour {
        if self.morning.contains(t) {
            RushHour::Morning
        } else if self.afternoon.contains(t) {
            RushHour::Afternoon
        } else {
            RushHour::Regular
        }
    }
}

/// Parameters consumed by the downtime detector, the aggregation engine and
/// the report pipeline.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Nominal spacing between two samples of the same line.
    pub sample_interval: TimeDelta,

    /// Multiplier on `sample_interval` a gap must exceed to count as downtime.
    pub downtime_tolerance: f64,

    pub rush_hours: RushHourWindows,

    /// Days covered by a query when no explicit window is given.
    pub lookback_days: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_interval: TimeDelta::minutes(10),
            downtime_tolerance: 1.5,
            rush_hours: RushHourWindows::default(),
            lookback_days: 30,
        }
    }
}

impl EngineConfig {
    /// Largest gap between consecutive samples that is still treated as jitter.
    pub fn downtime_threshold(&self) -> TimeDelta {
        let millis = self.sample_interval.num_milliseconds() as f64 * self.downtime_tolerance;
        TimeDelta::milliseconds(millis.round() as i64)
    }

    pub fn log_config(&self) {
        tracing::info!("Engine configuration:");
        tracing::info!("  sample interval    : {} min", self.sample_interval.num_minutes());
        tracing::info!("  downtime tolerance : {}x", self.downtime_tolerance);
        tracing::info!("  morning rush       : {}", self.rush_hours.morning);
        tracing::info!("  afternoon rush     : {}", self.rush_hours.afternoon);
        tracing::info!("  lookback           : {} days", self.lookback_days);
    }
}

/// Load the engine configuration from environment variables with defaults.
///
/// Optional:
/// - `METRO_SAMPLE_INTERVAL_MINUTES` (default: 10)
/// - `METRO_DOWNTIME_TOLERANCE` (default: 1.5)
/// - `METRO_MORNING_RUSH` / `METRO_AFTERNOON_RUSH` as `HH:MM-HH:MM`
///   (default: 07:00-09:00 / 15:00-18:00)
/// - `METRO_LOOKBACK_DAYS` (default: 30)
///
/// Returns an error if any variable is set but invalid.
fn sample_interval(minutes: i64) -> Result<TimeDelta> {
    if minutes <= 0 {
        bail!("METRO_SAMPLE_INTERVAL_MINUTES must be positive");
    }
    TimeDelta::try_minutes(minutes)
        .ok_or_else(|| anyhow!("METRO_SAMPLE_INTERVAL_MINUTES is out of range: {minutes}"))
}

pub fn load_from_env() -> Result<EngineConfig> {
    let defaults = EngineConfig::default();

    let interval_minutes = parse_env!("METRO_SAMPLE_INTERVAL_MINUTES", i64, 10);
    let downtime_tolerance = parse_env!(
        "METRO_DOWNTIME_TOLERANCE",
        f64,
        defaults.downtime_tolerance
    );
    let morning = parse_env!("METRO_MORNING_RUSH", TimeRange, defaults.rush_hours.morning);
    let afternoon = parse_env!(
        "METRO_AFTERNOON_RUSH",
        TimeRange,
        defaults.rush_hours.afternoon
    );
    let lookback_days = parse_env!("METRO_LOOKBACK_DAYS", u32, defaults.lookback_days);

    let sample_interval = sample_interval(interval_minutes)?;
    if !(downtime_tolerance >= 1.0) {
        bail!("METRO_DOWNTIME_TOLERANCE must be at least 1.0");
    }
    if lookback_days == 0 {
        bail!("METRO_LOOKBACK_DAYS must be positive");
    }

    Ok(EngineConfig {
        sample_interval,
        downtime_tolerance,
        rush_hours: RushHourWindows { morning, afternoon },
        lookback_days,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_threshold_is_fifteen_minutes() {
        let config = EngineConfig::default();
        assert_eq!(config.downtime_threshold(), TimeDelta::minutes(15));
    }

    #[test]
    fn test_sample_interval_bounds() {
        assert_eq!(sample_interval(10).unwrap(), TimeDelta::minutes(10));
        assert!(sample_interval(0).is_err());
        assert!(sample_interval(-5).is_err());
        assert!(sample_interval(i64::MAX).is_err());
    }

    #[test]
    fn test_time_range_parse() {
        let range: TimeRange = "07:30-09:00".parse().unwrap();
        assert_eq!(range.start, hm(7, 30));
        assert_eq!(range.end, hm(9, 0));
        assert_eq!(range.to_string(), "07:30-09:00");
        assert!("09:00-07:00".parse::<TimeRange>().is_err());
        assert!("0700".parse::<TimeRange>().is_err());
    }

    #[test]
    fn test_rush_hour_boundaries() {
        let windows = RushHourWindows::default();
        assert_eq!(windows.classify(hm(7, 0)), RushHour::Morning);
        assert_eq!(windows.classify(hm(8, 59)), RushHour::Morning);
        assert_eq!(windows.classify(hm(9, 0)), RushHour::Regular);
        assert_eq!(windows.classify(hm(17, 50)), RushHour::Afternoon);
        assert_eq!(windows.classify(hm(18, 0)), RushHour::Regular);
    }
}
