//! The append-only Sample Log (`line_id,timestamp,raw_text` CSV).

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::model::{AnalysisWindow, StatusSample};
use crate::output::append_records;

/// Bytes read from the end of the log to find the newest samples.
const TAIL_BYTES: u64 = 64 * 1024;

/// Newest sample time per line, as far as the tail of the log shows.
#[derive(Debug, Default)]
struct Recent {
    latest_by_line: HashMap<String, NaiveDateTime>,
    /// Oldest time covered by the tail; `None` when the whole log was read.
    floor: Option<NaiveDateTime>,
}

impl Recent {
    fn is_fresh(&self, sample: &StatusSample) -> bool {
        match self.latest_by_line.get(&sample.line_id) {
            Some(latest) => sample.timestamp > *latest,
            None => self.floor.is_none_or(|floor| sample.timestamp > floor),
        }
    }

    fn observe(&mut self, sample: &StatusSample) {
        let latest = self
            .latest_by_line
            .entry(sample.line_id.clone())
            .or_insert(sample.timestamp);
        *latest = (*latest).max(sample.timestamp);
    }
}

/// Handle to the sample log on disk. Holds no open file; every call reads or
/// appends afresh so a concurrently running recorder is picked up.
///
/// The log is append-only and written in time order, one round at a time.
#[derive(Debug, Clone)]
pub struct SampleLog {
    path: PathBuf,
}

impl SampleLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends samples that are newer than the line's latest logged sample,
    /// skipping repeats within `samples` too. Returns the number written.
    pub fn append(&self, samples: &[StatusSample]) -> Result<usize> {
        let mut recent = self.recent()?;

        let fresh: Vec<&StatusSample> = samples
            .iter()
            .filter(|s| {
                let keep = recent.is_fresh(s);
                if keep {
                    recent.observe(s);
                }
                keep
            })
            .collect();

        if fresh.len() < samples.len() {
            debug!(
                skipped = samples.len() - fresh.len(),
                "Duplicate samples skipped"
            );
        }
        if !fresh.is_empty() {
            append_records(&self.path, &fresh)?;
        }

        info!(path = %self.path.display(), written = fresh.len(), "Samples appended");
        Ok(fresh.len())
    }

    /// Every sample in the log, in file order. A missing log is empty.
    pub fn read_all(&self) -> Result<Vec<StatusSample>> {
        let mut rows = Vec::new();
        self.scan(|sample| rows.push(sample))?;
        Ok(rows)
    }

    /// Samples inside `window`, plus the nearest sample on each side per
    /// line so gaps crossing the window edges can be measured. Streams the
    /// log and keeps only what it returns.
    pub fn read_range(&self, window: &AnalysisWindow) -> Result<Vec<StatusSample>> {
        let mut inside = Vec::new();
        let mut before: HashMap<String, StatusSample> = HashMap::new();
        let mut after: HashMap<String, StatusSample> = HashMap::new();
        let mut before_end: HashSet<String> = HashSet::new();
        let mut total = 0usize;

        self.scan(|sample| {
            total += 1;
            if sample.timestamp < window.end {
                before_end.insert(sample.line_id.clone());
            }
            if window.contains(sample.timestamp) {
                inside.push(sample);
            } else if sample.timestamp < window.start {
                keep_nearest(&mut before, sample, |new, old| new > old);
            } else {
                keep_nearest(&mut after, sample, |new, old| new < old);
            }
        })?;

        let mut out: Vec<StatusSample> = before
            .into_values()
            .chain(inside)
            .chain(after.into_values().filter(|s| before_end.contains(&s.line_id)))
            .collect();
        out.sort_by(|a, b| {
            a.line_id
                .cmp(&b.line_id)
                .then_with(|| a.timestamp.cmp(&b.timestamp))
        });

        debug!(total, selected = out.len(), "Sample log range read");
        Ok(out)
    }

    pub fn latest_timestamp(&self) -> Result<Option<NaiveDateTime>> {
        Ok(self.recent()?.latest_by_line.into_values().max())
    }

    /// Newest sample per line, from the tail of the log when it parses and
    /// from a full scan otherwise.
    fn recent(&self) -> Result<Recent> {
        if !self.path.exists() {
            return Ok(Recent::default());
        }

        let mut recent = Recent::default();
        match self.read_tail()? {
            Some((rows, whole_file)) => {
                recent.floor = if whole_file {
                    None
                } else {
                    rows.iter().map(|s| s.timestamp).min()
                };
                rows.iter().for_each(|s| recent.observe(s));
            }
            None => self.scan(|sample| recent.observe(&sample))?,
        }
        Ok(recent)
    }

    /// Parses the last [`TAIL_BYTES`] of the log. Returns `None` when the
    /// tail does not parse cleanly or holds no complete row.
    fn read_tail(&self) -> Result<Option<(Vec<StatusSample>, bool)>> {
        let mut file = File::open(&self.path)
            .with_context(|| format!("failed to open sample log {}", self.path.display()))?;
        let len = file.metadata()?.len();
        let offset = len.saturating_sub(TAIL_BYTES);
        file.seek(SeekFrom::Start(offset))?;

        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        let whole_file = offset == 0;
        let body = if whole_file {
            &buf[..]
        } else {
            match buf.iter().position(|b| *b == b'\n') {
                Some(newline) => &buf[newline + 1..],
                None => return Ok(None),
            }
        };

        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(whole_file)
            .from_reader(body);
        match rdr.deserialize().collect::<Result<Vec<StatusSample>, _>>() {
            Ok(rows) if whole_file || !rows.is_empty() => Ok(Some((rows, whole_file))),
            Ok(_) => Ok(None),
            Err(err) => {
                debug!(%err, "Sample log tail unreadable, scanning whole log");
                Ok(None)
            }
        }
    }

    /// Streams every row of the log through `visit`. A missing log is empty.
    fn scan(&self, mut visit: impl FnMut(StatusSample)) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }

        let file = File::open(&self.path)
            .with_context(|| format!("failed to open sample log {}", self.path.display()))?;
        let mut rdr = csv::Reader::from_reader(file);

        for (idx, result) in rdr.deserialize().enumerate() {
            let sample: StatusSample = result.with_context(|| {
                format!(
                    "malformed sample on row {} of {}",
                    idx + 2,
                    self.path.display()
                )
            })?;
            visit(sample);
        }
        Ok(())
    }
}

fn keep_nearest(
    slot: &mut HashMap<String, StatusSample>,
    sample: StatusSample,
    closer: impl Fn(NaiveDateTime, NaiveDateTime) -> bool,
) {
    match slot.get(&sample.line_id) {
        Some(kept) if !closer(sample.timestamp, kept.timestamp) => {}
        _ => {
            slot.insert(sample.line_id.clone(), sample);
        }
    }
}
