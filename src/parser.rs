//! Parser for the published operation-status payload.
//!
//! The dashboard publishes a flat, ordered list of tokens: line ids each
//! followed (eventually) by the status text that applies to them, e.g.
//! `["M1", "M2", "Normal service", "M3", "M4", "Signal fault"]`. A status
//! text covers every line listed since the previous status text.

use anyhow::{Context, Result, bail};
use chrono::NaiveDateTime;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::model::StatusSample;

/// Raw text recorded when no status could be obtained for a line.
pub const UNKNOWN_STATUS: &str = "Unknown";

#[derive(Deserialize)]
#[serde(untagged)]
enum Payload {
    Tokens(Vec<String>),
    Wrapped { messages: Vec<String> },
}

/// Extracts the ordered token list from a payload.
///
/// Accepts a JSON array of strings, a JSON object with a `messages` array,
/// or plain text with one token per line. Blank tokens are dropped; repeats
/// are kept since several groups of lines may share one status text.
///
/// # Errors
///
/// Returns an error if the bytes are not UTF-8, look like JSON but do not
/// match either JSON layout, or contain no tokens at all.
pub fn parse_status_payload(bytes: &[u8]) -> Result<Vec<String>> {
    let text = std::str::from_utf8(bytes).context("status payload is not valid UTF-8")?;
    let trimmed = text.trim_start();

    let raw: Vec<String> = if trimmed.starts_with('[') || trimmed.starts_with('{') {
        match serde_json::from_str::<Payload>(trimmed).context("malformed status JSON")? {
            Payload::Tokens(tokens) => tokens,
            Payload::Wrapped { messages } => messages,
        }
    } else {
        text.lines().map(str::to_string).collect()
    };

    let mut tokens: Vec<String> = Vec::with_capacity(raw.len());
    for token in raw {
        let token = token.trim();
        if !token.is_empty() {
            tokens.push(token.to_string());
        }
    }

    if tokens.is_empty() {
        bail!("status payload contains no tokens");
    }
    debug!(tokens = tokens.len(), "Status payload parsed");
    Ok(tokens)
}

/// Turns a token list into one sample per configured line, all stamped
/// with `timestamp`.
///
/// A line listed again after it already has a status keeps the first one.
/// Lines listed without a following status text, and configured lines the
/// payload does not mention, are recorded as [`UNKNOWN_STATUS`] so every
/// line has a sample for every round.
pub fn to_samples(tokens: &[String], lines: &[String], timestamp: NaiveDateTime) -> Vec<StatusSample> {
    let mut status_of: HashMap<&str, &str> = HashMap::new();
    let mut pending: Vec<&str> = Vec::new();

    for token in tokens {
        if lines.iter().any(|l| l == token) {
            let line = token.as_str();
            if !status_of.contains_key(line) && !pending.contains(&line) {
                pending.push(line);
            }
        } else {
            for line in pending.drain(..) {
                status_of.entry(line).or_insert(token.as_str());
            }
        }
    }

    if !pending.is_empty() {
        warn!(lines = ?pending, "Lines listed without a status text");
    }

    lines
        .iter()
        .map(|line| {
            let raw = status_of.get(line.as_str()).copied().unwrap_or(UNKNOWN_STATUS);
            StatusSample::new(line, timestamp, raw)
        })
        .collect()
}

/// One [`UNKNOWN_STATUS`] sample per line; recorded when fetching failed.
pub fn unknown_samples(lines: &[String], timestamp: NaiveDateTime) -> Vec<StatusSample> {
    lines
        .iter()
        .map(|line| StatusSample::new(line, timestamp, UNKNOWN_STATUS))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_parse_json_array() {
        let tokens = parse_status_payload(br#"["M1", " M2 ", "", "Normal service"]"#).unwrap();
        assert_eq!(tokens, vec!["M1", "M2", "Normal service"]);
    }

    #[test]
    fn test_parse_wrapped_json() {
        let tokens = parse_status_payload(br#"{"messages": ["M1", "Signal fault"]}"#).unwrap();
        assert_eq!(tokens, vec!["M1", "Signal fault"]);
    }

    #[test]
    fn test_parse_plain_text_keeps_repeats() {
        let tokens = parse_status_payload(b"M1\nNormal service\n\nM2\nNormal service\n").unwrap();
        assert_eq!(tokens, vec!["M1", "Normal service", "M2", "Normal service"]);
    }

    #[test]
    fn test_parse_invalid_payloads() {
        assert!(parse_status_payload(b"").is_err());
        assert!(parse_status_payload(b"  \n \n").is_err());
        assert!(parse_status_payload(br#"{"status": 1}"#).is_err());
        assert!(parse_status_payload(&[0xFF, 0xFE, 0x00]).is_err());
    }

    #[test]
    fn test_status_covers_preceding_lines() {
        let tokens = strings(&["M1", "M2", "Normal service", "M3", "M4", "Signal fault"]);
        let samples = to_samples(&tokens, &lines(), ts());

        let texts: Vec<_> = samples.iter().map(|s| s.raw_text.as_str()).collect();
        assert_eq!(
            texts,
            vec!["Normal service", "Normal service", "Signal fault", "Signal fault"]
        );
        assert!(samples.iter().all(|s| s.timestamp == ts()));
    }

    #[test]
    fn test_shared_status_text_covers_each_group() {
        let payload = br#"["M1", "M2", "Normal service", "M3", "Closed for maintenance", "M4", "Normal service"]"#;
        let tokens = parse_status_payload(payload).unwrap();
        let samples = to_samples(&tokens, &lines(), ts());

        let texts: Vec<_> = samples.iter().map(|s| s.raw_text.as_str()).collect();
        assert_eq!(
            texts,
            vec!["Normal service", "Normal service", "Closed for maintenance", "Normal service"]
        );
    }

    #[test]
    fn test_repeated_line_keeps_first_status() {
        let tokens = strings(&["M1", "Normal service", "M1", "M2", "Signal fault"]);
        let samples = to_samples(&tokens, &lines(), ts());

        assert_eq!(samples[0].raw_text, "Normal service");
        assert_eq!(samples[1].raw_text, "Signal fault");
    }

    #[test]
    fn test_missing_status_is_unknown() {
        let tokens = strings(&["M1", "Normal service", "M3"]);
        let samples = to_samples(&tokens, &lines(), ts());

        assert_eq!(samples[0].raw_text, "Normal service");
        assert_eq!(samples[1].raw_text, UNKNOWN_STATUS);
        assert_eq!(samples[2].raw_text, UNKNOWN_STATUS);
        assert_eq!(samples.len(), 4);
    }

    #[test]
    fn test_unknown_samples() {
        let samples = unknown_samples(&lines(), ts());
        assert_eq!(samples.len(), 4);
        assert!(samples.iter().all(|s| s.raw_text == UNKNOWN_STATUS));
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn lines() -> Vec<String> {
        strings(&["M1", "M2", "M3", "M4"])
    }

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 4)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }
}
