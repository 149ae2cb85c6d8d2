/// Last-activity extraction: scan the tail of a JSONL agent log for the newest
/// line that isn't known noise.
use crate::config::LogConfig;
use crate::timestamp::parse_timestamp;
use serde_json::Value;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Message field names, tried in order.
const MESSAGE_FIELDS: &[&str] = &["0", "message"];

/// Timestamp field names, tried in order.
const TIME_FIELDS: &[&str] = &["time", "date"];

/// One decoded log line.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub message: String,
    pub timestamp: Option<f64>,
}

impl LogRecord {
    /// Decode a JSON-shaped line. Returns `None` if it isn't a JSON object.
    pub fn parse(line: &str) -> Option<Self> {
        let v: Value = serde_json::from_str(line).ok()?;
        let obj = v.as_object()?;

        let message = MESSAGE_FIELDS
            .iter()
            .find_map(|k| obj.get(*k).filter(|v| is_truthy(v)))
            .map(message_text)
            .unwrap_or_default();

        // A missing or empty `time` falls through to `date`.
        let timestamp = TIME_FIELDS
            .iter()
            .find_map(|k| obj.get(*k).filter(|v| is_truthy(v)))
            .and_then(|v| v.as_str())
            .and_then(parse_timestamp);

        Some(Self { message, timestamp })
    }
}

fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn message_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Why a line counted as activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    /// Message contained one of the activity markers.
    Marker,
    /// Any other non-noise line.
    Fallback,
}

/// Result of a successful scan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActivitySignal {
    pub timestamp: f64,
    pub kind: ActivityKind,
}

/// Matching rules for a scan.
#[derive(Debug, Clone)]
pub struct ActivityRules {
    pub tail_bytes: u64,
    pub max_lines: usize,
    pub noise_substrings: Vec<String>,
    pub activity_markers: Vec<String>,
}

impl ActivityRules {
    pub fn from_config(log: &LogConfig) -> Self {
        Self {
            tail_bytes: log.tail_bytes,
            max_lines: log.max_lines,
            noise_substrings: log.noise_substrings.clone(),
            activity_markers: log.activity_markers.clone(),
        }
    }

    fn is_noise(&self, message: &str) -> bool {
        self.noise_substrings.iter().any(|s| message.contains(s.as_str()))
    }

    fn is_marker(&self, message: &str) -> bool {
        self.activity_markers.iter().any(|s| message.contains(s.as_str()))
    }

    /// Classify one record, or `None` if it should be skipped.
    fn classify(&self, record: &LogRecord) -> Option<ActivitySignal> {
        let timestamp = record.timestamp?;
        if self.is_noise(&record.message) {
            return None;
        }
        let kind = if self.is_marker(&record.message) {
            ActivityKind::Marker
        } else {
            ActivityKind::Fallback
        };
        Some(ActivitySignal { timestamp, kind })
    }
}

/// Find the most recent meaningful activity in the log at `path`.
///
/// Returns `None` if the file can't be read or no line qualifies.
pub fn last_meaningful_activity(path: &Path, rules: &ActivityRules) -> Option<ActivitySignal> {
    let tail = match read_tail(path, rules.tail_bytes) {
        Ok(t) => t,
        Err(e) => {
            tracing::warn!(
                error = %e,
                path = %path.display(),
                "failed to read log tail"
            );
            return None;
        }
    };

    let signal = scan_text(&tail, rules);
    tracing::debug!(
        path = %path.display(),
        tail_bytes = tail.len(),
        ?signal,
        "scanned log tail"
    );
    signal
}

/// Scan text newest-line-first. The first non-noise line with a timestamp wins,
/// whether or not it carries an activity marker.
pub fn scan_text(text: &str, rules: &ActivityRules) -> Option<ActivitySignal> {
    let candidates: Vec<&str> = text
        .lines()
        .filter(|line| line.trim().starts_with('{'))
        .collect();
    let start = candidates.len().saturating_sub(rules.max_lines);

    for line in candidates[start..].iter().rev() {
        let Some(record) = LogRecord::parse(line.trim()) else {
            continue;
        };
        if let Some(signal) = rules.classify(&record) {
            return Some(signal);
        }
    }

    None
}

/// Read at most the last `max_bytes` of a file, decoding lossily.
fn read_tail(path: &Path, max_bytes: u64) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let size = file.seek(SeekFrom::End(0))?;
    file.seek(SeekFrom::Start(size.saturating_sub(max_bytes)))?;

    let mut buf = Vec::with_capacity(size.min(max_bytes) as usize);
    file.read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
