/// Timestamp parsing for log lines: ISO-8601-ish text to UTC epoch seconds.
///
/// Epoch values are `f64` seconds with microsecond resolution, computed as
/// `micros / 1e6` so values written to the state file compare exactly across runs.
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use std::time::SystemTime;

/// Formats with an explicit offset. `Z` is rewritten to `+00:00` before matching.
const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%z",
];

/// Offset-less formats, interpreted in the local time zone.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parse a timestamp like `2026-02-02T08:08:11.644Z` into epoch seconds.
///
/// Returns `None` for anything that doesn't parse; callers treat that as "no timestamp".
pub fn parse_timestamp(text: &str) -> Option<f64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let normalized = match text.strip_suffix('Z').or_else(|| text.strip_suffix('z')) {
        Some(stripped) => format!("{stripped}+00:00"),
        None => text.to_string(),
    };

    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(&normalized, fmt) {
            return Some(epoch_seconds(&dt.with_timezone(&Utc)));
        }
    }

    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&normalized, fmt) {
            return local_to_epoch(naive);
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(&normalized, "%Y-%m-%d") {
        return local_to_epoch(date.and_hms_opt(0, 0, 0)?);
    }

    None
}

fn local_to_epoch(naive: NaiveDateTime) -> Option<f64> {
    zoned_to_epoch(&Local, naive)
}

/// Resolve a wall-clock time in `tz`. Ambiguous times (DST fold) take the
/// earlier instant; times skipped by a spring-forward gap are read with the
/// pre-transition offset, i.e. shifted forward by the gap.
fn zoned_to_epoch<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> Option<f64> {
    let dt = tz.from_local_datetime(&naive).earliest().or_else(|| {
        let shifted = naive.checked_add_signed(chrono::Duration::hours(1))?;
        tz.from_local_datetime(&shifted).earliest()
    })?;
    Some(epoch_seconds(&dt.with_timezone(&Utc)))
}

/// Epoch seconds for a UTC datetime.
pub fn epoch_seconds(dt: &DateTime<Utc>) -> f64 {
    dt.timestamp_micros() as f64 / 1_000_000.0
}

/// Current wall-clock time as epoch seconds.
pub fn now_epoch() -> f64 {
    epoch_seconds(&Utc::now())
}

/// Convert a filesystem time (e.g. an mtime) to epoch seconds.
pub fn system_time_epoch(time: SystemTime) -> f64 {
    epoch_seconds(&DateTime::<Utc>::from(time))
}

/// Render epoch seconds as RFC 3339 for logs and status output.
pub fn format_epoch(epoch: f64) -> String {
    if epoch <= 0.0 {
        return "never".to_string();
    }
    let micros = (epoch * 1_000_000.0).round() as i64;
    let secs = micros.div_euclid(1_000_000);
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    match DateTime::<Utc>::from_timestamp(secs, nanos) {
        Some(dt) => dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        None => format!("{epoch}"),
    }
}
