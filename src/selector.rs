/// Active log selection: newest-modified file matching a glob.
use std::path::PathBuf;
use std::time::SystemTime;

/// A log file and its modification time.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveLog {
    pub path: PathBuf,
    pub modified: SystemTime,
}

/// Pick the most recently modified file matching `pattern`.
///
/// Returns `None` when nothing matches or the pattern is invalid. Entries whose
/// metadata can't be read are skipped.
pub fn latest_log(pattern: &str) -> Option<ActiveLog> {
    let paths = match glob::glob(pattern) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, pattern, "invalid log glob pattern");
            return None;
        }
    };

    let mut latest: Option<ActiveLog> = None;
    for entry in paths {
        let path = match entry {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unreadable glob entry");
                continue;
            }
        };
        let modified = match std::fs::metadata(&path).and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(e) => {
                tracing::debug!(error = %e, path = %path.display(), "skipping log without mtime");
                continue;
            }
        };
        if latest.as_ref().map_or(true, |l| modified > l.modified) {
            latest = Some(ActiveLog { path, modified });
        }
    }

    if latest.is_none() {
        tracing::debug!(pattern, "no log files match");
    }
    latest
}
