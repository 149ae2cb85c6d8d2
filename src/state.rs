/// Persisted notifier state: a small JSON file rewritten atomically.
///
/// Uses atomic write pattern: write to temp file, fsync, then rename.
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

/// State carried between invocations. All values are epoch seconds; zero means never.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "StateFile")]
pub struct PersistedState {
    pub last_notified_at: f64,
    /// Activity timestamp that the last notification was sent for.
    pub last_notified_activity_ts: f64,
    /// Newest activity timestamp observed by any run.
    pub last_seen_activity_ts: f64,
}

/// On-disk shape accepted by `load`. Files may carry the older
/// `lastNotifiedLogMtime` / `lastSeenLogMtime` keys, alone or next to the
/// current ones; the current key wins when both are present.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateFile {
    last_notified_at: Option<f64>,
    last_notified_activity_ts: Option<f64>,
    last_notified_log_mtime: Option<f64>,
    last_seen_activity_ts: Option<f64>,
    last_seen_log_mtime: Option<f64>,
}

impl From<StateFile> for PersistedState {
    fn from(f: StateFile) -> Self {
        Self {
            last_notified_at: f.last_notified_at.unwrap_or(0.0),
            last_notified_activity_ts: f
                .last_notified_activity_ts
                .or(f.last_notified_log_mtime)
                .unwrap_or(0.0),
            last_seen_activity_ts: f
                .last_seen_activity_ts
                .or(f.last_seen_log_mtime)
                .unwrap_or(0.0),
        }
    }
}

/// Reads and writes the state file.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sibling lock file, e.g. `idle-notify.json.lock`.
    pub fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state".into());
        name.push(".lock");
        self.path.with_file_name(name)
    }

    fn tmp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "state".to_string());
        self.path
            .with_file_name(format!(".{name}.tmp.{}", std::process::id()))
    }

    /// Load state, falling back to all-zero defaults on any failure.
    pub fn load(&self) -> PersistedState {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(error = %e, path = %self.path.display(), "failed to read state, using defaults");
                }
                return PersistedState::default();
            }
        };

        match serde_json::from_str(&contents) {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(error = %e, path = %self.path.display(), "corrupt state file, using defaults");
                PersistedState::default()
            }
        }
    }

    /// Atomically write state, creating the parent directory if needed.
    ///
    /// Readers see either the previous file or the new one, never a partial write.
    pub fn save(&self, state: &PersistedState) -> Result<(), StateError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| StateError::CreateDir {
                path: dir.to_path_buf(),
                source: e,
            })?;
        }

        let json = serde_json::to_string(state).map_err(|e| StateError::Serialize { source: e })?;
        let tmp_path = self.tmp_path();

        let write_tmp = || -> std::io::Result<()> {
            let mut file = File::create(&tmp_path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()
        };
        if let Err(e) = write_tmp() {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(StateError::Write {
                path: tmp_path,
                source: e,
            });
        }

        if let Err(e) = std::fs::rename(&tmp_path, &self.path) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(StateError::Rename {
                from: tmp_path,
                to: self.path.clone(),
                source: e,
            });
        }

        tracing::debug!(path = %self.path.display(), ?state, "saved state");
        Ok(())
    }

    /// Take the exclusive advisory lock guarding read-modify-write of the state.
    ///
    /// Returns `Ok(None)` if another process already holds it.
    pub fn try_lock(&self) -> Result<Option<StateLock>, StateError> {
        let path = self.lock_path();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| StateError::CreateDir {
                path: dir.to_path_buf(),
                source: e,
            })?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| StateError::Lock {
                path: path.clone(),
                source: e,
            })?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(StateLock { file })),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                tracing::info!(path = %path.display(), "state lock held by another run");
                Ok(None)
            }
            Err(e) => Err(StateError::Lock { path, source: e }),
        }
    }
}

/// Held advisory lock; released on drop.
#[derive(Debug)]
pub struct StateLock {
    file: File,
}

impl Drop for StateLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Errors from state file operations.
#[derive(Debug)]
pub enum StateError {
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    Serialize {
        source: serde_json::Error,
    },
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
    Lock {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for StateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateError::CreateDir { path, source } => {
                write!(f, "failed to create state directory {}: {source}", path.display())
            }
            StateError::Serialize { source } => write!(f, "failed to serialize state: {source}"),
            StateError::Write { path, source } => {
                write!(
                    f,
                    "failed to write temp state file {}: {source}",
                    path.display()
                )
            }
            StateError::Rename { from, to, source } => {
                write!(
                    f,
                    "failed to rename {} -> {}: {source}",
                    from.display(),
                    to.display()
                )
            }
            StateError::Lock { path, source } => {
                write!(f, "failed to lock {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for StateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StateError::CreateDir { source, .. } => Some(source),
            StateError::Serialize { source } => Some(source),
            StateError::Write { source, .. } => Some(source),
            StateError::Rename { source, .. } => Some(source),
            StateError::Lock { source, .. } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().join("idle-notify.json"));
        let values = [
            0.0,
            1_770_019_691.0,
            1_770_019_691.644,
            1_770_019_755.000_001,
            1_770_019_800.123_456,
            4e9,
            4_000_000_000.999_999,
            1_770_019_691_644_001_f64 / 1_000_000.0,
        ];

        for (i, &a) in values.iter().enumerate() {
            let b = values[(i + 1) % values.len()];
            let c = values[(i + 3) % values.len()];
            let state = PersistedState {
                last_notified_at: a,
                last_notified_activity_ts: b,
                last_seen_activity_ts: c,
            };
            store.save(&state).unwrap();
            let loaded = store.load();
            assert_eq!(
                loaded.last_notified_at.to_bits(),
                a.to_bits(),
                "lastNotifiedAt {a}"
            );
            assert_eq!(
                loaded.last_notified_activity_ts.to_bits(),
                b.to_bits(),
                "lastNotifiedActivityTs {b}"
            );
            assert_eq!(
                loaded.last_seen_activity_ts.to_bits(),
                c.to_bits(),
                "lastSeenActivityTs {c}"
            );
        }
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().join("missing.json"));
        assert_eq!(store.load(), PersistedState::default());
    }

    #[test]
    fn test_load_corrupt_file_is_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idle-notify.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(StateStore::new(path).load(), PersistedState::default());
    }

    #[test]
    fn test_load_wrong_shape_is_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idle-notify.json");
        std::fs::write(&path, r#"{"lastSeenActivityTs": "yesterday"}"#).unwrap();
        assert_eq!(StateStore::new(path).load(), PersistedState::default());
    }

    #[test]
    fn test_load_missing_fields_default_to_zero() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idle-notify.json");
        std::fs::write(&path, r#"{"lastSeenActivityTs": 42.5}"#).unwrap();

        let state = StateStore::new(path).load();
        assert_eq!(state.last_seen_activity_ts, 42.5);
        assert_eq!(state.last_notified_activity_ts, 0.0);
        assert_eq!(state.last_notified_at, 0.0);
    }

    #[test]
    fn test_load_accepts_legacy_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idle-notify.json");
        std::fs::write(
            &path,
            r#"{"lastNotifiedAt": 10, "lastNotifiedLogMtime": 5.5, "lastSeenLogMtime": 7.25}"#,
        )
        .unwrap();

        let state = StateStore::new(path).load();
        assert_eq!(
            state,
            PersistedState {
                last_notified_at: 10.0,
                last_notified_activity_ts: 5.5,
                last_seen_activity_ts: 7.25,
            }
        );
    }

    #[test]
    fn test_load_prefers_current_keys_over_legacy() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idle-notify.json");
        std::fs::write(
            &path,
            r#"{"lastNotifiedAt": 10, "lastSeenActivityTs": 7.0, "lastSeenLogMtime": 3.0,
                "lastNotifiedActivityTs": 5.0, "lastNotifiedLogMtime": 1.0}"#,
        )
        .unwrap();

        let state = StateStore::new(path).load();
        assert_eq!(
            state,
            PersistedState {
                last_notified_at: 10.0,
                last_notified_activity_ts: 5.0,
                last_seen_activity_ts: 7.0,
            }
        );
    }

    #[test]
    fn test_load_mixed_keys_then_rerun_does_not_renotify() {
        // Current keys plus a legacy key added by an older writer.
        let dir = tempdir().unwrap();
        let path = dir.path().join("idle-notify.json");
        std::fs::write(
            &path,
            r#"{"lastNotifiedAt": 10, "lastSeenActivityTs": 7.0,
                "lastSeenLogMtime": 7.0, "lastNotifiedActivityTs": 7.0}"#,
        )
        .unwrap();

        let state = StateStore::new(path).load();
        assert_eq!(state.last_seen_activity_ts, 7.0);
        assert_eq!(state.last_notified_activity_ts, 7.0);
        assert_eq!(state.last_notified_at, 10.0);
    }

    #[test]
    fn test_saved_json_uses_camel_case_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idle-notify.json");
        let store = StateStore::new(path.clone());
        store
            .save(&PersistedState {
                last_notified_at: 1.0,
                last_notified_activity_ts: 2.0,
                last_seen_activity_ts: 3.0,
            })
            .unwrap();

        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed["lastNotifiedAt"], 1.0);
        assert_eq!(parsed["lastNotifiedActivityTs"], 2.0);
        assert_eq!(parsed["lastSeenActivityTs"], 3.0);
        assert!(parsed.get("lastSeenLogMtime").is_none());
        assert!(parsed.get("lastNotifiedLogMtime").is_none());
    }

    #[test]
    fn test_save_creates_parent_dir_and_leaves_no_temp() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/deeper/idle-notify.json");
        let store = StateStore::new(path.clone());

        store.save(&PersistedState::default()).unwrap();
        assert!(path.exists());

        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty(), "temp file should be renamed away");
    }

    #[test]
    fn test_save_overwrites_previous_state() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().join("idle-notify.json"));

        let mut state = PersistedState {
            last_seen_activity_ts: 100.0,
            ..Default::default()
        };
        store.save(&state).unwrap();
        state.last_seen_activity_ts = 200.0;
        store.save(&state).unwrap();

        assert_eq!(store.load().last_seen_activity_ts, 200.0);
    }

    #[test]
    fn test_failed_save_keeps_previous_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idle-notify.json");
        let store = StateStore::new(path.clone());
        let committed = PersistedState {
            last_seen_activity_ts: 100.0,
            ..Default::default()
        };
        store.save(&committed).unwrap();

        // Occupy the temp path with a directory so the write fails.
        std::fs::create_dir(store.tmp_path()).unwrap();
        let err = store
            .save(&PersistedState {
                last_seen_activity_ts: 999.0,
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, StateError::Write { .. }));
        assert_eq!(store.load(), committed);
    }

    #[test]
    fn test_lock_path() {
        let store = StateStore::new("/var/lib/idle/idle-notify.json");
        assert_eq!(
            store.lock_path(),
            PathBuf::from("/var/lib/idle/idle-notify.json.lock")
        );
    }

    #[test]
    fn test_lock_is_exclusive_until_dropped() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().join("idle-notify.json"));

        let held = store.try_lock().unwrap();
        assert!(held.is_some());
        assert!(store.try_lock().unwrap().is_none());

        drop(held);
        assert!(store.try_lock().unwrap().is_some());
    }

    #[test]
    fn test_state_error_display() {
        let err = StateError::Write {
            path: PathBuf::from("/tmp/test"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no perms"),
        };
        let msg = err.to_string();
        assert!(msg.contains("failed to write temp state file"));
        assert!(msg.contains("no perms"));
    }
}
