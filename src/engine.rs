/// Idle decision engine: one check per invocation.
///
/// Resolves the active log, finds its last activity, and compares it with the
/// persisted state. A notification fires at most once per distinct activity
/// timestamp, so repeated runs during the same idle stretch stay quiet.
use crate::activity::{last_meaningful_activity, ActivityKind, ActivityRules};
use crate::config::IdleNotifyConfig;
use crate::notifier::{render_message, Notifier};
use crate::selector::{latest_log, ActiveLog};
use crate::state::{PersistedState, StateError, StateStore};
use crate::timestamp::system_time_epoch;
use std::path::PathBuf;

/// What a run did.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// No log matched the glob; nothing to do.
    NoActiveLog,
    /// Another invocation holds the state lock.
    Locked,
    /// Newer activity than any previous run saw; recorded, no notification.
    AdvancedSeen { last_ts: f64 },
    /// Idle past the threshold; notification sent.
    Notified { last_ts: f64, idle_secs: f64 },
    /// Idle past the threshold, but this activity timestamp was already notified.
    AlreadyNotified { last_ts: f64, idle_secs: f64 },
    /// No new activity, but not idle long enough yet.
    NotIdleYet { last_ts: f64, idle_secs: f64 },
}

/// Outcome of comparing one activity timestamp against state.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Step {
    AdvanceSeen,
    Notify { idle_secs: f64 },
    AlreadyNotified { idle_secs: f64 },
    NotIdleYet { idle_secs: f64 },
}

fn decide(state: &PersistedState, last_ts: f64, now: f64, threshold_secs: f64) -> Step {
    if last_ts > state.last_seen_activity_ts {
        return Step::AdvanceSeen;
    }

    let idle_secs = now - last_ts;
    if idle_secs < threshold_secs {
        Step::NotIdleYet { idle_secs }
    } else if state.last_notified_activity_ts == last_ts {
        Step::AlreadyNotified { idle_secs }
    } else {
        Step::Notify { idle_secs }
    }
}

/// Where the activity timestamp for a run came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivitySource {
    Log(ActivityKind),
    /// No qualifying log line; the file's mtime stood in.
    Mtime,
}

/// Snapshot of the inputs a run would decide on, for `--status`.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub log_path: PathBuf,
    pub last_ts: f64,
    pub source: ActivitySource,
    pub idle_secs: f64,
    pub threshold_secs: f64,
    pub state: PersistedState,
}

/// Runs idle checks against one log glob and one state file.
#[derive(Debug, Clone)]
pub struct IdleChecker {
    log_glob: String,
    rules: ActivityRules,
    threshold_secs: f64,
    message_template: String,
    store: StateStore,
}

impl IdleChecker {
    pub fn from_config(config: &IdleNotifyConfig) -> Self {
        Self {
            log_glob: config.log.glob.clone(),
            rules: ActivityRules::from_config(&config.log),
            threshold_secs: config.threshold_secs(),
            message_template: config.notify.message.clone(),
            store: StateStore::new(config.state.path.clone()),
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Resolve the active log and its last activity timestamp.
    fn last_activity(&self, log: &ActiveLog) -> (f64, ActivitySource) {
        if let Some(signal) = last_meaningful_activity(&log.path, &self.rules) {
            return (signal.timestamp, ActivitySource::Log(signal.kind));
        }

        // The log may have grown since it was selected; prefer a fresh mtime.
        let modified = std::fs::metadata(&log.path)
            .and_then(|m| m.modified())
            .unwrap_or(log.modified);
        (system_time_epoch(modified), ActivitySource::Mtime)
    }

    /// Run one check at wall-clock time `now` (epoch seconds).
    pub async fn run<N: Notifier>(&self, notifier: &N, now: f64) -> Result<Decision, StateError> {
        let Some(log) = latest_log(&self.log_glob) else {
            tracing::info!(pattern = %self.log_glob, "no active log, nothing to do");
            return Ok(Decision::NoActiveLog);
        };

        let (last_ts, source) = self.last_activity(&log);
        tracing::debug!(
            log = %log.path.display(),
            last_ts,
            ?source,
            "resolved last activity"
        );

        let Some(_lock) = self.store.try_lock()? else {
            return Ok(Decision::Locked);
        };

        let mut state = self.store.load();
        let decision = match decide(&state, last_ts, now, self.threshold_secs) {
            Step::AdvanceSeen => {
                tracing::info!(
                    last_ts,
                    previous = state.last_seen_activity_ts,
                    "new activity seen"
                );
                state.last_seen_activity_ts = last_ts;
                self.store.save(&state)?;
                Decision::AdvancedSeen { last_ts }
            }
            Step::Notify { idle_secs } => {
                let text = render_message(&self.message_template, idle_secs);
                notifier.send(&text).await;
                state.last_notified_at = now;
                state.last_notified_activity_ts = last_ts;
                self.store.save(&state)?;
                tracing::info!(last_ts, idle_secs, "idle notification sent");
                Decision::Notified { last_ts, idle_secs }
            }
            Step::AlreadyNotified { idle_secs } => {
                tracing::debug!(last_ts, idle_secs, "already notified for this idle period");
                Decision::AlreadyNotified { last_ts, idle_secs }
            }
            Step::NotIdleYet { idle_secs } => {
                tracing::debug!(
                    last_ts,
                    idle_secs,
                    threshold_secs = self.threshold_secs,
                    "not idle long enough"
                );
                Decision::NotIdleYet { last_ts, idle_secs }
            }
        };

        Ok(decision)
    }

    /// Inspect the current inputs without changing state or notifying.
    pub fn status(&self, now: f64) -> Option<StatusReport> {
        let log = latest_log(&self.log_glob)?;
        let (last_ts, source) = self.last_activity(&log);
        Some(StatusReport {
            log_path: log.path,
            last_ts,
            source,
            idle_secs: now - last_ts,
            threshold_secs: self.threshold_secs,
            state: self.store.load(),
        })
    }
}
