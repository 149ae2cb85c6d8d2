use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration: defaults, then `idle-notify.toml`, then `IDLE_NOTIFY_*`
/// environment variables, then CLI flags (applied in main).
#[derive(Debug, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct IdleNotifyConfig {
    pub notify: NotifyConfig,
    pub idle: IdleConfig,
    pub log: LogConfig,
    pub state: StateConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub recipient: String,
    pub command: String,
    pub service: String,
    /// Message body; `{minutes}` is replaced with the idle duration.
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct IdleConfig {
    pub threshold_mins: u64,
    /// How often the external scheduler runs us. Informational only.
    pub check_interval_secs: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub glob: String,
    pub tail_bytes: u64,
    pub max_lines: usize,
    pub noise_substrings: Vec<String>,
    pub activity_markers: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub path: PathBuf,
}

// --- Default implementations ---

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            recipient: "+12508697880".to_string(),
            command: "imsg".to_string(),
            service: "imessage".to_string(),
            message: "coco is idle (no OpenClaw activity for ~{minutes} minutes). \
                      Ping me when you want me to continue."
                .to_string(),
        }
    }
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            threshold_mins: 15,
            check_interval_secs: 300,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            glob: "/tmp/openclaw/openclaw-*.log".to_string(),
            tail_bytes: 250_000,
            max_lines: 2000,
            noise_substrings: vec![
                "[tools] browser failed".to_string(),
                "plugin CLI register skipped".to_string(),
            ],
            activity_markers: vec![
                "[tools]".to_string(),
                "Exec ".to_string(),
                "sessions_".to_string(),
                "docker".to_string(),
            ],
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("~/Library/Application Support/mission-control/idle-notify.json"),
        }
    }
}

impl IdleNotifyConfig {
    /// Load config from a TOML file. A missing file yields defaults; a file that
    /// exists but fails to parse is an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Apply `IDLE_NOTIFY_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides using an arbitrary variable lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(to) = lookup("IDLE_NOTIFY_TO") {
            self.notify.recipient = to;
        }
        if let Some(raw) = lookup("IDLE_NOTIFY_MINUTES") {
            self.idle.threshold_mins = parse_number("IDLE_NOTIFY_MINUTES", &raw)?;
        }
        if let Some(raw) = lookup("IDLE_NOTIFY_CHECK_EVERY_SECONDS") {
            self.idle.check_interval_secs = parse_number("IDLE_NOTIFY_CHECK_EVERY_SECONDS", &raw)?;
        }
        if let Some(path) = lookup("IDLE_NOTIFY_STATE") {
            self.state.path = PathBuf::from(path);
        }
        if let Some(glob) = lookup("IDLE_NOTIFY_LOG_GLOB") {
            self.log.glob = glob;
        }
        Ok(())
    }

    /// Expand a leading `~` in the state path and log glob.
    pub fn expand_paths(&mut self) {
        let home = dirs::home_dir();
        if home.is_none() {
            tracing::warn!("could not determine home directory, leaving `~` paths unexpanded");
        }
        self.expand_paths_with(home.as_deref());
    }

    fn expand_paths_with(&mut self, home: Option<&Path>) {
        let Some(home) = home else {
            return;
        };
        self.state.path = expand_tilde(&self.state.path, home);
        self.log.glob = expand_tilde(Path::new(&self.log.glob), home)
            .to_string_lossy()
            .into_owned();
    }

    /// Idle threshold in seconds.
    pub fn threshold_secs(&self) -> f64 {
        self.idle.threshold_mins.saturating_mul(60) as f64
    }
}

fn expand_tilde(path: &Path, home: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => home.join(rest),
        Err(_) => path.to_path_buf(),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: raw.to_string(),
    })
}

/// Errors from loading or overriding configuration.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    InvalidValue {
        key: String,
        value: String,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {source}", path.display())
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {source}", path.display())
            }
            ConfigError::InvalidValue { key, value } => {
                write!(f, "invalid value for {key}: {value:?} is not a number")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::InvalidValue { .. } => None,
        }
    }
}
