//! Host configuration parsing and validation.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::catalog::StaticCatalog;
use crate::models::ScriptSpec;
use crate::protocol::message::LogLevel;
use crate::sink::LogFilter;
use crate::{AppError, Result};

/// Session timing.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionConfig {
    /// Grace period between a cancellation request and a forced kill.
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,
    /// Deadline for answering a pending request; 0 means wait indefinitely.
    #[serde(default)]
    pub request_timeout_seconds: u64,
    /// Send SIGTERM on cancel, in addition to the `cancel` message.
    #[serde(default = "default_true")]
    pub signal_on_cancel: bool,
    /// How long stdout is still read after the child exits.
    #[serde(default = "default_drain_ms")]
    pub drain_ms: u64,
}

fn default_cancel_grace_ms() -> u64 {
    2000
}

fn default_true() -> bool {
    true
}

fn default_drain_ms() -> u64 {
    250
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cancel_grace_ms: default_cancel_grace_ms(),
            request_timeout_seconds: 0,
            signal_on_cancel: true,
            drain_ms: default_drain_ms(),
        }
    }
}

impl SessionConfig {
    /// Cancellation grace period.
    #[must_use]
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    /// Pending request deadline, if any.
    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_seconds > 0).then(|| Duration::from_secs(self.request_timeout_seconds))
    }

    /// Post-exit stdout drain window.
    #[must_use]
    pub fn drain(&self) -> Duration {
        Duration::from_millis(self.drain_ms)
    }
}

/// Retention bounds for registry records and transcript files.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RetentionConfig {
    /// Terminal registry records kept by `prune`.
    #[serde(default = "default_max_count")]
    pub max_records: usize,
    /// Maximum age of terminal registry records; 0 disables the bound.
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u32,
    /// Sealed transcript files kept by `prune`.
    #[serde(default = "default_max_count")]
    pub max_transcripts: usize,
    /// Maximum age of sealed transcripts; 0 disables the bound.
    #[serde(default = "default_max_age_days")]
    pub transcript_max_age_days: u32,
    /// Period of the background retention task.
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
}

fn default_max_count() -> usize {
    50
}

fn default_max_age_days() -> u32 {
    14
}

fn default_interval_seconds() -> u64 {
    3600
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_records: default_max_count(),
            max_age_days: default_max_age_days(),
            max_transcripts: default_max_count(),
            transcript_max_age_days: default_max_age_days(),
            interval_seconds: default_interval_seconds(),
        }
    }
}

impl RetentionConfig {
    /// Period of the background retention task.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

/// What happens to sessions started while another one holds the foreground.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundPolicy {
    /// Run them without an interactive consumer; their requests fail.
    #[default]
    Headless,
    /// Refuse to start them (`Busy`).
    Exclusive,
}

/// Foreground policy settings.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PolicyConfig {
    /// Treatment of non-foreground sessions.
    #[serde(default)]
    pub background: BackgroundPolicy,
}

fn default_transcript_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("fscp-host")
        .join("transcripts")
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

/// Host configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HostConfig {
    /// Directory holding session transcripts.
    #[serde(default = "default_transcript_dir")]
    pub transcript_dir: PathBuf,
    /// Session timing.
    #[serde(default)]
    pub session: SessionConfig,
    /// Retention bounds.
    #[serde(default)]
    pub retention: RetentionConfig,
    /// Foreground policy.
    #[serde(default)]
    pub policy: PolicyConfig,
    /// Minimum script log level forwarded to the host sink.
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,
    /// Script catalog.
    #[serde(default)]
    pub scripts: Vec<ScriptSpec>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            transcript_dir: default_transcript_dir(),
            session: SessionConfig::default(),
            retention: RetentionConfig::default(),
            policy: PolicyConfig::default(),
            log_level: default_log_level(),
            scripts: Vec::new(),
        }
    }
}

impl HostConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// Relative `transcript_dir` and script `working_dir` values are resolved
    /// against the directory containing the file.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|err| {
            AppError::Config(format!("failed to read config {}: {err}", path.display()))
        })?;
        let mut config = Self::from_toml_str(&raw)?;
        if let Some(base) = path.parent() {
            config.resolve_relative_paths(base);
        }
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Sink-side filter for script log lines.
    #[must_use]
    pub fn log_filter(&self) -> LogFilter {
        LogFilter::new(self.log_level)
    }

    /// Catalog built from the `[[scripts]]` table.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` on duplicate script ids.
    pub fn catalog(&self) -> Result<StaticCatalog> {
        StaticCatalog::new(self.scripts.iter().cloned())
    }

    fn resolve_relative_paths(&mut self, base: &Path) {
        if self.transcript_dir.is_relative() {
            self.transcript_dir = base.join(&self.transcript_dir);
        }
        for script in &mut self.scripts {
            if script.working_dir.is_relative() {
                script.working_dir = base.join(&script.working_dir);
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.session.cancel_grace_ms == 0 {
            return Err(AppError::Config(
                "session.cancel_grace_ms must be greater than zero".into(),
            ));
        }

        if self.retention.max_records == 0 {
            return Err(AppError::Config(
                "retention.max_records must be greater than zero".into(),
            ));
        }

        if self.retention.max_transcripts == 0 {
            return Err(AppError::Config(
                "retention.max_transcripts must be greater than zero".into(),
            ));
        }

        if self.retention.interval_seconds == 0 {
            return Err(AppError::Config(
                "retention.interval_seconds must be greater than zero".into(),
            ));
        }

        let mut seen = HashSet::new();
        for script in &self.scripts {
            if script.id.trim().is_empty() {
                return Err(AppError::Config("script id must not be empty".into()));
            }
            if !seen.insert(script.id.as_str()) {
                return Err(AppError::Config(format!(
                    "duplicate script id: {}",
                    script.id
                )));
            }
            if script.executable.as_os_str().is_empty() {
                return Err(AppError::Config(format!(
                    "script {} has an empty executable",
                    script.id
                )));
            }
        }

        Ok(())
    }
}
