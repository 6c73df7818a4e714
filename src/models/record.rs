//! Process registry record.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::session::{PendingRequest, SessionState, Termination};
use super::target::{shorten_path, Target};

/// Registry entry describing one script session, live or finished.
///
/// Owned by the registry; callers only ever receive clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRecord {
    /// Session identifier (UUID v4).
    pub id: String,
    /// Catalog id of the script.
    pub script_id: String,
    /// Display name of the script.
    pub script_name: String,
    /// Invocation target.
    pub target: Target,
    /// OS process id, once known.
    pub pid: Option<u32>,
    /// Current lifecycle state.
    pub state: SessionState,
    /// When the session was started.
    pub start_time: DateTime<Utc>,
    /// When the session reached a terminal state.
    pub end_time: Option<DateTime<Utc>>,
    /// Exit status of the child, when it exited with one.
    pub exit_code: Option<i32>,
    /// Terminal outcome.
    pub termination: Option<Termination>,
    /// Human readable description of the outcome; may carry a stderr tail.
    pub detail: Option<String>,
    /// Outstanding request, only while `state` is `WaitingForInput`.
    pub pending: Option<PendingRequest>,
    /// Transcript file of the session.
    pub transcript_path: Option<PathBuf>,
}

impl ProcessRecord {
    /// Fresh record in `Starting`.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        script_id: impl Into<String>,
        script_name: impl Into<String>,
        target: Target,
    ) -> Self {
        Self {
            id: id.into(),
            script_id: script_id.into(),
            script_name: script_name.into(),
            target,
            pid: None,
            state: SessionState::Starting,
            start_time: Utc::now(),
            end_time: None,
            exit_code: None,
            termination: None,
            detail: None,
            pending: None,
            transcript_path: None,
        }
    }

    /// Whether the session has ended.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Listing label: `"<name> · pid <pid> · <State>"`.
    #[must_use]
    pub fn label(&self) -> String {
        let pid = self
            .pid
            .map_or_else(|| "?".to_owned(), |pid| pid.to_string());
        format!("{} · pid {pid} · {}", self.script_name, self.state.label())
    }

    /// Shortened target path for listings.
    #[must_use]
    pub fn target_label(&self) -> String {
        shorten_path(&self.target.path)
    }

    /// Reference time for retention: end time for finished sessions.
    #[must_use]
    pub fn reference_time(&self) -> DateTime<Utc> {
        self.end_time.unwrap_or(self.start_time)
    }
}
