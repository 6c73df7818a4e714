//! Host sink collaborator: where session events surface to the user.
//!
//! Sessions push [`HostEvent`]s through a shared [`HostSink`]. Delivery is
//! fire-and-forget: a sink that drops or fails to render an event never
//! affects the session, and the transcript is always written first.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::models::{PendingRequest, ProcessRecord, SessionState};
use crate::protocol::message::{LogLevel, LogPayload, ProgressPayload, ResultPayload};

/// One observable event of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum HostEvent {
    /// The session moved to a new state.
    StateChanged {
        /// Session identifier.
        session_id: String,
        /// New state.
        state: SessionState,
    },
    /// A script log line that passed the level filter.
    Log {
        /// Session identifier.
        session_id: String,
        /// Log payload.
        payload: LogPayload,
    },
    /// A progress update.
    Progress {
        /// Session identifier.
        session_id: String,
        /// Progress payload.
        payload: ProgressPayload,
    },
    /// A structured result.
    Result {
        /// Session identifier.
        session_id: String,
        /// Result payload.
        payload: ResultPayload,
    },
    /// A request awaiting `respond`. Only the foreground session emits these.
    Request {
        /// Session identifier.
        session_id: String,
        /// The pending request.
        request: PendingRequest,
    },
    /// The script reported an error message.
    ScriptError {
        /// Session identifier.
        session_id: String,
        /// Error text.
        message: String,
    },
    /// The session reached a terminal state.
    Finished {
        /// Final registry record.
        record: ProcessRecord,
    },
}

impl HostEvent {
    /// Session the event belongs to.
    #[must_use]
    pub fn session_id(&self) -> &str {
        match self {
            Self::StateChanged { session_id, .. }
            | Self::Log { session_id, .. }
            | Self::Progress { session_id, .. }
            | Self::Result { session_id, .. }
            | Self::Request { session_id, .. }
            | Self::ScriptError { session_id, .. } => session_id,
            Self::Finished { record } => &record.id,
        }
    }
}

/// Receiver of session events.
pub trait HostSink: Send + Sync {
    /// Deliver one event. Must not block for long.
    fn deliver(&self, event: HostEvent);
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl HostSink for NullSink {
    fn deliver(&self, _event: HostEvent) {}
}

/// Sink forwarding events into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<HostEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver it feeds.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<HostEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl HostSink for ChannelSink {
    fn deliver(&self, event: HostEvent) {
        // A dropped receiver just means nobody is rendering any more.
        let _ = self.tx.send(event);
    }
}

/// Minimum protocol log level forwarded to the sink.
///
/// Defaults to suppressing `debug`. The transcript is never filtered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogFilter {
    min_level: LogLevel,
}

impl LogFilter {
    /// Filter passing `min_level` and above.
    #[must_use]
    pub fn new(min_level: LogLevel) -> Self {
        Self { min_level }
    }

    /// Whether a line at `level` reaches the sink.
    #[must_use]
    pub fn allows(&self, level: LogLevel) -> bool {
        level >= self.min_level
    }

    /// Configured threshold.
    #[must_use]
    pub fn min_level(&self) -> LogLevel {
        self.min_level
    }
}

impl Default for LogFilter {
    fn default() -> Self {
        Self::new(LogLevel::Info)
    }
}
