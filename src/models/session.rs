//! Session lifecycle states, terminal outcomes, and pending requests.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::message::Message;
use crate::{AppError, Result};

/// Lifecycle state of a script session.
///
/// `Finished`, `Canceled` and `Error` are terminal: no transition leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Process spawned, session task not yet running.
    Starting,
    /// Streaming child output.
    Running,
    /// A request is pending; child output is held until it is answered.
    WaitingForInput,
    /// Child reported success and exited cleanly.
    Finished,
    /// Host canceled the session.
    Canceled,
    /// Session failed.
    Error,
}

impl SessionState {
    /// Whether this state is a sink.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Canceled | Self::Error)
    }

    /// Friendly label for process listings.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Starting => "Starting",
            Self::Running => "Running",
            Self::WaitingForInput => "Waiting for input",
            Self::Finished => "Finished",
            Self::Canceled => "Canceled",
            Self::Error => "Error",
        }
    }

    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (
                Self::Starting,
                Self::Running | Self::Finished | Self::Canceled | Self::Error
            ) | (
                Self::Running,
                Self::WaitingForInput | Self::Finished | Self::Canceled | Self::Error
            ) | (
                Self::WaitingForInput,
                Self::Running | Self::Canceled | Self::Error
            )
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Why a session ended in `Error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "cause", content = "detail")]
pub enum SessionFailure {
    /// Malformed record or protocol violation on the child's stream.
    Protocol(String),
    /// Non-zero exit (or death by signal) without a preceding `error` message.
    SubprocessExit {
        /// Exit code, absent when the child was killed by a signal.
        code: Option<i32>,
    },
    /// The script sent an `error` message.
    ScriptError(String),
    /// A pending request outlived its deadline.
    Timeout {
        /// Correlation id of the expired request.
        request_id: String,
    },
    /// A headless session issued a request nobody can answer.
    NoInteractiveConsumer {
        /// Correlation id of the unanswerable request.
        request_id: String,
    },
    /// The child's stdio failed underneath the protocol.
    Transport(String),
}

impl fmt::Display for SessionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Self::SubprocessExit { code: Some(code) } => {
                write!(f, "script exited with status {code}")
            }
            Self::SubprocessExit { code: None } => f.write_str("script terminated by signal"),
            Self::ScriptError(msg) => write!(f, "script error: {msg}"),
            Self::Timeout { request_id } => {
                write!(f, "request {request_id} timed out waiting for a response")
            }
            Self::NoInteractiveConsumer { request_id } => write!(
                f,
                "request {request_id} issued by a background session with no interactive consumer"
            ),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
        }
    }
}

/// Terminal outcome of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum Termination {
    /// Child reported success and exited with status 0.
    Finished {
        /// Exit code (always 0).
        exit_code: i32,
    },
    /// Host canceled the session.
    Canceled {
        /// `true` when the child ignored the cooperative signal and was killed.
        forced: bool,
    },
    /// Session failed.
    Failed {
        /// Failure cause.
        failure: SessionFailure,
    },
}

impl Termination {
    /// Terminal state this outcome projects to.
    #[must_use]
    pub fn state(&self) -> SessionState {
        match self {
            Self::Finished { .. } => SessionState::Finished,
            Self::Canceled { .. } => SessionState::Canceled,
            Self::Failed { .. } => SessionState::Error,
        }
    }

    /// One-line human readable description.
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::Finished { exit_code } => format!("exit {exit_code}"),
            Self::Canceled { forced: true } => "forced".into(),
            Self::Canceled { forced: false } => "voluntary".into(),
            Self::Failed { failure } => failure.to_string(),
        }
    }
}

/// Shape of a pending request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum RequestKind {
    /// Free-text input; answered with a string.
    Input {
        /// Pre-filled value.
        default: Option<String>,
        /// Whether input should be masked.
        secret: bool,
        /// Completion suggestions.
        suggestions: Vec<String>,
    },
    /// Yes/no confirmation; answered with a bool.
    Confirm {
        /// Pre-selected answer.
        default: Option<bool>,
    },
}

/// The single outstanding request of a session.
///
/// Refers to its session only by id value, never by reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequest {
    /// Correlation id the response must carry.
    pub id: String,
    /// Prompt text.
    pub prompt: String,
    /// Input or confirm.
    pub kind: RequestKind,
    /// Wall-clock deadline, when a request timeout is configured.
    pub deadline: Option<DateTime<Utc>>,
}

impl PendingRequest {
    /// Build a pending request from a `request_*` message.
    ///
    /// Returns `None` for any other message kind.
    #[must_use]
    pub fn from_message(message: &Message, deadline: Option<DateTime<Utc>>) -> Option<Self> {
        match message {
            Message::RequestInput { id, request } => Some(Self {
                id: id.clone(),
                prompt: request.prompt.clone(),
                kind: RequestKind::Input {
                    default: request.default.clone(),
                    secret: request.secret,
                    suggestions: request.suggestions.clone(),
                },
                deadline,
            }),
            Message::RequestConfirm { id, request } => Some(Self {
                id: id.clone(),
                prompt: request.prompt.clone(),
                kind: RequestKind::Confirm {
                    default: request.default,
                },
                deadline,
            }),
            _ => None,
        }
    }

    /// Whether this is a confirmation request.
    #[must_use]
    pub fn is_confirm(&self) -> bool {
        matches!(self.kind, RequestKind::Confirm { .. })
    }

    /// Check that `value` is an acceptable answer.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidResponse`] when a confirmation is answered
    /// with anything but a bool, or an input request with anything but a string.
    pub fn check_response(&self, value: &Value) -> Result<()> {
        match (&self.kind, value) {
            (RequestKind::Confirm { .. }, Value::Bool(_))
            | (RequestKind::Input { .. }, Value::String(_)) => Ok(()),
            (RequestKind::Confirm { .. }, other) => Err(AppError::InvalidResponse(format!(
                "request {} expects a boolean, got {other}",
                self.id
            ))),
            (RequestKind::Input { .. }, other) => Err(AppError::InvalidResponse(format!(
                "request {} expects a string, got {other}",
                self.id
            ))),
        }
    }
}
