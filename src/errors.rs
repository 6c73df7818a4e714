//! Error types shared across the host.

use std::fmt::{Display, Formatter};

/// Shared host result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Host error enumeration covering all caller-visible failure modes.
///
/// Failures that happen *inside* a running session never surface here; they
/// drive the session to its `Error` state and are described by
/// [`SessionFailure`](crate::models::session::SessionFailure) instead.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Malformed or unrecognized FSCP message.
    Protocol(String),
    /// Script executable missing, not permitted, or working directory invalid.
    ProcessStart(String),
    /// Selected target does not satisfy the script's declared requirement.
    InvalidTarget(String),
    /// Requested session or script does not exist.
    NotFound(String),
    /// A response was supplied but the session has no pending request.
    NoPendingRequest(String),
    /// The response value does not fit the pending request.
    InvalidResponse(String),
    /// Another session already holds the foreground role.
    Busy(String),
    /// Transcript file could not be written, sealed, or pruned.
    Transcript(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::ProcessStart(msg) => write!(f, "process start: {msg}"),
            Self::InvalidTarget(msg) => write!(f, "invalid target: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::NoPendingRequest(msg) => write!(f, "no pending request: {msg}"),
            Self::InvalidResponse(msg) => write!(f, "invalid response: {msg}"),
            Self::Busy(msg) => write!(f, "busy: {msg}"),
            Self::Transcript(msg) => write!(f, "transcript: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
