//! Transcript Recorder.
//!
//! Every session gets one append-only JSONL file in the transcript directory,
//! named `<start timestamp>_<session id>.jsonl`. Each line is one
//! [`TranscriptEntry`]: a sequence number, a timestamp, the direction, and
//! either the decoded [`Message`] or the raw text of a record that could not
//! be decoded.
//!
//! Files are created by [`TranscriptRecorder::open`], appended to through
//! [`TranscriptHandle::append`], and sealed when the session ends. Retention
//! ([`retention::prune_transcripts`]) never touches an unsealed file.

mod lock;
pub mod retention;
pub mod writer;

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::message::Message;
use crate::{AppError, Result};

pub use retention::{prune_transcripts, PruneReport};
pub use writer::{TranscriptHandle, TranscriptRecorder};

/// File extension of transcript files.
pub const TRANSCRIPT_EXTENSION: &str = "jsonl";

/// `strftime` layout of the timestamp prefix in transcript file names.
pub const FILE_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Who produced a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Read from the script's stdout.
    In,
    /// Written to the script's stdin.
    Out,
    /// Synthesized by the host (implicit `done`, host-detected failures).
    Host,
}

/// One line of a transcript file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    /// Position in the session's transcript, starting at 0.
    pub seq: u64,
    /// When the entry was recorded.
    pub timestamp: DateTime<Utc>,
    /// Producer.
    pub direction: Direction,
    /// Decoded message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    /// Raw text of an undecodable record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
    /// Decoder error for `raw`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Read every entry of a transcript file.
///
/// # Errors
///
/// Returns [`AppError::Transcript`] if the file cannot be read or a line is
/// not a valid entry.
pub fn read_transcript(path: &Path) -> Result<Vec<TranscriptEntry>> {
    let file = fs::File::open(path).map_err(|e| {
        AppError::Transcript(format!("failed to open {}: {e}", path.display()))
    })?;

    let mut entries = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| {
            AppError::Transcript(format!("failed to read {}: {e}", path.display()))
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let entry = serde_json::from_str(&line).map_err(|e| {
            AppError::Transcript(format!(
                "invalid entry at {}:{}: {e}",
                path.display(),
                index + 1
            ))
        })?;
        entries.push(entry);
    }
    Ok(entries)
}
