//! Per-session JSONL transcript writer.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tracing::{debug, warn};

use super::lock::LiveLock;
use super::retention::{prune_transcripts, PruneReport};
use super::{Direction, TranscriptEntry, FILE_TIMESTAMP_FORMAT, TRANSCRIPT_EXTENSION};
use crate::protocol::message::Message;
use crate::{AppError, Result};

type OpenSet = Arc<Mutex<HashSet<PathBuf>>>;

/// Owns the transcript directory and tracks which files are still open.
#[derive(Debug, Clone)]
pub struct TranscriptRecorder {
    dir: PathBuf,
    open: OpenSet,
}

impl TranscriptRecorder {
    /// Recorder writing into `dir`, created with its parents if missing.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transcript`] if the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            AppError::Transcript(format!(
                "failed to create transcript directory {}: {e}",
                dir.display()
            ))
        })?;
        Ok(Self {
            dir,
            open: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    /// Transcript directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the transcript file of `session_id`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transcript`] if the file cannot be created.
    pub fn open(&self, session_id: &str) -> Result<TranscriptHandle> {
        let stamp = Utc::now().format(FILE_TIMESTAMP_FORMAT);
        let path = self
            .dir
            .join(format!("{stamp}_{session_id}.{TRANSCRIPT_EXTENSION}"));

        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                AppError::Transcript(format!("failed to create {}: {e}", path.display()))
            })?;

        self.open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.clone());
        let live = LiveLock::acquire(&path);
        debug!(session_id, path = %path.display(), "transcript opened");

        Ok(TranscriptHandle {
            session_id: session_id.to_owned(),
            path,
            writer: Some(BufWriter::new(file)),
            next_seq: 0,
            open: Arc::clone(&self.open),
            live,
        })
    }

    /// Whether `path` belongs to a transcript that has not been sealed.
    #[must_use]
    pub fn is_open(&self, path: &Path) -> bool {
        self.open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(path)
    }

    /// Delete the oldest sealed transcripts beyond `max_files` or older than
    /// `max_age_days` (0 disables the age bound). Open transcripts are
    /// skipped, including those held open by another host process.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transcript`] if the directory cannot be listed.
    pub fn prune(&self, max_files: usize, max_age_days: u32) -> Result<PruneReport> {
        let open = self
            .open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        prune_transcripts(&self.dir, max_files, max_age_days, &open)
    }
}

/// Append-only handle to one session's transcript.
///
/// Every append is flushed before it returns. After [`seal`](Self::seal) no
/// further writes are accepted. Dropping an unsealed handle seals it.
#[derive(Debug)]
pub struct TranscriptHandle {
    session_id: String,
    path: PathBuf,
    writer: Option<BufWriter<fs::File>>,
    next_seq: u64,
    open: OpenSet,
    live: Option<LiveLock>,
}

impl TranscriptHandle {
    /// Path of the transcript file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the transcript has been sealed.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.writer.is_none()
    }

    /// Number of entries written so far.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.next_seq
    }

    /// Whether nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.next_seq == 0
    }

    /// Append a message.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transcript`] if the handle is sealed or the write fails.
    pub fn append(&mut self, direction: Direction, message: &Message) -> Result<u64> {
        self.write_entry(direction, Some(message.clone()), None, None)
    }

    /// Append a record the decoder rejected.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transcript`] if the handle is sealed or the write fails.
    pub fn append_malformed(&mut self, raw: &str, error: &str) -> Result<u64> {
        self.write_entry(
            Direction::In,
            None,
            Some(raw.to_owned()),
            Some(error.to_owned()),
        )
    }

    fn write_entry(
        &mut self,
        direction: Direction,
        message: Option<Message>,
        raw: Option<String>,
        error: Option<String>,
    ) -> Result<u64> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(AppError::Transcript(format!(
                "transcript {} is sealed",
                self.path.display()
            )));
        };

        let seq = self.next_seq;
        let entry = TranscriptEntry {
            seq,
            timestamp: Utc::now(),
            direction,
            message,
            raw,
            error,
        };
        let line = serde_json::to_string(&entry)
            .map_err(|e| AppError::Transcript(format!("failed to serialize entry: {e}")))?;

        writeln!(writer, "{line}")
            .and_then(|()| writer.flush())
            .map_err(|e| {
                warn!(session_id = %self.session_id, "transcript write failed: {e}");
                AppError::Transcript(format!("write to {} failed: {e}", self.path.display()))
            })?;

        self.next_seq += 1;
        Ok(seq)
    }

    /// Flush, sync and close the file. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transcript`] if the final flush fails. The handle
    /// is sealed regardless.
    pub fn seal(&mut self) -> Result<()> {
        let Some(mut writer) = self.writer.take() else {
            return Ok(());
        };

        self.open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.path);

        let synced = writer
            .flush()
            .and_then(|()| writer.get_ref().sync_all())
            .map_err(|e| {
                AppError::Transcript(format!("failed to seal {}: {e}", self.path.display()))
            });
        self.live = None;
        debug!(session_id = %self.session_id, entries = self.next_seq, "transcript sealed");
        synced
    }
}

impl Drop for TranscriptHandle {
    fn drop(&mut self) {
        if let Err(err) = self.seal() {
            warn!(session_id = %self.session_id, %err, "transcript seal on drop failed");
        }
    }
}
