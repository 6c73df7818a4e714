//! Count/age retention for sealed transcripts.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::lock::held_elsewhere;
use super::TRANSCRIPT_EXTENSION;
use crate::{AppError, Result};

/// Outcome of a prune pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Files deleted, newest first.
    pub removed: Vec<PathBuf>,
    /// Sealed transcripts left in place.
    pub kept: usize,
    /// Open transcripts that were skipped.
    pub skipped_open: usize,
}

/// Delete sealed transcripts in `dir` beyond `max_files` or older than
/// `max_age_days`.
///
/// Transcripts are ranked newest first by modification time (the time the
/// last entry was written); ties are broken by file name, whose prefix is the
/// start timestamp. A `max_age_days` of 0 disables the age bound. Paths in
/// `open`, and files whose live lock is held by another process, are neither
/// counted nor deleted. A file that cannot be deleted is
/// logged and left behind.
///
/// # Errors
///
/// Returns [`AppError::Transcript`] if `dir` cannot be listed.
pub fn prune_transcripts(
    dir: &Path,
    max_files: usize,
    max_age_days: u32,
    open: &HashSet<PathBuf>,
) -> Result<PruneReport> {
    let listing = fs::read_dir(dir).map_err(|e| {
        AppError::Transcript(format!("failed to list {}: {e}", dir.display()))
    })?;

    let mut report = PruneReport::default();
    let mut sealed: Vec<(SystemTime, PathBuf)> = Vec::new();

    for entry in listing.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(TRANSCRIPT_EXTENSION) {
            continue;
        }
        if open.contains(&path) || held_elsewhere(&path) {
            report.skipped_open += 1;
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        sealed.push((modified, path));
    }

    sealed.sort_by(|a, b| b.cmp(a));

    let cutoff = (max_age_days > 0)
        .then(|| Utc::now() - chrono::Duration::days(i64::from(max_age_days)));

    for (index, (modified, path)) in sealed.into_iter().enumerate() {
        let too_many = index >= max_files;
        let too_old = cutoff.is_some_and(|cutoff| DateTime::<Utc>::from(modified) < cutoff);

        if !(too_many || too_old) {
            report.kept += 1;
            continue;
        }

        match fs::remove_file(&path) {
            Ok(()) => report.removed.push(path),
            Err(err) => {
                warn!(path = %path.display(), %err, "failed to delete transcript");
                report.kept += 1;
            }
        }
    }

    if !report.removed.is_empty() {
        info!(
            removed = report.removed.len(),
            kept = report.kept,
            "transcript retention applied"
        );
    }

    Ok(report)
}
