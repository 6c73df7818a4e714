//! Advisory lock marking a transcript as live.
//!
//! The open set in [`TranscriptRecorder`](super::TranscriptRecorder) only
//! covers one host process. A live transcript also holds a non-blocking
//! exclusive `flock`, so a `prune` running in another process can tell it
//! apart from a sealed one. The lock is released when the handle is sealed.

use std::fs::File;
use std::path::Path;

#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::fcntl::{Flock, FlockArg};
#[cfg(unix)]
use tracing::warn;

/// Exclusive lock held for the lifetime of an unsealed transcript.
pub(crate) struct LiveLock {
    #[cfg(unix)]
    _lock: Flock<File>,
    #[cfg(not(unix))]
    _file: File,
}

impl std::fmt::Debug for LiveLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveLock").finish_non_exhaustive()
    }
}

impl LiveLock {
    /// Lock `path`. Returns `None` when the lock cannot be taken; the
    /// transcript is still written, only without cross-process protection.
    #[cfg(unix)]
    pub(crate) fn acquire(path: &Path) -> Option<Self> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) => {
                warn!(path = %path.display(), %err, "transcript lock: open failed");
                return None;
            }
        };
        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => Some(Self { _lock: lock }),
            Err((_, errno)) => {
                warn!(path = %path.display(), %errno, "transcript lock: flock failed");
                None
            }
        }
    }

    #[cfg(not(unix))]
    pub(crate) fn acquire(path: &Path) -> Option<Self> {
        File::open(path).ok().map(|file| Self { _file: file })
    }
}

/// Whether another open file description holds the live lock on `path`.
#[cfg(unix)]
pub(crate) fn held_elsewhere(path: &Path) -> bool {
    let Ok(file) = File::open(path) else {
        return false;
    };
    match Flock::lock(file, FlockArg::LockSharedNonblock) {
        Ok(_shared) => false,
        Err((_, errno)) => errno == Errno::EWOULDBLOCK,
    }
}

#[cfg(not(unix))]
pub(crate) fn held_elsewhere(_path: &Path) -> bool {
    false
}
