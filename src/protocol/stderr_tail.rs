//! Bounded capture of a script's stderr.
//!
//! Stderr is not part of the protocol. It is drained continuously (so a
//! chatty child never blocks on a full pipe), traced at `debug`, and the most
//! recent lines are kept for failure reports.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::debug;

/// Lines kept by default.
pub const DEFAULT_MAX_LINES: usize = 20;

/// Approximate byte budget kept by default.
pub const DEFAULT_MAX_BYTES: usize = 4 * 1024;

#[derive(Debug, Default)]
struct TailState {
    lines: VecDeque<String>,
    bytes: usize,
}

/// Ring buffer holding the last lines a child wrote to stderr.
#[derive(Debug, Clone)]
pub struct StderrTail {
    state: Arc<Mutex<TailState>>,
    max_lines: usize,
    max_bytes: usize,
}

impl Default for StderrTail {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINES, DEFAULT_MAX_BYTES)
    }
}

impl StderrTail {
    /// Create an empty tail with the given limits.
    #[must_use]
    pub fn new(max_lines: usize, max_bytes: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(TailState::default())),
            max_lines: max_lines.max(1),
            max_bytes,
        }
    }

    /// Append a line, evicting the oldest ones past either limit.
    pub fn push_line(&self, line: String) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        while !state.lines.is_empty()
            && (state.lines.len() >= self.max_lines || state.bytes + line.len() > self.max_bytes)
        {
            if let Some(old) = state.lines.pop_front() {
                state.bytes = state.bytes.saturating_sub(old.len());
            }
        }

        state.bytes += line.len();
        state.lines.push_back(line);
    }

    /// Buffered lines joined with `\n`; `None` when nothing was captured.
    #[must_use]
    pub fn contents(&self) -> Option<String> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.lines.is_empty() {
            None
        } else {
            Some(state.lines.iter().cloned().collect::<Vec<_>>().join("\n"))
        }
    }

    /// Number of buffered lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .lines
            .len()
    }

    /// Whether nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drain `stderr` into `tail` on a background task until EOF.
pub fn spawn_stderr_drain<R>(session_id: String, stderr: R, tail: StderrTail) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    debug!(session_id, line = %line, "script stderr");
                    tail.push_line(line);
                }
                Ok(None) => break,
                Err(err) => {
                    debug!(session_id, %err, "script stderr closed with error");
                    break;
                }
            }
        }
    })
}
