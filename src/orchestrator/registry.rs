//! Process registry: the table of [`ProcessRecord`]s and foreground ownership.
//!
//! Records are inserted and removed only by the supervisor. Each live session
//! is the single writer of its own record, updating it in the same step as
//! its own state so the two never diverge.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::models::{PendingRequest, ProcessRecord, SessionState, Termination};

#[derive(Debug)]
struct Slot {
    seq: u64,
    record: ProcessRecord,
}

#[derive(Debug, Default)]
struct RegistryState {
    slots: HashMap<String, Slot>,
    next_seq: u64,
    foreground: Option<String>,
}

/// Shared, internally synchronized record table.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    inner: Arc<Mutex<RegistryState>>,
}

impl Registry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track a new record.
    pub fn insert(&self, record: ProcessRecord) {
        let mut state = self.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.slots.insert(record.id.clone(), Slot { seq, record });
    }

    /// Snapshot of one record.
    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<ProcessRecord> {
        self.lock()
            .slots
            .get(session_id)
            .map(|slot| slot.record.clone())
    }

    /// Snapshot of every record, newest first.
    #[must_use]
    pub fn list(&self) -> Vec<ProcessRecord> {
        let state = self.lock();
        let mut slots: Vec<&Slot> = state.slots.values().collect();
        slots.sort_by(|a, b| b.seq.cmp(&a.seq));
        slots.into_iter().map(|slot| slot.record.clone()).collect()
    }

    /// Ids of sessions that have not reached a terminal state.
    #[must_use]
    pub fn live_ids(&self) -> Vec<String> {
        self.lock()
            .slots
            .values()
            .filter(|slot| !slot.record.is_terminal())
            .map(|slot| slot.record.id.clone())
            .collect()
    }

    /// Number of tracked records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    /// Whether no records are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply a non-terminal transition and the matching pending request.
    ///
    /// Returns `false` (and changes nothing) if the record is unknown or the
    /// transition is not permitted from its current state.
    pub fn transition(
        &self,
        session_id: &str,
        next: SessionState,
        pending: Option<PendingRequest>,
    ) -> bool {
        let mut state = self.lock();
        let Some(slot) = state.slots.get_mut(session_id) else {
            return false;
        };
        let record = &mut slot.record;
        if !record.state.can_transition_to(next) {
            debug!(session_id, from = ?record.state, to = ?next, "rejected record transition");
            return false;
        }
        record.state = next;
        record.pending = pending;
        true
    }

    /// Move a record to its terminal state and release the foreground if it
    /// held it. Returns the final record.
    pub fn finish(
        &self,
        session_id: &str,
        termination: Termination,
        exit_code: Option<i32>,
        detail: Option<String>,
    ) -> Option<ProcessRecord> {
        let mut state = self.lock();
        if state.foreground.as_deref() == Some(session_id) {
            state.foreground = None;
        }
        let slot = state.slots.get_mut(session_id)?;
        let record = &mut slot.record;
        let next = termination.state();
        if !record.state.can_transition_to(next) {
            return Some(record.clone());
        }
        record.state = next;
        record.pending = None;
        record.end_time = Some(Utc::now());
        record.exit_code = exit_code;
        record.detail = detail.or_else(|| Some(termination.detail()));
        record.termination = Some(termination);
        Some(record.clone())
    }

    /// Current foreground session, if any.
    #[must_use]
    pub fn foreground(&self) -> Option<String> {
        self.lock().foreground.clone()
    }

    /// Whether `session_id` holds the foreground.
    #[must_use]
    pub fn is_foreground(&self, session_id: &str) -> bool {
        self.lock().foreground.as_deref() == Some(session_id)
    }

    /// Give the foreground to `session_id` if it is free.
    pub fn claim_foreground(&self, session_id: &str) -> bool {
        let mut state = self.lock();
        if state.foreground.is_some() {
            return false;
        }
        state.foreground = Some(session_id.to_owned());
        true
    }

    /// Remove every terminal record. Returns them newest first.
    pub fn clear_terminal(&self) -> Vec<ProcessRecord> {
        self.prune_with(|_, _| true)
    }

    /// Evict terminal records oldest first until at most `max_records` remain
    /// and none ended more than `max_age_days` ago (0 disables the age bound).
    /// Live records are never removed and do not count toward the cap.
    pub fn prune(&self, max_records: usize, max_age_days: u32) -> Vec<ProcessRecord> {
        let cutoff: Option<DateTime<Utc>> = (max_age_days > 0)
            .then(|| Utc::now() - chrono::Duration::days(i64::from(max_age_days)));
        self.prune_with(|rank, record| {
            rank >= max_records || cutoff.is_some_and(|cutoff| record.reference_time() < cutoff)
        })
    }

    /// `evict(rank, record)` is called for terminal records, newest first
    /// (rank 0 is the newest).
    fn prune_with(&self, evict: impl Fn(usize, &ProcessRecord) -> bool) -> Vec<ProcessRecord> {
        let mut state = self.lock();
        let mut terminal: Vec<(u64, String)> = state
            .slots
            .values()
            .filter(|slot| slot.record.is_terminal())
            .map(|slot| (slot.seq, slot.record.id.clone()))
            .collect();
        terminal.sort_by(|a, b| b.0.cmp(&a.0));

        let doomed: Vec<String> = terminal
            .into_iter()
            .enumerate()
            .filter(|(rank, (_, id))| {
                state
                    .slots
                    .get(id)
                    .is_some_and(|slot| evict(*rank, &slot.record))
            })
            .map(|(_, (_, id))| id)
            .collect();

        doomed
            .iter()
            .filter_map(|id| state.slots.remove(id).map(|slot| slot.record))
            .collect()
    }
}
