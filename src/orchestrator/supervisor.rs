//! Process Supervisor: the public surface for starting and steering sessions.
//!
//! The supervisor owns the session table, the registry and the transcript
//! recorder. Table mutations (`start`, `prune`, `shutdown`) are serialized
//! behind one async mutex; `respond` and `cancel` only look up a session's
//! handle under the lock and then talk to the session through its channel.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use super::registry::Registry;
use super::session::{launch, wait_for_record, worst_case_stop, SessionContext, SessionHandle, SessionLaunch};
use crate::catalog::ScriptCatalog;
use crate::config::{BackgroundPolicy, HostConfig, RetentionConfig};
use crate::models::{ProcessRecord, Target};
use crate::protocol::spawner::spawn_script;
use crate::sink::HostSink;
use crate::transcript::{PruneReport, TranscriptRecorder};
use crate::{AppError, Result};

/// What a `prune` pass removed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PruneSummary {
    /// Terminal records evicted from the registry.
    pub records: Vec<ProcessRecord>,
    /// Transcript files deleted.
    pub transcripts: PruneReport,
}

struct SupervisorInner {
    catalog: Arc<dyn ScriptCatalog>,
    ctx: SessionContext,
    transcripts: TranscriptRecorder,
    retention: RetentionConfig,
    background: BackgroundPolicy,
    sessions: Mutex<HashMap<String, Arc<SessionHandle>>>,
}

/// Cloneable handle to the process supervisor.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<SupervisorInner>,
}

impl Supervisor {
    /// Build a supervisor from configuration and its collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transcript`] if the transcript directory cannot be
    /// created.
    pub fn new(
        config: &HostConfig,
        catalog: Arc<dyn ScriptCatalog>,
        sink: Arc<dyn HostSink>,
    ) -> Result<Self> {
        let transcripts = TranscriptRecorder::new(&config.transcript_dir)?;
        let ctx = SessionContext {
            registry: Registry::new(),
            sink,
            log_filter: config.log_filter(),
            config: config.session.clone(),
        };
        Ok(Self {
            inner: Arc::new(SupervisorInner {
                catalog,
                ctx,
                transcripts,
                retention: config.retention.clone(),
                background: config.policy.background,
                sessions: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Registry shared with the sessions.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.inner.ctx.registry
    }

    /// Transcript recorder.
    #[must_use]
    pub fn transcripts(&self) -> &TranscriptRecorder {
        &self.inner.transcripts
    }

    /// Script catalog.
    #[must_use]
    pub fn catalog(&self) -> &Arc<dyn ScriptCatalog> {
        &self.inner.catalog
    }

    /// Start `script_id` against `target`.
    ///
    /// The new session takes the foreground if no other session holds it.
    /// Otherwise it runs headless, or is refused under the exclusive policy.
    ///
    /// # Errors
    ///
    /// - [`AppError::NotFound`]: unknown script id.
    /// - [`AppError::InvalidTarget`]: target kind or extension rejected.
    /// - [`AppError::Busy`]: exclusive policy and another session is foreground.
    /// - [`AppError::ProcessStart`]: the executable could not be started.
    /// - [`AppError::Transcript`]: the transcript file could not be created.
    pub async fn start(&self, script_id: &str, target: Target) -> Result<String> {
        let span = info_span!("start_session", script_id);
        async {
            let mut sessions = self.inner.sessions.lock().await;
            let registry = &self.inner.ctx.registry;

            let spec = self
                .inner
                .catalog
                .lookup(script_id)
                .ok_or_else(|| AppError::NotFound(format!("script {script_id}")))?;
            spec.check_target(&target)?;

            let foreground_free = registry.foreground().is_none();
            if !foreground_free && self.inner.background == BackgroundPolicy::Exclusive {
                return Err(AppError::Busy(format!(
                    "session {} holds the foreground",
                    registry.foreground().unwrap_or_default()
                )));
            }

            let session_id = Uuid::new_v4().to_string();
            let process = spawn_script(&spec, &target, &session_id)?;
            let transcript = self.inner.transcripts.open(&session_id)?;

            let mut record = ProcessRecord::new(
                session_id.clone(),
                spec.id.clone(),
                spec.display_name(),
                target,
            );
            record.pid = process.pid;
            record.transcript_path = Some(transcript.path().to_path_buf());
            registry.insert(record);

            let interactive = foreground_free && registry.claim_foreground(&session_id);

            let handle = launch(
                self.inner.ctx.clone(),
                SessionLaunch {
                    session_id: session_id.clone(),
                    script_id: spec.id.clone(),
                    process,
                    transcript,
                    interactive,
                },
            );
            sessions.insert(session_id.clone(), Arc::new(handle));

            info!(session_id, interactive, "session registered");
            Ok(session_id)
        }
        .instrument(span)
        .await
    }

    async fn handle(&self, session_id: &str) -> Result<Arc<SessionHandle>> {
        self.inner
            .sessions
            .lock()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("session {session_id}")))
    }

    /// Answer the pending request of `session_id`.
    ///
    /// # Errors
    ///
    /// - [`AppError::NotFound`]: unknown session.
    /// - [`AppError::NoPendingRequest`]: nothing is pending; state is unchanged.
    /// - [`AppError::InvalidResponse`]: value does not fit the request.
    pub async fn respond(&self, session_id: &str, value: Value) -> Result<()> {
        let handle = self.handle(session_id).await?;
        handle.respond(value).await
    }

    /// Cancel `session_id`. Idempotent once the session is terminal.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] for an unknown session.
    pub async fn cancel(&self, session_id: &str) -> Result<()> {
        let handle = self.handle(session_id).await?;
        handle.cancel().await;
        Ok(())
    }

    /// Wait until `session_id` is terminal and return its final record.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] for an unknown (or pruned) session.
    pub async fn wait(&self, session_id: &str) -> Result<ProcessRecord> {
        let handle = self.handle(session_id).await?;
        wait_for_record(&handle, &self.inner.ctx.registry)
            .await
            .ok_or_else(|| AppError::NotFound(format!("session {session_id}")))
    }

    /// Newest-first snapshot of every tracked record.
    #[must_use]
    pub fn list(&self) -> Vec<ProcessRecord> {
        self.inner.ctx.registry.list()
    }

    /// Snapshot of one record.
    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<ProcessRecord> {
        self.inner.ctx.registry.get(session_id)
    }

    /// Session currently holding the foreground.
    #[must_use]
    pub fn foreground(&self) -> Option<String> {
        self.inner.ctx.registry.foreground()
    }

    /// Apply the retention policy to terminal records and sealed transcripts.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transcript`] if the transcript directory cannot be
    /// listed; records are pruned regardless.
    pub async fn prune(&self) -> Result<PruneSummary> {
        let mut sessions = self.inner.sessions.lock().await;
        let retention = &self.inner.retention;

        let records = self
            .inner
            .ctx
            .registry
            .prune(retention.max_records, retention.max_age_days);
        for record in &records {
            sessions.remove(&record.id);
        }

        let transcripts = self
            .inner
            .transcripts
            .prune(retention.max_transcripts, retention.transcript_max_age_days)?;

        info!(
            records = records.len(),
            transcripts = transcripts.removed.len(),
            "prune completed"
        );
        Ok(PruneSummary {
            records,
            transcripts,
        })
    }

    /// Remove every terminal record, keeping transcripts.
    pub async fn clear_finished(&self) -> Vec<ProcessRecord> {
        let mut sessions = self.inner.sessions.lock().await;
        let removed = self.inner.ctx.registry.clear_terminal();
        for record in &removed {
            sessions.remove(&record.id);
        }
        removed
    }

    /// Cancel every live session and wait for all of them to end.
    pub async fn shutdown(&self) {
        let handles: Vec<Arc<SessionHandle>> = {
            let sessions = self.inner.sessions.lock().await;
            sessions
                .values()
                .filter(|handle| !handle.state().is_terminal())
                .cloned()
                .collect()
        };
        if handles.is_empty() {
            return;
        }

        info!(count = handles.len(), "cancelling live sessions");
        for handle in &handles {
            handle.cancel().await;
        }

        let limit = worst_case_stop(&self.inner.ctx.config) * 2;
        for handle in &handles {
            if tokio::time::timeout(limit, handle.wait()).await.is_err() {
                warn!(session_id = handle.id(), "session did not stop during shutdown");
            }
        }
    }
}
