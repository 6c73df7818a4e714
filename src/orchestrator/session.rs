//! Script Session: the state machine driving one script process.
//!
//! Each session runs as its own task and exclusively owns the child process,
//! its transcript handle, and the receiving ends of the reader and command
//! channels. The supervisor talks to it only through a [`SessionHandle`].
//!
//! The loop multiplexes these sources with `tokio::select!`:
//!
//! - host commands (`respond`, `cancel`);
//! - decoded child output from the reader task, held back while a request is
//!   pending so messages behind it stay queued in order;
//! - child exit;
//! - the pending request deadline;
//! - the exit grace deadline, armed by `done`, `error`, `cancel` or a
//!   host-detected failure, after which the child is killed.
//!
//! After the child exits, stdout keeps being read until EOF or until it has
//! been idle for the drain window (grandchildren may hold the pipe open).
//!
//! Every inbound message is appended to the transcript before it reaches the
//! sink; every host-originated message is appended before it is queued for
//! the child.

use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::registry::Registry;
use crate::config::SessionConfig;
use crate::models::{PendingRequest, ProcessRecord, SessionFailure, SessionState, Termination};
use crate::protocol::message::{Endpoint, Message};
use crate::protocol::reader::{run_reader, Inbound};
use crate::protocol::spawner::{request_termination, ScriptProcess};
use crate::protocol::stderr_tail::{spawn_stderr_drain, StderrTail};
use crate::protocol::writer::run_writer;
use crate::sink::{HostEvent, HostSink, LogFilter};
use crate::transcript::{Direction, TranscriptHandle};
use crate::{AppError, Result};

const INBOUND_CAPACITY: usize = 64;
const OUTBOUND_CAPACITY: usize = 8;
const COMMAND_CAPACITY: usize = 8;

/// Host → session commands.
#[derive(Debug)]
pub(crate) enum SessionCommand {
    Respond {
        value: Value,
        reply: oneshot::Sender<Result<()>>,
    },
    Cancel,
}

/// Collaborators shared by every session of a supervisor.
#[derive(Clone)]
pub struct SessionContext {
    /// Process record table.
    pub registry: Registry,
    /// Event sink.
    pub sink: Arc<dyn HostSink>,
    /// Script log filter applied before the sink.
    pub log_filter: LogFilter,
    /// Timing.
    pub config: SessionConfig,
}

/// Everything needed to start driving a freshly spawned script.
pub(crate) struct SessionLaunch {
    pub session_id: String,
    pub script_id: String,
    pub process: ScriptProcess,
    pub transcript: TranscriptHandle,
    pub interactive: bool,
}

/// Non-owning handle to a running session.
#[derive(Debug)]
pub struct SessionHandle {
    id: String,
    commands: mpsc::Sender<SessionCommand>,
    state: watch::Receiver<SessionState>,
}

impl SessionHandle {
    /// Session identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Latest published state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Answer the pending request.
    ///
    /// # Errors
    ///
    /// - [`AppError::NoPendingRequest`] if nothing is pending or the session ended.
    /// - [`AppError::InvalidResponse`] if the value does not fit the request.
    /// - [`AppError::Io`] if the child's stdin is gone.
    pub(crate) async fn respond(&self, value: Value) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(SessionCommand::Respond { value, reply })
            .await
            .map_err(|_| self.ended())?;
        rx.await.map_err(|_| self.ended())?
    }

    /// Request cancellation. A no-op once the session has ended.
    pub(crate) async fn cancel(&self) {
        if self.commands.send(SessionCommand::Cancel).await.is_err() {
            debug!(session_id = %self.id, "cancel ignored: session already ended");
        }
    }

    /// Resolve once the session has published a terminal state.
    pub async fn wait(&self) -> SessionState {
        let mut rx = self.state.clone();
        let done = rx.wait_for(|state| state.is_terminal()).await.map(|state| *state);
        match done {
            Ok(state) => state,
            Err(_) => *rx.borrow(),
        }
    }

    fn ended(&self) -> AppError {
        AppError::NoPendingRequest(format!("session {} has ended", self.id))
    }
}

/// Spawn the I/O tasks and the session task for `launch`.
pub(crate) fn launch(ctx: SessionContext, launch: SessionLaunch) -> SessionHandle {
    let SessionLaunch {
        session_id,
        script_id,
        process,
        transcript,
        interactive,
    } = launch;
    let ScriptProcess {
        child,
        pid,
        stdin,
        stdout,
        stderr,
    } = process;

    let io_cancel = CancellationToken::new();
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
    let (state_tx, state_rx) = watch::channel(SessionState::Starting);

    let reader_id = session_id.clone();
    let reader_cancel = io_cancel.child_token();
    tokio::spawn(async move {
        if let Err(err) = run_reader(reader_id.clone(), stdout, inbound_tx, reader_cancel).await {
            debug!(session_id = %reader_id, %err, "reader task ended with error");
        }
    });

    let writer_id = session_id.clone();
    let writer_cancel = io_cancel.child_token();
    tokio::spawn(async move {
        if let Err(err) = run_writer(writer_id.clone(), stdin, outbound_rx, writer_cancel).await {
            debug!(session_id = %writer_id, %err, "writer task ended with error");
        }
    });

    let stderr_tail = StderrTail::default();
    let stderr_task = spawn_stderr_drain(session_id.clone(), stderr, stderr_tail.clone());

    let span = info_span!("session", session_id = %session_id, script_id = %script_id);
    let session = ScriptSession {
        id: session_id.clone(),
        ctx,
        child,
        pid,
        interactive,
        state: SessionState::Starting,
        pending: None,
        pending_deadline: None,
        transcript,
        outbound: outbound_tx,
        inbound: inbound_rx,
        inbound_open: true,
        commands: command_rx,
        commands_open: true,
        state_tx,
        io_cancel,
        stderr_tail,
        stderr_task: Some(stderr_task),
        done_code: None,
        script_error: None,
        failure: None,
        cancel_requested: false,
        forced: false,
        killed: false,
        abandoned: false,
        exit_status: None,
        exit_deadline: None,
        drain_deadline: None,
    };
    tokio::spawn(session.run().instrument(span));

    SessionHandle {
        id: session_id,
        commands: command_tx,
        state: state_rx,
    }
}

enum Wake {
    Command(Option<SessionCommand>),
    RequestExpired,
    Inbound(Option<Inbound>),
    Exited(std::io::Result<ExitStatus>),
    GraceElapsed,
    DrainElapsed,
}

struct ScriptSession {
    id: String,
    ctx: SessionContext,
    child: Child,
    pid: Option<u32>,
    interactive: bool,
    state: SessionState,
    pending: Option<PendingRequest>,
    pending_deadline: Option<Instant>,
    transcript: TranscriptHandle,
    outbound: mpsc::Sender<Message>,
    inbound: mpsc::Receiver<Inbound>,
    inbound_open: bool,
    commands: mpsc::Receiver<SessionCommand>,
    commands_open: bool,
    state_tx: watch::Sender<SessionState>,
    io_cancel: CancellationToken,
    stderr_tail: StderrTail,
    stderr_task: Option<JoinHandle<()>>,

    done_code: Option<i32>,
    script_error: Option<String>,
    failure: Option<SessionFailure>,
    cancel_requested: bool,
    forced: bool,
    killed: bool,
    abandoned: bool,
    exit_status: Option<ExitStatus>,
    exit_deadline: Option<Instant>,
    drain_deadline: Option<Instant>,
}

impl ScriptSession {
    async fn run(mut self) {
        info!(pid = ?self.pid, interactive = self.interactive, "session started");
        self.enter(SessionState::Running);

        while !self.concluded() {
            let wake = self.next_wake().await;
            self.handle(wake);
        }

        let termination = self.resolve();
        self.finalize(termination).await;
    }

    fn concluded(&self) -> bool {
        (self.exit_status.is_some() || self.abandoned) && !self.inbound_open
    }

    fn stopping(&self) -> bool {
        self.cancel_requested || self.failure.is_some()
    }

    async fn next_wake(&mut self) -> Wake {
        let read_inbound = self.inbound_open
            && (self.pending.is_none() || self.exit_status.is_some() || self.cancel_requested);
        let waiting_exit = self.exit_status.is_none() && !self.abandoned;
        let pending_deadline = self.pending_deadline.filter(|_| !self.stopping());
        let exit_deadline = self.exit_deadline.filter(|_| waiting_exit);
        let drain_deadline = self.drain_deadline;

        tokio::select! {
            biased;

            cmd = self.commands.recv(), if self.commands_open => Wake::Command(cmd),

            () = sleep_until_opt(pending_deadline), if pending_deadline.is_some() => Wake::RequestExpired,

            status = self.child.wait(), if waiting_exit => Wake::Exited(status),

            () = sleep_until_opt(exit_deadline), if exit_deadline.is_some() => Wake::GraceElapsed,

            item = self.inbound.recv(), if read_inbound => Wake::Inbound(item),

            () = sleep_until_opt(drain_deadline), if drain_deadline.is_some() => Wake::DrainElapsed,
        }
    }

    fn handle(&mut self, wake: Wake) {
        match wake {
            Wake::Command(Some(SessionCommand::Respond { value, reply })) => {
                let outcome = self.respond(value);
                if reply.send(outcome).is_err() {
                    debug!("respond caller went away");
                }
            }
            Wake::Command(Some(SessionCommand::Cancel)) => self.begin_cancel(),
            Wake::Command(None) => {
                self.commands_open = false;
                self.begin_cancel();
            }
            Wake::RequestExpired => {
                self.pending_deadline = None;
                if let Some(request_id) = self.pending.as_ref().map(|p| p.id.clone()) {
                    warn!(request_id, "pending request timed out");
                    self.fail(SessionFailure::Timeout { request_id });
                }
            }
            Wake::Exited(Ok(status)) => {
                debug!(?status, "script process exited");
                self.exit_status = Some(status);
                self.exit_deadline = None;
                self.pending_deadline = None;
                if self.inbound_open {
                    self.drain_deadline = Some(Instant::now() + self.ctx.config.drain());
                }
            }
            Wake::Exited(Err(err)) => {
                warn!(%err, "waiting for script process failed");
                self.fail(SessionFailure::Transport(format!("wait failed: {err}")));
                self.abandoned = true;
            }
            Wake::GraceElapsed => self.grace_elapsed(),
            Wake::Inbound(None) => {
                debug!("script stdout closed");
                self.inbound_open = false;
                self.drain_deadline = None;
            }
            Wake::Inbound(Some(inbound)) => {
                if self.drain_deadline.is_some() {
                    self.drain_deadline = Some(Instant::now() + self.ctx.config.drain());
                }
                self.on_inbound(inbound);
            }
            Wake::DrainElapsed => {
                debug!("stdout drain window elapsed");
                self.inbound_open = false;
                self.drain_deadline = None;
            }
        }
    }

    // ── State ──────────────────────────────────────────────────────────────

    fn enter(&mut self, next: SessionState) {
        if self.state == next || !self.state.can_transition_to(next) {
            return;
        }
        debug!(from = ?self.state, to = ?next, "session state change");
        self.state = next;
        self.ctx
            .registry
            .transition(&self.id, next, self.pending.clone());
        self.state_tx.send_replace(next);
        self.ctx.sink.deliver(HostEvent::StateChanged {
            session_id: self.id.clone(),
            state: next,
        });
    }

    fn record(&mut self, direction: Direction, message: &Message) {
        if let Err(err) = self.transcript.append(direction, message) {
            warn!(%err, kind = message.kind().as_str(), "transcript append failed");
        }
    }

    fn arm_exit_deadline(&mut self) {
        if self.exit_deadline.is_none() && self.exit_status.is_none() {
            self.exit_deadline = Some(Instant::now() + self.ctx.config.cancel_grace());
        }
    }

    // ── Host commands ──────────────────────────────────────────────────────

    fn respond(&mut self, value: Value) -> Result<()> {
        let pending = match &self.pending {
            Some(pending) if !self.stopping() && self.exit_status.is_none() => pending,
            _ => {
                return Err(AppError::NoPendingRequest(format!(
                    "session {} has no pending request",
                    self.id
                )))
            }
        };
        pending.check_response(&value)?;

        let message = Message::Response {
            id: pending.id.clone(),
            value,
        };
        self.record(Direction::Out, &message);
        if let Err(err) = self.outbound.try_send(message) {
            let failure = SessionFailure::Transport(format!("stdin unavailable: {err}"));
            self.fail(failure);
            return Err(AppError::Io(format!("failed to deliver response: {err}")));
        }

        self.pending = None;
        self.pending_deadline = None;
        self.enter(SessionState::Running);
        Ok(())
    }

    fn begin_cancel(&mut self) {
        if self.stopping() || self.exit_status.is_some() || self.abandoned {
            debug!("cancel ignored: session already stopping");
            return;
        }
        info!("cancellation requested");
        self.cancel_requested = true;
        self.pending_deadline = None;

        let message = Message::Cancel;
        self.record(Direction::Out, &message);
        if self.outbound.try_send(message).is_err() {
            debug!("cancel message not delivered: stdin closed");
        }

        if self.ctx.config.signal_on_cancel {
            if let Some(pid) = self.pid {
                let delivered = request_termination(pid);
                debug!(pid, delivered, "termination signal sent");
            }
        }

        self.exit_deadline = None;
        self.arm_exit_deadline();
    }

    fn grace_elapsed(&mut self) {
        self.exit_deadline = None;
        if self.killed {
            warn!("script did not exit after kill; abandoning");
            self.abandoned = true;
            self.inbound_open = false;
            return;
        }
        if self.cancel_requested {
            warn!("grace period elapsed; force-killing script");
            self.forced = true;
        } else {
            warn!("script did not exit after finishing; killing it");
        }
        self.kill();
        self.arm_exit_deadline();
    }

    fn kill(&mut self) {
        if self.killed || self.exit_status.is_some() {
            return;
        }
        if let Err(err) = self.child.start_kill() {
            debug!(%err, "kill failed");
        }
        self.killed = true;
    }

    /// Record a host-detected failure, stop reading, and kill the child.
    fn fail(&mut self, failure: SessionFailure) {
        if self.stopping() {
            return;
        }
        warn!(%failure, "session failed");
        let note = Message::Error {
            message: failure.to_string(),
        };
        self.record(Direction::Host, &note);
        self.failure = Some(failure);
        self.inbound_open = false;
        self.drain_deadline = None;
        self.pending_deadline = None;
        self.kill();
        self.exit_deadline = None;
        self.arm_exit_deadline();
    }

    // ── Child output ───────────────────────────────────────────────────────

    fn on_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Message(message) => self.on_message(message),
            Inbound::Malformed { raw, error } => {
                if let Err(err) = self.transcript.append_malformed(&raw, &error) {
                    warn!(%err, "transcript append failed");
                }
                self.fail(SessionFailure::Protocol(error));
            }
            Inbound::Failed(error) => self.fail(SessionFailure::Transport(error)),
        }
    }

    fn on_message(&mut self, message: Message) {
        self.record(Direction::In, &message);

        if self.failure.is_some() {
            return;
        }
        if self.cancel_requested {
            self.forward_passive(message);
            return;
        }

        if message.kind().sender() == Endpoint::Host {
            self.fail(SessionFailure::Protocol(format!(
                "script sent host-only message '{}'",
                message.kind().as_str()
            )));
            return;
        }
        if self.done_code.is_some() {
            let detail = if matches!(message, Message::Done { .. }) {
                "duplicate done".to_owned()
            } else {
                format!("'{}' received after done", message.kind().as_str())
            };
            self.fail(SessionFailure::Protocol(detail));
            return;
        }

        match message {
            Message::RequestInput { .. } | Message::RequestConfirm { .. } => {
                self.on_request(&message);
            }
            Message::Error { message } => {
                warn!(error = %message, "script reported an error");
                if self.script_error.is_none() {
                    self.script_error = Some(message.clone());
                }
                self.ctx.sink.deliver(HostEvent::ScriptError {
                    session_id: self.id.clone(),
                    message,
                });
                self.arm_exit_deadline();
            }
            Message::Done { exit_code } => {
                debug!(exit_code, "script reported done");
                self.done_code = Some(exit_code);
                self.arm_exit_deadline();
            }
            other => self.forward_passive(other),
        }
    }

    /// Deliver log, progress and result messages to the sink.
    fn forward_passive(&self, message: Message) {
        let session_id = self.id.clone();
        let event = match message {
            Message::Log(payload) => {
                if !self.ctx.log_filter.allows(payload.level) {
                    return;
                }
                HostEvent::Log {
                    session_id,
                    payload,
                }
            }
            Message::Progress(payload) => HostEvent::Progress {
                session_id,
                payload,
            },
            Message::Result(payload) => HostEvent::Result {
                session_id,
                payload,
            },
            _ => return,
        };
        self.ctx.sink.deliver(event);
    }

    fn on_request(&mut self, message: &Message) {
        let request_id = message.correlation_id().unwrap_or_default().to_owned();

        if let Some(current) = &self.pending {
            let detail = format!(
                "request {request_id} issued while request {} is pending",
                current.id
            );
            self.fail(SessionFailure::Protocol(detail));
            return;
        }
        if !self.interactive {
            self.fail(SessionFailure::NoInteractiveConsumer { request_id });
            return;
        }

        let timeout = self.ctx.config.request_timeout();
        let deadline_utc = timeout
            .and_then(|t| chrono::Duration::from_std(t).ok())
            .map(|t| Utc::now() + t);
        let Some(pending) = PendingRequest::from_message(message, deadline_utc) else {
            return;
        };

        debug!(request_id = %pending.id, "waiting for response");
        self.pending_deadline = timeout.map(|t| Instant::now() + t);
        self.pending = Some(pending.clone());
        self.enter(SessionState::WaitingForInput);
        self.ctx.sink.deliver(HostEvent::Request {
            session_id: self.id.clone(),
            request: pending,
        });
    }

    // ── Termination ────────────────────────────────────────────────────────

    fn resolve(&self) -> Termination {
        if self.cancel_requested {
            return Termination::Canceled {
                forced: self.forced,
            };
        }
        if let Some(failure) = &self.failure {
            return Termination::Failed {
                failure: failure.clone(),
            };
        }
        if let Some(message) = &self.script_error {
            return Termination::Failed {
                failure: SessionFailure::ScriptError(message.clone()),
            };
        }

        let code = self.exit_status.and_then(|status| status.code());
        if self.killed {
            return Termination::Failed {
                failure: SessionFailure::SubprocessExit { code: None },
            };
        }
        if let Some(pending) = &self.pending {
            let failure = match code {
                Some(0) => SessionFailure::Protocol(format!(
                    "script exited with request {} unanswered",
                    pending.id
                )),
                other => SessionFailure::SubprocessExit { code: other },
            };
            return Termination::Failed { failure };
        }

        match (self.done_code, code) {
            (_, None) => Termination::Failed {
                failure: SessionFailure::SubprocessExit { code: None },
            },
            (_, Some(code)) if code != 0 => Termination::Failed {
                failure: SessionFailure::SubprocessExit { code: Some(code) },
            },
            (Some(done), Some(_)) if done != 0 => Termination::Failed {
                failure: SessionFailure::SubprocessExit { code: Some(done) },
            },
            _ => Termination::Finished { exit_code: 0 },
        }
    }

    async fn finalize(mut self, termination: Termination) {
        self.io_cancel.cancel();
        if self.exit_status.is_none() && !self.killed {
            self.kill();
        }

        let exit_code = self.exit_status.and_then(|status| status.code());
        let exited_on_own = !self.killed && !self.stopping();
        if let (None, Some(code), true) = (self.done_code, exit_code, exited_on_own) {
            self.record(Direction::Host, &Message::Done { exit_code: code });
        }

        if let Some(task) = self.stderr_task.take() {
            let drain = self.ctx.config.drain();
            if tokio::time::timeout(drain, task).await.is_err() {
                debug!("stderr still open at finalize");
            }
        }

        let detail = self.detail(&termination);
        if let Err(err) = self.transcript.seal() {
            warn!(%err, "transcript seal failed");
        }

        let state = termination.state();
        let record = self
            .ctx
            .registry
            .finish(&self.id, termination.clone(), exit_code, Some(detail));
        self.state = state;
        self.state_tx.send_replace(state);

        info!(outcome = %termination.detail(), ?exit_code, "session ended");
        self.ctx.sink.deliver(HostEvent::StateChanged {
            session_id: self.id.clone(),
            state,
        });
        if let Some(record) = record {
            self.ctx.sink.deliver(HostEvent::Finished { record });
        }
    }

    fn detail(&self, termination: &Termination) -> String {
        let base = termination.detail();
        match termination {
            Termination::Failed {
                failure: SessionFailure::SubprocessExit { .. },
            } => match self.stderr_tail.contents() {
                Some(tail) => format!("{base}\n{tail}"),
                None => base,
            },
            _ => base,
        }
    }
}

/// Sleep until `deadline`; pends forever on `None` (branch is disabled then).
async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Snapshot a session's record, waiting for it to become terminal.
pub(crate) async fn wait_for_record(
    handle: &SessionHandle,
    registry: &Registry,
) -> Option<ProcessRecord> {
    handle.wait().await;
    registry.get(handle.id())
}

/// Grace period plus the kill fallback window.
#[must_use]
pub(crate) fn worst_case_stop(config: &SessionConfig) -> Duration {
    config.cancel_grace() * 2 + config.drain()
}
