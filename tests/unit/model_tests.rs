//! Unit tests for session states, pending requests, records and targets.

use std::path::PathBuf;

use serde_json::json;

use fscp_host::models::{
    PendingRequest, ProcessRecord, RequestKind, ScriptSpec, SessionFailure, SessionState, Target,
    TargetKind, TargetRequirement, Termination,
};
use fscp_host::protocol::message::{ConfirmRequest, InputRequest, LogLevel, Message};
use fscp_host::AppError;

const ALL_STATES: [SessionState; 6] = [
    SessionState::Starting,
    SessionState::Running,
    SessionState::WaitingForInput,
    SessionState::Finished,
    SessionState::Canceled,
    SessionState::Error,
];

fn spec(target: TargetRequirement, extensions: &[&str]) -> ScriptSpec {
    ScriptSpec {
        id: "s".into(),
        name: "Sample".into(),
        executable: PathBuf::from("/bin/true"),
        args: Vec::new(),
        working_dir: PathBuf::from("/tmp"),
        target,
        file_extensions: extensions.iter().map(|e| (*e).to_owned()).collect(),
    }
}

// ── Session state ────────────────────────────────────────────────────────────

#[test]
fn terminal_states_are_sinks() {
    for from in ALL_STATES.into_iter().filter(|s| s.is_terminal()) {
        for to in ALL_STATES {
            assert!(!from.can_transition_to(to), "{from:?} -> {to:?}");
        }
    }
}

#[test]
fn running_and_waiting_alternate() {
    assert!(SessionState::Running.can_transition_to(SessionState::WaitingForInput));
    assert!(SessionState::WaitingForInput.can_transition_to(SessionState::Running));
    assert!(!SessionState::WaitingForInput.can_transition_to(SessionState::WaitingForInput));
}

#[test]
fn waiting_cannot_finish_without_resuming() {
    assert!(!SessionState::WaitingForInput.can_transition_to(SessionState::Finished));
    assert!(SessionState::WaitingForInput.can_transition_to(SessionState::Canceled));
    assert!(SessionState::WaitingForInput.can_transition_to(SessionState::Error));
}

#[test]
fn state_labels_are_friendly() {
    assert_eq!(SessionState::WaitingForInput.to_string(), "Waiting for input");
    assert_eq!(SessionState::Running.label(), "Running");
}

#[test]
fn terminations_project_to_terminal_states() {
    assert_eq!(
        Termination::Finished { exit_code: 0 }.state(),
        SessionState::Finished
    );
    assert_eq!(
        Termination::Canceled { forced: true }.state(),
        SessionState::Canceled
    );
    let failed = Termination::Failed {
        failure: SessionFailure::ScriptError("boom".into()),
    };
    assert_eq!(failed.state(), SessionState::Error);
    assert_eq!(failed.detail(), "script error: boom");
    assert_eq!(Termination::Canceled { forced: true }.detail(), "forced");
    assert_eq!(Termination::Canceled { forced: false }.detail(), "voluntary");
}

// ── Pending requests ─────────────────────────────────────────────────────────

#[test]
fn pending_request_from_input_message() {
    let message = Message::RequestInput {
        id: "1".into(),
        request: InputRequest {
            prompt: "Name?".into(),
            default: Some("anon".into()),
            secret: false,
            suggestions: vec!["ada".into()],
        },
    };
    let pending = PendingRequest::from_message(&message, None).expect("request");

    assert_eq!(pending.id, "1");
    assert_eq!(pending.prompt, "Name?");
    assert!(!pending.is_confirm());
    assert_eq!(
        pending.kind,
        RequestKind::Input {
            default: Some("anon".into()),
            secret: false,
            suggestions: vec!["ada".into()],
        }
    );
}

#[test]
fn only_requests_become_pending() {
    assert!(PendingRequest::from_message(&Message::log(LogLevel::Info, "x"), None).is_none());
    assert!(PendingRequest::from_message(&Message::Done { exit_code: 0 }, None).is_none());
}

#[test]
fn confirm_requests_require_booleans() {
    let message = Message::RequestConfirm {
        id: "2".into(),
        request: ConfirmRequest {
            prompt: "Go?".into(),
            default: None,
        },
    };
    let pending = PendingRequest::from_message(&message, None).expect("request");

    assert!(pending.check_response(&json!(true)).is_ok());
    assert!(matches!(
        pending.check_response(&json!("yes")),
        Err(AppError::InvalidResponse(_))
    ));
}

#[test]
fn input_requests_require_strings() {
    let message = Message::RequestInput {
        id: "3".into(),
        request: InputRequest {
            prompt: "Name?".into(),
            default: None,
            secret: false,
            suggestions: Vec::new(),
        },
    };
    let pending = PendingRequest::from_message(&message, None).expect("request");

    assert!(pending.check_response(&json!("Ada")).is_ok());
    assert!(matches!(
        pending.check_response(&json!(42)),
        Err(AppError::InvalidResponse(_))
    ));
}

// ── Records ──────────────────────────────────────────────────────────────────

#[test]
fn record_label_includes_pid_and_state() {
    let mut record = ProcessRecord::new(
        "id-1",
        "zip",
        "Zip folder",
        Target::new("/home/user/projects/report", TargetKind::Directory),
    );
    assert_eq!(record.state, SessionState::Starting);
    assert_eq!(record.label(), "Zip folder · pid ? · Starting");

    record.pid = Some(4242);
    record.state = SessionState::Running;
    assert_eq!(record.label(), "Zip folder · pid 4242 · Running");
    assert_eq!(record.target_label(), "…/projects/report");
}

// ── Targets ──────────────────────────────────────────────────────────────────

#[test]
fn target_resolution_detects_kind() {
    let dir = tempfile::tempdir().expect("tempdir");
    let file = dir.path().join("a.txt");
    std::fs::write(&file, "x").unwrap();

    assert_eq!(Target::resolve(dir.path()).unwrap().kind, TargetKind::Directory);
    assert_eq!(Target::resolve(&file).unwrap().kind, TargetKind::File);
    assert!(matches!(
        Target::resolve(dir.path().join("missing")),
        Err(AppError::InvalidTarget(_))
    ));
}

#[test]
fn declared_target_kind_is_enforced() {
    let file = Target::new("/tmp/a.txt", TargetKind::File);
    let dir = Target::new("/tmp", TargetKind::Directory);

    assert!(spec(TargetRequirement::Any, &[]).check_target(&file).is_ok());
    assert!(spec(TargetRequirement::Any, &[]).check_target(&dir).is_ok());
    assert!(matches!(
        spec(TargetRequirement::File, &[]).check_target(&dir),
        Err(AppError::InvalidTarget(_))
    ));
    assert!(matches!(
        spec(TargetRequirement::Directory, &[]).check_target(&file),
        Err(AppError::InvalidTarget(_))
    ));
}

#[test]
fn extension_filter_is_case_insensitive() {
    let pdf = spec(TargetRequirement::File, &["pdf"]);

    assert!(pdf
        .check_target(&Target::new("/tmp/Report.PDF", TargetKind::File))
        .is_ok());
    assert!(matches!(
        pdf.check_target(&Target::new("/tmp/notes.txt", TargetKind::File)),
        Err(AppError::InvalidTarget(_))
    ));
}

#[test]
fn extension_filter_ignores_directories() {
    let any = spec(TargetRequirement::Any, &[".zip"]);
    assert!(any
        .check_target(&Target::new("/tmp", TargetKind::Directory))
        .is_ok());
}
