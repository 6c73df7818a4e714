//! Integration tests for cancellation.
//!
//! Validates:
//! - cancel while waiting for input ends in `Canceled`
//! - a script ignoring SIGTERM and `cancel` is force-killed after the grace period
//! - cooperative cancellation through the `cancel` message alone
//! - cancel is idempotent, including after the session ended

use serial_test::serial;

use fscp_host::models::{SessionState, Termination};
use fscp_host::protocol::message::Message;
use fscp_host::sink::HostEvent;
use fscp_host::transcript::{read_transcript, Direction};
use fscp_host::AppError;

use std::time::{Duration, Instant};

use super::test_helpers::{emit, harness, is_ready, is_request, states, READY};

const ASK: &str = r#"{"type":"request_input","id":"q1","payload":{"prompt":"Continue?"}}"#;

const STUBBORN_SESSION: &str = "[session]\ncancel_grace_ms = 300\ndrain_ms = 100\n";

/// Grace plus drain from [`STUBBORN_SESSION`], plus scheduling slack.
const FORCED_CANCEL_BOUND: Duration = Duration::from_millis(300 + 100 + 1000);

#[cfg(unix)]
#[tokio::test]
async fn cancel_while_waiting_for_input() {
    let mut h = harness(&[("ask", &*emit(&[ASK], "read -r line\nexit 0"))], "");
    let id = h.start("ask").await;

    let mut events = Vec::new();
    loop {
        let event = h.next_event().await;
        let done = matches!(event, HostEvent::Request { .. });
        events.push(event);
        if done {
            break;
        }
    }
    h.supervisor.cancel(&id).await.expect("cancel");
    let (rest, record) = h.run_to_end(&id).await;
    events.extend(rest);

    assert_eq!(
        states(&events),
        vec![
            SessionState::Running,
            SessionState::WaitingForInput,
            SessionState::Canceled,
        ]
    );
    assert_eq!(record.state, SessionState::Canceled);
    assert!(record.pending.is_none());
    assert_eq!(
        record.termination,
        Some(Termination::Canceled { forced: false })
    );

    let entries = read_transcript(record.transcript_path.as_deref().unwrap()).unwrap();
    let last_out = entries
        .iter()
        .rev()
        .find(|e| e.direction == Direction::Out)
        .expect("cancel recorded");
    assert_eq!(last_out.message, Some(Message::Cancel));
    assert!(
        !entries
            .iter()
            .any(|e| e.direction == Direction::Host && matches!(e.message, Some(Message::Done { .. }))),
        "no implicit done after cancel"
    );
}

#[cfg(unix)]
#[tokio::test]
#[serial]
async fn stubborn_script_is_force_killed() {
    let body = format!(
        "trap '' TERM\nprintf '%s\\n' '{READY}'\nwhile :; do read -r _line; done\n"
    );
    let mut h = harness(&[("stubborn", body.as_str())], STUBBORN_SESSION);
    let id = h.start("stubborn").await;
    h.wait_for(is_ready).await;

    let started = Instant::now();
    h.supervisor.cancel(&id).await.expect("cancel");
    let record = h.wait(&id).await;
    let elapsed = started.elapsed();

    assert_eq!(record.state, SessionState::Canceled);
    assert_eq!(record.termination, Some(Termination::Canceled { forced: true }));
    assert_eq!(record.detail.as_deref(), Some("forced"));
    assert!(elapsed >= Duration::from_millis(300), "{elapsed:?}");
    assert!(elapsed < FORCED_CANCEL_BOUND, "{elapsed:?}");
}

#[cfg(unix)]
#[tokio::test]
#[serial]
async fn stubborn_script_waiting_for_input_is_force_killed() {
    let body = format!(
        "trap '' TERM\n{}",
        emit(&[ASK], "while :; do read -r _line; done")
    );
    let mut h = harness(&[("stubborn", body.as_str())], STUBBORN_SESSION);
    let id = h.start("stubborn").await;
    h.wait_for(is_request).await;
    assert_eq!(h.supervisor.get(&id).unwrap().state, SessionState::WaitingForInput);

    let started = Instant::now();
    h.supervisor.cancel(&id).await.expect("cancel");
    let record = h.wait(&id).await;
    let elapsed = started.elapsed();

    assert_eq!(record.state, SessionState::Canceled);
    assert_eq!(record.termination, Some(Termination::Canceled { forced: true }));
    assert!(record.pending.is_none());
    assert!(elapsed < FORCED_CANCEL_BOUND, "{elapsed:?}");
}

#[cfg(unix)]
#[tokio::test]
async fn cooperative_cancel_without_signal() {
    let body = format!(
        "printf '%s\\n' '{READY}'\n\
         read -r line\n\
         case \"$line\" in *cancel*) exit 0 ;; esac\n\
         exit 9\n"
    );
    let mut h = harness(
        &[("polite", body.as_str())],
        "[session]\nsignal_on_cancel = false\ncancel_grace_ms = 2000\ndrain_ms = 100\n",
    );
    let id = h.start("polite").await;
    h.wait_for(is_ready).await;

    h.supervisor.cancel(&id).await.expect("cancel");
    let record = h.wait(&id).await;

    assert_eq!(record.termination, Some(Termination::Canceled { forced: false }));
    assert_eq!(record.exit_code, Some(0));
}

#[cfg(unix)]
#[tokio::test]
async fn cancel_is_idempotent() {
    let body = format!("printf '%s\\n' '{READY}'\nread -r _line\n");
    let mut h = harness(&[("wait", body.as_str())], "");
    let id = h.start("wait").await;
    h.wait_for(is_ready).await;

    h.supervisor.cancel(&id).await.expect("first cancel");
    h.supervisor.cancel(&id).await.expect("second cancel");
    let record = h.wait(&id).await;
    assert_eq!(record.state, SessionState::Canceled);

    h.supervisor.cancel(&id).await.expect("cancel after end");
    let after = h.supervisor.get(&id).expect("record");
    assert_eq!(after, record);

    let entries = read_transcript(record.transcript_path.as_deref().unwrap()).unwrap();
    let cancels = entries
        .iter()
        .filter(|e| e.message == Some(Message::Cancel))
        .count();
    assert_eq!(cancels, 1);
}

#[cfg(unix)]
#[tokio::test]
async fn cancel_of_finished_session_keeps_outcome() {
    let h = harness(&[("quick", "exit 0\n")], "");
    let id = h.start("quick").await;
    let record = h.wait(&id).await;

    h.supervisor.cancel(&id).await.expect("cancel");
    assert_eq!(h.supervisor.get(&id).unwrap().state, SessionState::Finished);
    assert_eq!(record.state, SessionState::Finished);
}

#[tokio::test]
async fn cancel_of_unknown_session_is_not_found() {
    let h = harness(&[], "");
    let err = h.supervisor.cancel("missing").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}
