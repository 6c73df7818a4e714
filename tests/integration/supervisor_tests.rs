//! Integration tests for supervisor policy: start validation, foreground
//! ownership, listings and shutdown.

use std::sync::Arc;

use fscp_host::models::{SessionFailure, SessionState, Target, TargetKind, Termination};
use fscp_host::sink::{HostEvent, NullSink};
use fscp_host::{AppError, HostConfig, Supervisor};

use super::test_helpers::{emit, harness, is_ready, transcript_count, READY};

const ASK: &str = r#"{"type":"request_input","id":"q1","payload":{"prompt":"Name?"}}"#;

fn blocking_body() -> String {
    format!("printf '%s\\n' '{READY}'\nread -r _line\n")
}

/// Supervisor over a hand-written config whose scripts never need to run.
fn supervisor_for(toml: &str) -> (tempfile::TempDir, Supervisor) {
    let dir = tempfile::tempdir().expect("tempdir");
    let raw = format!(
        "transcript_dir = '{}'\n{toml}",
        dir.path().join("transcripts").display()
    )
    .replace("$ROOT", &dir.path().display().to_string());
    let config = HostConfig::from_toml_str(&raw).expect("config");
    let catalog = Arc::new(config.catalog().expect("catalog"));
    let supervisor = Supervisor::new(&config, catalog, Arc::new(NullSink)).expect("supervisor");
    (dir, supervisor)
}

#[tokio::test]
async fn unknown_script_is_not_found() {
    let h = harness(&[], "");
    let err = h.supervisor.start("nope", h.target()).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)), "{err}");
    assert!(h.supervisor.list().is_empty());
}

#[tokio::test]
async fn target_mismatch_is_rejected_before_spawning() {
    let (dir, supervisor) = supervisor_for(
        r#"
        [[scripts]]
        id = "pdf"
        executable = "/bin/true"
        working_dir = "$ROOT"
        target = "file"
        file_extensions = ["pdf"]
        "#,
    );

    let as_dir = Target::new(dir.path(), TargetKind::Directory);
    let err = supervisor.start("pdf", as_dir).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidTarget(_)), "{err}");

    let txt = Target::new(dir.path().join("notes.txt"), TargetKind::File);
    let err = supervisor.start("pdf", txt).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidTarget(_)), "{err}");

    assert!(supervisor.list().is_empty());
    assert_eq!(transcript_count(supervisor.transcripts().dir()), 0);
}

#[tokio::test]
async fn missing_executable_fails_to_start() {
    let (dir, supervisor) = supervisor_for(
        r#"
        [[scripts]]
        id = "ghost"
        executable = "/definitely/not/installed/tool"
        working_dir = "$ROOT"

        [[scripts]]
        id = "homeless"
        executable = "/bin/true"
        working_dir = "$ROOT/missing"
        "#,
    );
    let target = Target::new(dir.path(), TargetKind::Directory);

    let err = supervisor.start("ghost", target.clone()).await.unwrap_err();
    assert!(matches!(err, AppError::ProcessStart(_)), "{err}");
    let err = supervisor.start("homeless", target).await.unwrap_err();
    assert!(matches!(err, AppError::ProcessStart(_)), "{err}");

    assert!(supervisor.list().is_empty());
    assert_eq!(supervisor.foreground(), None);
    assert_eq!(transcript_count(supervisor.transcripts().dir()), 0);
}

#[cfg(unix)]
#[tokio::test]
async fn background_request_has_no_interactive_consumer() {
    let mut h = harness(
        &[
            ("front", blocking_body().as_str()),
            ("back", &*emit(&[ASK], "read -r _line")),
        ],
        "",
    );
    let front = h.start("front").await;
    h.wait_for(is_ready).await;
    assert_eq!(h.supervisor.foreground().as_deref(), Some(front.as_str()));

    let back = h.start("back").await;
    let record = h.wait(&back).await;

    assert_eq!(record.state, SessionState::Error);
    assert_eq!(
        record.termination,
        Some(Termination::Failed {
            failure: SessionFailure::NoInteractiveConsumer {
                request_id: "q1".into()
            },
        })
    );
    assert_eq!(h.supervisor.foreground().as_deref(), Some(front.as_str()));

    h.supervisor.cancel(&front).await.unwrap();
    h.wait(&front).await;
    assert_eq!(h.supervisor.foreground(), None);

    while let Ok(event) = h.events.try_recv() {
        assert!(
            !matches!(&event, HostEvent::Request { session_id, .. } if *session_id == back),
            "background request must not reach the sink"
        );
    }
}

#[cfg(unix)]
#[tokio::test]
async fn exclusive_policy_refuses_a_second_session() {
    let mut h = harness(
        &[("front", blocking_body().as_str()), ("quick", "exit 0\n")],
        "[policy]\nbackground = \"exclusive\"\n",
    );
    let front = h.start("front").await;
    h.wait_for(is_ready).await;

    let err = h.supervisor.start("quick", h.target()).await.unwrap_err();
    assert!(matches!(err, AppError::Busy(_)), "{err}");
    assert_eq!(h.supervisor.list().len(), 1);

    h.supervisor.cancel(&front).await.unwrap();
    h.wait(&front).await;

    let next = h.start("quick").await;
    assert_eq!(h.wait(&next).await.state, SessionState::Finished);
}

#[cfg(unix)]
#[tokio::test]
async fn list_is_newest_first_with_labels() {
    let h = harness(&[("a", "exit 0\n"), ("b", "exit 0\n")], "");
    let first = h.start("a").await;
    h.wait(&first).await;
    let second = h.start("b").await;
    h.wait(&second).await;

    let records = h.supervisor.list();
    let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec![second.as_str(), first.as_str()]);

    let label = records[0].label();
    assert!(label.starts_with("Script b · pid "), "{label}");
    assert!(label.ends_with(" · Finished"), "{label}");
}

#[cfg(unix)]
#[tokio::test]
async fn clear_finished_keeps_live_sessions() {
    let mut h = harness(
        &[("live", blocking_body().as_str()), ("quick", "exit 0\n")],
        "",
    );
    let done = h.start("quick").await;
    h.wait(&done).await;
    let live = h.start("live").await;
    h.wait_for(is_ready).await;

    let removed = h.supervisor.clear_finished().await;
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].id, done);
    assert!(h.supervisor.get(&live).is_some());
    assert!(matches!(
        h.supervisor.wait(&done).await,
        Err(AppError::NotFound(_))
    ));

    h.supervisor.cancel(&live).await.unwrap();
    h.wait(&live).await;
}

#[cfg(unix)]
#[tokio::test]
async fn shutdown_cancels_every_live_session() {
    let mut h = harness(
        &[
            ("one", blocking_body().as_str()),
            ("two", blocking_body().as_str()),
        ],
        "",
    );
    let one = h.start("one").await;
    h.wait_for(is_ready).await;
    let two = h.start("two").await;
    h.wait_for(is_ready).await;

    tokio::time::timeout(std::time::Duration::from_secs(10), h.supervisor.shutdown())
        .await
        .expect("shutdown finished");

    for id in [&one, &two] {
        let record = h.supervisor.get(id).expect("record");
        assert_eq!(record.state, SessionState::Canceled, "{id}");
    }
    assert_eq!(h.supervisor.foreground(), None);
}

#[cfg(unix)]
#[tokio::test]
async fn wait_after_session_ended_returns_final_record() {
    let h = harness(&[("quick", "exit 0\n")], "");
    let id = h.start("quick").await;
    let first = h.wait(&id).await;

    // The session task is gone by now; waiting again still resolves.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let second = h.wait(&id).await;

    assert_eq!(first.state, SessionState::Finished);
    assert_eq!(second, first);
}
