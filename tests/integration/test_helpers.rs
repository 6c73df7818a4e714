//! Shared helpers for supervisor-level integration tests.
//!
//! Scripts are small `/bin/sh` programs written into a temp directory and
//! registered in a config built from TOML, so each test module can focus on
//! protocol behaviour rather than setup.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

use fscp_host::models::{ProcessRecord, SessionState, Target, TargetKind};
use fscp_host::sink::{ChannelSink, HostEvent};
use fscp_host::{HostConfig, Supervisor};

/// Upper bound for any single wait in these tests.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// `log` record a script can print to signal it reached a point.
pub const READY: &str = r#"{"type":"log","payload":{"level":"info","text":"ready"}}"#;

/// A supervisor wired to a channel sink, plus the temp directory backing it.
pub struct Harness {
    pub dir: TempDir,
    pub supervisor: Supervisor,
    pub events: UnboundedReceiver<HostEvent>,
}

/// Build a harness with one `/bin/sh` script per `(id, body)` pair.
///
/// `extra` is appended to the generated TOML and may add `[session]`,
/// `[retention]` or `[policy]` tables.
pub fn harness(scripts: &[(&str, &str)], extra: &str) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path();
    std::fs::create_dir_all(root.join("scripts")).expect("scripts dir");

    let mut toml = format!(
        "transcript_dir = '{}'\n{extra}\n",
        root.join("transcripts").display()
    );
    if !extra.contains("[session]") {
        toml.push_str("[session]\ncancel_grace_ms = 500\ndrain_ms = 100\n");
    }

    for (id, body) in scripts {
        let path = root.join("scripts").join(format!("{id}.sh"));
        std::fs::write(&path, body).expect("write script");
        toml.push_str(&format!(
            "\n[[scripts]]\nid = '{id}'\nname = 'Script {id}'\nexecutable = '/bin/sh'\nargs = ['{}']\nworking_dir = '{}'\n",
            path.display(),
            root.display()
        ));
    }

    let config = HostConfig::from_toml_str(&toml).expect("valid test config");
    let catalog = Arc::new(config.catalog().expect("catalog"));
    let (sink, events) = ChannelSink::new();
    let supervisor = Supervisor::new(&config, catalog, Arc::new(sink)).expect("supervisor");

    Harness {
        dir,
        supervisor,
        events,
    }
}

/// Shell body printing each record on its own line, then running `tail`.
pub fn emit(records: &[&str], tail: &str) -> String {
    let mut body = String::new();
    for record in records {
        body.push_str(&format!("printf '%s\\n' '{record}'\n"));
    }
    body.push_str(tail);
    body.push('\n');
    body
}

impl Harness {
    /// The harness temp directory as a directory target.
    pub fn target(&self) -> Target {
        Target::new(self.dir.path(), TargetKind::Directory)
    }

    /// Start `script_id` against the default target.
    pub async fn start(&self, script_id: &str) -> String {
        self.supervisor
            .start(script_id, self.target())
            .await
            .expect("start session")
    }

    /// Next sink event, failing the test if none arrives in time.
    pub async fn next_event(&mut self) -> HostEvent {
        tokio::time::timeout(EVENT_TIMEOUT, self.events.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("sink channel closed")
    }

    /// Skip events until one matches `pred`; return it.
    pub async fn wait_for(&mut self, pred: impl Fn(&HostEvent) -> bool) -> HostEvent {
        loop {
            let event = self.next_event().await;
            if pred(&event) {
                return event;
            }
        }
    }

    /// Collect the events of `session_id` up to and including `Finished`.
    pub async fn run_to_end(&mut self, session_id: &str) -> (Vec<HostEvent>, ProcessRecord) {
        let mut seen = Vec::new();
        loop {
            let event = self.next_event().await;
            if event.session_id() != session_id {
                continue;
            }
            if let HostEvent::Finished { record } = &event {
                let record = record.clone();
                seen.push(event);
                return (seen, record);
            }
            seen.push(event);
        }
    }

    /// Final record of `session_id` via `Supervisor::wait`.
    pub async fn wait(&self, session_id: &str) -> ProcessRecord {
        tokio::time::timeout(EVENT_TIMEOUT, self.supervisor.wait(session_id))
            .await
            .expect("session did not finish in time")
            .expect("known session")
    }
}

/// The states announced by `StateChanged` events, in order.
pub fn states(events: &[HostEvent]) -> Vec<SessionState> {
    events
        .iter()
        .filter_map(|event| match event {
            HostEvent::StateChanged { state, .. } => Some(*state),
            _ => None,
        })
        .collect()
}

/// Whether `event` is the pending-request announcement.
pub fn is_request(event: &HostEvent) -> bool {
    matches!(event, HostEvent::Request { .. })
}

/// Whether `event` is a `log` with text `ready`.
pub fn is_ready(event: &HostEvent) -> bool {
    matches!(event, HostEvent::Log { payload, .. } if payload.text == "ready")
}

/// Number of `.jsonl` files in `dir`.
pub fn transcript_count(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .expect("read transcript dir")
        .flatten()
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "jsonl"))
        .count()
}
