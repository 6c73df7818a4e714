#![forbid(unsafe_code)]

//! `fscp-host`: run catalog scripts from the terminal over FSCP.
//!
//! Loads the host configuration, then lists the catalog, runs one script in
//! the foreground (prompts are answered on stdin, Ctrl-C cancels), or applies
//! transcript retention.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use fscp_host::catalog::ScriptCatalog;
use fscp_host::models::{PendingRequest, ProcessRecord, RequestKind, SessionState, Target};
use fscp_host::sink::{ChannelSink, HostEvent};
use fscp_host::transcript::TranscriptRecorder;
use fscp_host::{AppError, HostConfig, Result, Supervisor};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "fscp-host", about = "Run FSCP automation scripts", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List catalog scripts.
    Scripts,
    /// Run a script against a file or directory.
    Run {
        /// Catalog id of the script.
        script_id: String,
        /// File or directory to run against.
        target: PathBuf,
    },
    /// Apply transcript retention and report deleted files.
    Prune,
}

fn main() -> Result<ExitCode> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<ExitCode> {
    let config = HostConfig::load_from_path(&args.config)?;
    info!(transcript_dir = %config.transcript_dir.display(), "configuration loaded");

    match args.command {
        Command::Scripts => {
            list_scripts(&config)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Run { script_id, target } => run_script(&config, &script_id, &target).await,
        Command::Prune => {
            let recorder = TranscriptRecorder::new(&config.transcript_dir)?;
            let report = recorder.prune(
                config.retention.max_transcripts,
                config.retention.transcript_max_age_days,
            )?;
            for path in &report.removed {
                println!("removed {}", path.display());
            }
            println!("{} removed, {} kept", report.removed.len(), report.kept);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn list_scripts(config: &HostConfig) -> Result<()> {
    let catalog = config.catalog()?;
    for spec in catalog.scripts() {
        let extensions = spec.normalized_extensions();
        let filter = if extensions.is_empty() {
            String::new()
        } else {
            format!(" [{}]", extensions.join(", "))
        };
        println!(
            "{:<20} {} ({:?}){filter}",
            spec.id,
            spec.display_name(),
            spec.target
        );
    }
    Ok(())
}

async fn run_script(config: &HostConfig, script_id: &str, target: &Path) -> Result<ExitCode> {
    let catalog: Arc<dyn ScriptCatalog> = Arc::new(config.catalog()?);
    let (sink, mut events) = ChannelSink::new();
    let supervisor = Supervisor::new(config, catalog, Arc::new(sink))?;

    let target = Target::resolve(target)?;
    let session_id = supervisor.start(script_id, target).await?;

    let mut answers = spawn_stdin_lines();
    let mut pending: Option<PendingRequest> = None;
    let mut interrupted = false;
    let mut stdin_open = true;

    let record = loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    break supervisor.wait(&session_id).await?;
                };
                if let Some(record) = render(event, &mut pending) {
                    break record;
                }
            }
            line = answers.recv(), if pending.is_some() && stdin_open => {
                let Some(line) = line else {
                    stdin_open = false;
                    println!("stdin closed, cancelling…");
                    supervisor.cancel(&session_id).await?;
                    continue;
                };
                if let Some(request) = pending.take() {
                    let value = answer_value(&request, line.trim());
                    if let Err(err) = supervisor.respond(&session_id, value).await {
                        warn!(%err, "response rejected");
                        println!("! {err}");
                        pending = Some(request);
                    }
                }
            }
            signal = tokio::signal::ctrl_c(), if !interrupted => {
                if let Err(err) = signal {
                    warn!(%err, "ctrl-c handler failed");
                }
                interrupted = true;
                println!("cancelling…");
                supervisor.cancel(&session_id).await?;
            }
        }
    };

    println!("{} · {}", record.label(), record.detail.as_deref().unwrap_or(""));
    if let Some(path) = &record.transcript_path {
        println!("transcript: {}", path.display());
    }

    Ok(if record.state == SessionState::Finished {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Print one event. Returns the final record once the session has ended.
fn render(event: HostEvent, pending: &mut Option<PendingRequest>) -> Option<ProcessRecord> {
    match event {
        HostEvent::StateChanged { state, .. } => info!(%state, "state changed"),
        HostEvent::Log { payload, .. } => {
            println!("[{}] {}", payload.level.as_str(), payload.text);
        }
        HostEvent::Progress { payload, .. } => {
            let total = payload
                .total
                .map_or_else(String::new, |total| format!("/{total}"));
            let unit = payload.unit.as_deref().unwrap_or("");
            let message = payload.message.as_deref().unwrap_or("");
            println!("[progress] {}{total} {unit} {message}", payload.current);
        }
        HostEvent::Result { payload, .. } => {
            let title = payload.title.as_deref().unwrap_or("result");
            let status = payload.status.map_or("", |s| s.as_str());
            let body = Value::Object(payload.data);
            println!("[{title}] {status} {body}");
        }
        HostEvent::Request { request, .. } => {
            match &request.kind {
                RequestKind::Input { default, .. } => match default {
                    Some(default) => println!("? {} [{default}]", request.prompt),
                    None => println!("? {}", request.prompt),
                },
                RequestKind::Confirm { default } => {
                    let hint = match default {
                        Some(true) => "Y/n",
                        Some(false) => "y/N",
                        None => "y/n",
                    };
                    println!("? {} [{hint}]", request.prompt);
                }
            }
            *pending = Some(request);
        }
        HostEvent::ScriptError { message, .. } => println!("! {message}"),
        HostEvent::Finished { record } => return Some(record),
    }
    None
}

fn answer_value(request: &PendingRequest, line: &str) -> Value {
    match &request.kind {
        RequestKind::Input { default, .. } => {
            if line.is_empty() {
                Value::from(default.clone().unwrap_or_default())
            } else {
                Value::from(line)
            }
        }
        RequestKind::Confirm { default } => {
            let answer = match line.to_ascii_lowercase().as_str() {
                "y" | "yes" | "true" => true,
                "n" | "no" | "false" => false,
                _ => default.unwrap_or(false),
            };
            Value::Bool(answer)
        }
    }
}

fn spawn_stdin_lines() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(4);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).await.is_err() {
                break;
            }
        }
    });
    rx
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
