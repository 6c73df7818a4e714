//! Script process spawner.
//!
//! Launches a catalog script against a target with:
//! - `kill_on_drop(true)` so a dropped session never leaks its child.
//! - `env_clear()` plus a small allowlist, so host secrets never reach scripts.
//! - The FSCP context passed through `FSCP_*` variables and the target path
//!   appended as the final argument.
//! - All three stdio streams piped.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, info};

use crate::models::{ScriptSpec, Target};
use crate::{AppError, Result};

/// Environment variables inherited by script processes.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "LANG",
    "LC_ALL",
    "TMPDIR",
    "TERM",
    "RUST_LOG",
    // Windows-specific variables.
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "USERNAME",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
];

/// Session id passed to the script.
pub const ENV_SESSION_ID: &str = "FSCP_SESSION_ID";
/// Catalog id passed to the script.
pub const ENV_SCRIPT_ID: &str = "FSCP_SCRIPT_ID";
/// Absolute target path passed to the script.
pub const ENV_TARGET_PATH: &str = "FSCP_TARGET_PATH";
/// `file` or `directory`.
pub const ENV_TARGET_KIND: &str = "FSCP_TARGET_KIND";

/// Handles of a freshly spawned script.
#[derive(Debug)]
pub struct ScriptProcess {
    /// Child handle; the session owns it exclusively.
    pub child: Child,
    /// OS process id, when the platform reports one.
    pub pid: Option<u32>,
    /// Host → script stream.
    pub stdin: ChildStdin,
    /// Script → host stream.
    pub stdout: ChildStdout,
    /// Diagnostic stream.
    pub stderr: ChildStderr,
}

/// Resolve the program path of `spec`.
///
/// Relative paths with more than one component are taken relative to the
/// working directory; bare names are left for `PATH` lookup.
#[must_use]
pub fn resolve_executable(spec: &ScriptSpec) -> PathBuf {
    let exe = &spec.executable;
    if exe.is_relative() && exe.components().count() > 1 {
        spec.working_dir.join(exe)
    } else {
        exe.clone()
    }
}

fn check_paths(spec: &ScriptSpec, program: &Path) -> Result<()> {
    if !spec.working_dir.is_dir() {
        return Err(AppError::ProcessStart(format!(
            "working directory {} does not exist",
            spec.working_dir.display()
        )));
    }
    if program.components().count() > 1 && !program.is_file() {
        return Err(AppError::ProcessStart(format!(
            "executable {} not found",
            program.display()
        )));
    }
    Ok(())
}

/// Spawn `spec` against `target` for session `session_id`.
///
/// # Errors
///
/// Returns [`AppError::ProcessStart`] if the working directory or executable
/// is missing, the OS refuses to start the program, or a stdio pipe could
/// not be captured.
pub fn spawn_script(spec: &ScriptSpec, target: &Target, session_id: &str) -> Result<ScriptProcess> {
    let program = resolve_executable(spec);
    check_paths(spec, &program)?;

    let mut cmd = Command::new(&program);
    cmd.args(&spec.args).arg(&target.path);

    cmd.env_clear();
    for &key in ALLOWED_ENV_VARS {
        if let Ok(val) = std::env::var(key) {
            cmd.env(key, val);
        }
    }
    cmd.env(ENV_SESSION_ID, session_id)
        .env(ENV_SCRIPT_ID, &spec.id)
        .env(ENV_TARGET_PATH, &target.path)
        .env(ENV_TARGET_KIND, target.kind.as_str());

    cmd.current_dir(&spec.working_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(session_id, program = %program.display(), "spawning script");

    let mut child = cmd.spawn().map_err(|err| {
        AppError::ProcessStart(format!("failed to start {}: {err}", program.display()))
    })?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::ProcessStart("failed to capture script stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::ProcessStart("failed to capture script stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::ProcessStart("failed to capture script stderr".into()))?;

    let pid = child.id();
    info!(session_id, script_id = %spec.id, ?pid, "script process started");

    Ok(ScriptProcess {
        child,
        pid,
        stdin,
        stdout,
        stderr,
    })
}

/// Ask the process `pid` to terminate (SIGTERM).
///
/// Returns `true` if the signal was delivered. Always `false` on platforms
/// without POSIX signals; callers then rely on the `cancel` message and the
/// forced kill after the grace period.
#[cfg(unix)]
#[must_use]
pub fn request_termination(pid: u32) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) => true,
        Err(err) => {
            debug!(pid, %err, "SIGTERM delivery failed");
            false
        }
    }
}

/// Ask the process `pid` to terminate. No-op without POSIX signals.
#[cfg(not(unix))]
#[must_use]
pub fn request_termination(_pid: u32) -> bool {
    false
}
