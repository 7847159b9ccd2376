//! Subprocess launcher.
//!
//! Runs a resolved tool as a child process with a capped environment, a
//! deadline, bounded output capture, and a hard refusal of symlink
//! targets. The launcher never returns an error: every failure mode is
//! folded into a complete `LaunchOutput` so the caller has exactly one
//! result shape to reason about.

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};

/// Captured stdout is truncated beyond this many bytes.
pub const STDOUT_CAP: usize = 100 * 1024;
/// Captured stderr is truncated beyond this many bytes.
pub const STDERR_CAP: usize = 50 * 1024;
/// Time between the graceful and the forceful termination signal.
pub const GRACE_WINDOW: Duration = Duration::from_secs(5);
/// After the child has settled, how long to wait for its output pipes. A
/// lingering grandchild can hold the pipes open indefinitely; the
/// launcher does not wait for it.
const DRAIN_WINDOW: Duration = Duration::from_millis(250);
/// Exit code reserved for an orchestrator-induced timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 124;
/// Marker appended to stderr when the deadline expired.
pub const TIMEOUT_MARKER: &str = "[TIMEOUT]";
/// Refusal message for symlinks and non-regular files.
pub const REFUSAL_MESSAGE: &str = "Refused symlink/non-file tool";

/// The only parent-env keys that may leak into a child. Everything else
/// is dropped; `extra_env` layers on top of this set.
pub const ENV_ALLOW_LIST: &[&str] = &[
    "PATH",
    "HOME",
    "SHELL",
    "CTK_RUN_ID",
    "CTK_PROJECT",
    "CTK_STRICT_MODE",
    "CTK_PARALLEL_PHASE",
];

/// One tool invocation.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub path: PathBuf,
    pub args: Vec<String>,
    pub extra_env: BTreeMap<String, String>,
    pub deadline: Duration,
    /// Working directory; defaults to the directory containing the tool.
    pub cwd: Option<PathBuf>,
}

impl LaunchSpec {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            args: Vec::new(),
            extra_env: BTreeMap::new(),
            deadline: Duration::from_millis(crate::settings::DEFAULT_TOOL_TIMEOUT_MS),
            cwd: None,
        }
    }
}

/// Complete result of a launch. Always produced, never thrown past.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl LaunchOutput {
    fn failure(message: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            stdout: String::new(),
            stderr: message.into(),
        }
    }

    pub fn timed_out(&self) -> bool {
        self.exit_code == TIMEOUT_EXIT_CODE
    }
}

/// Run a tool to completion under the spec's deadline.
pub async fn run(spec: &LaunchSpec) -> LaunchOutput {
    // Refuse symlinks outright, before any path resolution.
    let meta = match spec.path.symlink_metadata() {
        Ok(meta) => meta,
        Err(err) => return LaunchOutput::failure(format!("Tool not accessible: {err}")),
    };
    if meta.file_type().is_symlink() {
        tracing::warn!(path = %spec.path.display(), "refusing symlink tool");
        return LaunchOutput::failure(REFUSAL_MESSAGE);
    }

    let real_path = match spec.path.canonicalize() {
        Ok(path) => path,
        Err(err) => return LaunchOutput::failure(format!("Tool not accessible: {err}")),
    };
    let is_file = real_path.metadata().map(|m| m.is_file()).unwrap_or(false);
    if !is_file {
        return LaunchOutput::failure(REFUSAL_MESSAGE);
    }

    let mut cmd = command_for(&real_path);
    cmd.args(&spec.args);

    cmd.env_clear();
    for key in ENV_ALLOW_LIST {
        if let Ok(value) = std::env::var(key) {
            cmd.env(key, value);
        }
    }
    for (key, value) in &spec.extra_env {
        cmd.env(key, value);
    }

    let cwd = spec
        .cwd
        .clone()
        .or_else(|| real_path.parent().map(Path::to_path_buf));
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => return LaunchOutput::failure(format!("Failed to spawn tool: {err}")),
    };

    let stdout_buf: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
    let stderr_buf: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
    let mut stdout_task = tokio::spawn(capture(
        child.stdout.take(),
        STDOUT_CAP,
        Arc::clone(&stdout_buf),
    ));
    let mut stderr_task = tokio::spawn(capture(
        child.stderr.take(),
        STDERR_CAP,
        Arc::clone(&stderr_buf),
    ));

    let mut timed_out = false;
    let status = tokio::select! {
        status = child.wait() => status.ok(),
        _ = tokio::time::sleep(spec.deadline) => {
            timed_out = true;
            terminate(&mut child).await;
            None
        }
    };

    // The child has settled; drain what the pipes still hold, but never
    // block on a grandchild that inherited them.
    let drained = tokio::time::timeout(DRAIN_WINDOW, async {
        let _ = (&mut stdout_task).await;
        let _ = (&mut stderr_task).await;
    })
    .await;
    if drained.is_err() {
        stdout_task.abort();
        stderr_task.abort();
    }

    let stdout = take_buffer(&stdout_buf);
    let mut stderr = take_buffer(&stderr_buf);

    if timed_out {
        tracing::warn!(path = %spec.path.display(), deadline_ms = spec.deadline.as_millis() as u64, "tool deadline expired");
        if !stderr.is_empty() && !stderr.ends_with('\n') {
            stderr.push('\n');
        }
        stderr.push_str(TIMEOUT_MARKER);
        return LaunchOutput {
            exit_code: TIMEOUT_EXIT_CODE,
            stdout,
            stderr,
        };
    }

    // Killed-by-signal carries no code; map it to a plain failure.
    let exit_code = status.and_then(|s| s.code()).unwrap_or(1);
    LaunchOutput {
        exit_code,
        stdout,
        stderr,
    }
}

/// Pick the interpreter from the real path's extension. Unrecognized
/// extensions run through the allow-listed shell.
fn command_for(real_path: &Path) -> Command {
    let ext = real_path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let interpreter = match ext {
        "sh" => Some("sh"),
        "bash" => Some("bash"),
        "py" => Some("python3"),
        "js" => Some("node"),
        _ => None,
    };
    let mut cmd = match interpreter {
        Some(bin) => Command::new(bin),
        None => Command::new(std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())),
    };
    cmd.arg(real_path);
    cmd
}

/// Graceful SIGTERM, then a forceful kill after the grace window.
async fn terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
    }
    if tokio::time::timeout(GRACE_WINDOW, child.wait()).await.is_err() {
        let _ = child.kill().await;
    }
}

/// Drain a child stream, retaining at most `cap` bytes in `sink`.
/// Draining past the cap keeps the child from blocking on a full pipe;
/// writing through a shared sink keeps partial output available even if
/// the drain is cut short.
async fn capture<R: AsyncReadExt + Unpin>(stream: Option<R>, cap: usize, sink: Arc<Mutex<Vec<u8>>>) {
    let Some(mut stream) = stream else {
        return;
    };
    let mut chunk = [0u8; 8192];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let mut kept = match sink.lock() {
                    Ok(kept) => kept,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if kept.len() < cap {
                    let take = n.min(cap - kept.len());
                    kept.extend_from_slice(&chunk[..take]);
                }
            }
        }
    }
}

fn take_buffer(buf: &Arc<Mutex<Vec<u8>>>) -> String {
    let kept = match buf.lock() {
        Ok(kept) => kept,
        Err(poisoned) => poisoned.into_inner(),
    };
    String::from_utf8_lossy(&kept).into_owned()
}
