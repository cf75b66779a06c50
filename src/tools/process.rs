//! Tool-server process handle.
//!
//! Spawns the tool server as a child process with piped stdio:
//! - `kill_on_drop(true)` so a dropped handle never leaks a process.
//! - stderr is drained into `tracing` so the pipe can never fill up and
//!   stall the server.
//! - no environment overrides; the child inherits the parent environment.
//!
//! Shutdown follows the stdio convention: the caller drops the stdin half
//! first (EOF), then [`ToolProcess::terminate`] waits, escalates to
//! `SIGTERM`, and finally force-kills.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::ToolError;

/// How to launch the tool server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessConfig {
    /// Interpreter or runtime binary (e.g. `python3`).
    pub command: String,
    /// Script passed as the single argument to `command`.
    pub script: PathBuf,
    /// Working directory for the child; inherits the parent's when `None`.
    pub working_dir: Option<PathBuf>,
}

/// A spawned tool-server process.
///
/// Owns the [`Child`]; the stdio halves are handed to the protocol layer
/// by [`ToolProcess::spawn`].
#[derive(Debug)]
pub struct ToolProcess {
    child: Child,
    pid: Option<u32>,
    stderr_task: Option<JoinHandle<()>>,
}

impl ToolProcess {
    /// Spawn the tool server and capture its stdio.
    ///
    /// Returns the process handle, the inbound half (child stdout) and the
    /// outbound half (child stdin).
    ///
    /// # Errors
    ///
    /// Returns [`ToolErrorKind::ProcessStartFailed`](crate::errors::ToolErrorKind::ProcessStartFailed)
    /// if the script does not exist, the OS refuses to start the command, or
    /// a pipe cannot be captured. A process that did start is killed before
    /// the error is returned.
    pub fn spawn(config: &ProcessConfig) -> Result<(Self, ChildStdout, ChildStdin), ToolError> {
        let script = match config.working_dir {
            Some(ref dir) if config.script.is_relative() => dir.join(&config.script),
            _ => config.script.clone(),
        };
        if !script.is_file() {
            return Err(ToolError::process_start(format!(
                "tool script not found: {}",
                script.display()
            )));
        }

        let mut cmd = Command::new(&config.command);
        cmd.arg(&script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref dir) = config.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|err| {
            ToolError::process_start(format!(
                "failed to spawn `{}`: {err}",
                config.command
            ))
        })?;
        let pid = child.id();

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            child.start_kill().ok();
            return Err(ToolError::process_start(
                "failed to capture tool server stdio",
            ));
        };
        let stderr_task = child.stderr.take().map(|stderr| drain_stderr(pid, stderr));

        info!(
            pid = pid.unwrap_or(0),
            command = %config.command,
            script = %script.display(),
            "tool server spawned"
        );

        Ok((
            Self {
                child,
                pid,
                stderr_task,
            },
            stdout,
            stdin,
        ))
    }

    /// OS process id, if the process has not been reaped.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Stop the process without leaking it, even if it ignores requests.
    ///
    /// Waits half of `grace` for a voluntary exit (the caller should have
    /// dropped stdin already), sends `SIGTERM` on unix and waits the other
    /// half, then force-kills. Failures are logged, never returned.
    pub async fn terminate(mut self, grace: Duration) {
        let pid = self.pid.unwrap_or(0);
        let half = grace / 2;

        match self.child.try_wait() {
            Ok(Some(status)) => {
                debug!(pid, ?status, "tool server already exited");
            }
            Ok(None) => {
                if let Ok(Ok(status)) = tokio::time::timeout(half, self.child.wait()).await {
                    info!(pid, ?status, "tool server exited after stdin closed");
                } else {
                    request_exit(self.pid);
                    match tokio::time::timeout(half, self.child.wait()).await {
                        Ok(Ok(status)) => info!(pid, ?status, "tool server exited"),
                        Ok(Err(err)) => warn!(pid, %err, "error waiting for tool server"),
                        Err(_) => {
                            warn!(pid, "tool server ignored shutdown, forcing kill");
                            if let Err(err) = self.child.kill().await {
                                warn!(pid, %err, "failed to force-kill tool server");
                            }
                        }
                    }
                }
            }
            Err(err) => {
                warn!(pid, %err, "failed to poll tool server status, forcing kill");
                if let Err(err) = self.child.kill().await {
                    warn!(pid, %err, "failed to force-kill tool server");
                }
            }
        }

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }
}

/// Forward each stderr line of the child to the log at `DEBUG`.
fn drain_stderr(pid: Option<u32>, stderr: ChildStderr) -> JoinHandle<()> {
    let pid = pid.unwrap_or(0);
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => debug!(pid, line = %line, "tool server stderr"),
                Ok(None) => break,
                Err(err) => {
                    debug!(pid, %err, "tool server stderr closed with error");
                    break;
                }
            }
        }
    })
}

#[cfg(unix)]
fn request_exit(pid: Option<u32>) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(raw) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    if let Err(err) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
        debug!(pid = raw, %err, "SIGTERM delivery failed");
    }
}

#[cfg(not(unix))]
fn request_exit(_pid: Option<u32>) {}
