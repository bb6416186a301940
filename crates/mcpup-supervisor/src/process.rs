//! Unix process-group lifecycle for stdio child processes.
//!
//! # Interior Mutability Pattern
//!
//! Mirrors the hybrid mutex pattern used elsewhere in this subsystem:
//! `tokio::sync::Mutex` guards the child handle because shutdown crosses
//! `.await` points; everything else is plain owned state captured at spawn
//! time and never mutated afterward.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex as TokioMutex, mpsc};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::SupervisorError;

/// Graceful MCP close budget: stdin EOF, waiting for the child to exit on
/// its own. Must stay greater than [`SIGTERM_GRACE`].
pub const MCP_CLOSE_TIMEOUT: Duration = Duration::from_secs(10);
/// SIGTERM grace period once the graceful close has timed out.
pub const SIGTERM_GRACE: Duration = Duration::from_secs(9);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

const _: () = assert!(SIGTERM_GRACE.as_secs() < MCP_CLOSE_TIMEOUT.as_secs());

/// A single non-empty, timestamped line read from the child's stderr.
#[derive(Debug, Clone)]
pub struct StderrLine {
    pub line: String,
    pub timestamp_unix_ms: u128,
}

/// A spawned stdio child and the bookkeeping needed to tear it down.
pub struct ProcessHandle {
    child: TokioMutex<Option<Child>>,
    pgid: Option<i32>,
    pub stderr_rx: TokioMutex<mpsc::Receiver<StderrLine>>,
    stdio: TokioMutex<Option<(ChildStdin, ChildStdout)>>,
}

impl ProcessHandle {
    /// Spawns `command` as the leader of a new process group (Unix) so a
    /// single signal can reach every descendant it forks. On Windows there is
    /// no process-group equivalent available without a job-object API, so we
    /// fall back to tracking the PID and killing it directly.
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &[(String, String)],
        working_dir: Option<&str>,
    ) -> Result<Self, SupervisorError> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        #[cfg(unix)]
        {
            cmd.process_group(0);
        }
        #[cfg(windows)]
        {
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            std::os::windows::process::CommandExt::creation_flags(&mut cmd, CREATE_NO_WINDOW);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| SupervisorError::Spawn(format!("{command}: {e}")))?;

        let pgid = child.id().map(|pid| pid as i32);

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stdio = stdin.zip(stdout);

        let stderr = child.stderr.take();
        let (tx, rx) = mpsc::channel(256);
        if let Some(stderr) = stderr {
            tokio::spawn(stderr_monitor(stderr, tx));
        }

        Ok(Self {
            child: TokioMutex::new(Some(child)),
            pgid,
            stderr_rx: TokioMutex::new(rx),
            stdio: TokioMutex::new(stdio),
        })
    }

    pub fn process_group_id(&self) -> Option<i32> {
        self.pgid
    }

    pub fn pid(&self) -> Option<u32> {
        self.pgid.map(|p| p as u32)
    }

    /// Takes the piped stdin/stdout captured at spawn time, handing wire
    /// ownership to a transport while this handle keeps the `Child` itself
    /// for signal-based shutdown. Returns `None` if already taken, or if the
    /// child's streams were not piped (shouldn't happen for anything spawned
    /// via [`ProcessHandle::spawn`]).
    pub async fn take_stdio(&self) -> Option<(ChildStdin, ChildStdout)> {
        self.stdio.lock().await.take()
    }

    /// Escalating shutdown: stdin EOF, then SIGTERM to the process group,
    /// then SIGKILL. Each step is bounded and idempotent; a child that is
    /// already gone short-circuits the remaining steps.
    pub async fn shutdown(&self) -> Result<(), SupervisorError> {
        let mut guard = self.child.lock().await;
        let Some(child) = guard.as_mut() else {
            return Ok(());
        };

        // Step 1: close stdin so a well-behaved MCP server sees EOF and exits.
        drop(child.stdin.take());
        if let Ok(Ok(status)) = timeout(MCP_CLOSE_TIMEOUT, child.wait()).await {
            info!(?status, "child exited after stdin close");
            *guard = None;
            return Ok(());
        }

        // Step 2: SIGTERM the whole process group.
        #[cfg(unix)]
        if let Some(pgid) = self.pgid {
            if let Err(e) = send_signal(pgid, nix::sys::signal::Signal::SIGTERM) {
                warn!(pgid, error = %e, "failed to send SIGTERM to process group");
            }
            let deadline = tokio::time::Instant::now() + SIGTERM_GRACE;
            loop {
                match child.try_wait() {
                    Ok(Some(status)) => {
                        info!(?status, "child exited after SIGTERM");
                        *guard = None;
                        return Ok(());
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!(error = %e, "error polling child after SIGTERM");
                        break;
                    }
                }
                if tokio::time::Instant::now() >= deadline {
                    break;
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }

        // Step 3: SIGKILL. On Windows this is the only escalation available.
        #[cfg(unix)]
        if let Some(pgid) = self.pgid {
            if let Err(e) = send_signal(pgid, nix::sys::signal::Signal::SIGKILL) {
                warn!(pgid, error = %e, "failed to send SIGKILL to process group");
            }
        }
        if let Err(e) = child.start_kill() {
            debug!(error = %e, "start_kill failed, child likely already gone");
        }
        let _ = child.wait().await;
        *guard = None;
        Ok(())
    }

    pub async fn try_wait(&self) -> Result<Option<std::process::ExitStatus>, SupervisorError> {
        let mut guard = self.child.lock().await;
        match guard.as_mut() {
            Some(child) => child.try_wait().map_err(|e| SupervisorError::Io(e.to_string())),
            None => Ok(None),
        }
    }
}

#[cfg(unix)]
fn send_signal(pgid: i32, signal: nix::sys::signal::Signal) -> Result<(), nix::Error> {
    // Negative pid targets the whole process group.
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(-pgid), signal)
}

async fn stderr_monitor(stderr: tokio::process::ChildStderr, tx: mpsc::Sender<StderrLine>) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                let timestamp_unix_ms = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_millis())
                    .unwrap_or(0);
                if tx.send(StderrLine { line, timestamp_unix_ms }).await.is_err() {
                    return;
                }
            }
            Ok(None) => {
                debug!("stderr closed (EOF)");
                return;
            }
            Err(e) => {
                // Broken pipe here usually means the child, or its container,
                // died out from under us rather than a clean close.
                error!(error = %e, "stderr read error, container/process likely died");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_command_spawns_and_reports_pid() {
        let handle = ProcessHandle::spawn("echo", &["hello".to_string()], &[], None).unwrap();
        assert!(handle.pid().is_some());
        // Give the stderr monitor and the process itself a moment.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = handle.shutdown().await;
    }

    #[tokio::test]
    async fn missing_binary_errors_on_spawn() {
        let result = ProcessHandle::spawn("definitely-not-a-real-binary-xyz", &[], &[], None);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let handle = ProcessHandle::spawn("sleep", &["0".to_string()], &[], None).unwrap();
        handle.shutdown().await.unwrap();
        handle.shutdown().await.unwrap();
    }
}
