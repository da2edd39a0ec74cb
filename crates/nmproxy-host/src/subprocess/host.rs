//! Native host subprocess lifecycle.
//!
//! Spawns the real native host with piped stdio, forwards its stderr to
//! telemetry, and tears it down once the relay is over.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use nmproxy_core::{RelaySession, TelemetrySink};

use crate::relay::StreamPair;

/// Stderr lines are cut to this many characters in events.
pub const STDERR_EVENT_CHARS: usize = 500;

/// How long to wait for the stderr forwarder after the host exits.
const STDERR_FLUSH_TIMEOUT: Duration = Duration::from_millis(200);

/// Configuration for spawning the native host.
#[derive(Debug, Clone)]
pub struct HostSpawnConfig {
    /// Executable to run.
    pub path: PathBuf,
    /// Arguments passed through unchanged.
    pub args: Vec<String>,
    /// Grace period at each teardown step before escalating.
    pub terminate_timeout: Duration,
}

/// Handle to the running native host.
pub struct HostProcess {
    child: Child,
    pid: Option<u32>,
    path: PathBuf,
    terminate_timeout: Duration,
    stderr_task: Option<JoinHandle<()>>,
    session: Arc<RelaySession>,
    sink: Arc<dyn TelemetrySink>,
}

impl std::fmt::Debug for HostProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostProcess")
            .field("pid", &self.pid)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl HostProcess {
    /// Spawn the host with all three standard streams piped.
    pub fn spawn(
        config: &HostSpawnConfig,
        session: Arc<RelaySession>,
        sink: Arc<dyn TelemetrySink>,
    ) -> Result<Self, SubprocessError> {
        let mut cmd = Command::new(&config.path);
        cmd.args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(
            path = %config.path.display(),
            args = ?config.args,
            "Spawning native host"
        );
        let mut child = cmd.spawn().map_err(|e| SubprocessError::SpawnFailed {
            path: config.path.clone(),
            reason: e.to_string(),
        })?;
        let pid = child.id();

        sink.log_event(
            "real_host_spawn",
            &session,
            json!({
                "real_host_path": config.path.display().to_string(),
                "real_host_pid": pid,
            }),
        );

        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(forward_stderr(stderr, session.clone(), sink.clone())));

        Ok(Self {
            child,
            pid,
            path: config.path.clone(),
            terminate_timeout: config.terminate_timeout,
            stderr_task,
            session,
            sink,
        })
    }

    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Take the host's stdout (reader) and stdin (writer) for relaying.
    ///
    /// Fails on the second call.
    pub fn take_stdio(&mut self) -> Result<StreamPair<ChildStdout, ChildStdin>, SubprocessError> {
        let stdin = self
            .child
            .stdin
            .take()
            .ok_or(SubprocessError::StdioUnavailable { stream: "stdin" })?;
        let stdout = self
            .child
            .stdout
            .take()
            .ok_or(SubprocessError::StdioUnavailable { stream: "stdout" })?;
        Ok(StreamPair::new(stdout, stdin))
    }

    /// Wait for the host to exit after its stdin was closed, escalating to
    /// SIGTERM and then SIGKILL if it lingers.
    pub async fn shutdown(mut self) -> Option<i32> {
        let status = match tokio::time::timeout(self.terminate_timeout, self.child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                warn!(error = %e, "Error waiting for native host");
                None
            }
            Err(_) => {
                info!(
                    timeout_secs = self.terminate_timeout.as_secs_f64(),
                    "Native host still running after stdin close"
                );
                self.terminate_and_wait().await
            }
        };
        self.finish(status).await
    }

    /// Terminate the host right away, used when the proxy itself is
    /// signalled.
    pub async fn terminate(mut self) -> Option<i32> {
        let status = match self.child.try_wait() {
            Ok(Some(status)) => Some(status),
            _ => self.terminate_and_wait().await,
        };
        self.finish(status).await
    }

    async fn terminate_and_wait(&mut self) -> Option<ExitStatus> {
        self.send_sigterm();

        match tokio::time::timeout(self.terminate_timeout, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(?status, "Native host exited after SIGTERM");
                Some(status)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Error waiting for native host");
                self.kill_and_wait().await
            }
            Err(_) => {
                warn!("Timeout waiting for native host, killing");
                self.kill_and_wait().await
            }
        }
    }

    async fn kill_and_wait(&mut self) -> Option<ExitStatus> {
        if let Err(e) = self.child.kill().await {
            warn!(error = %e, "Failed to kill native host");
        }
        self.child.wait().await.ok()
    }

    #[cfg(unix)]
    fn send_sigterm(&self) {
        let Some(pid) = self.child.id() else {
            return;
        };
        // SAFETY: pid comes from our own live Child handle.
        // kill(2) with SIGTERM is safe to call on any owned subprocess.
        #[allow(unsafe_code)]
        #[allow(clippy::cast_possible_wrap)]
        let ret = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
        if ret != 0 {
            let err = std::io::Error::last_os_error();
            warn!(pid, error = %err, "Failed to send SIGTERM");
        }
    }

    #[cfg(not(unix))]
    fn send_sigterm(&self) {}

    async fn finish(mut self, status: Option<ExitStatus>) -> Option<i32> {
        if let Some(task) = self.stderr_task.take()
            && tokio::time::timeout(STDERR_FLUSH_TIMEOUT, task).await.is_err()
        {
            debug!("Stderr forwarder still running, leaving it behind");
        }

        let exit_code = status.and_then(|s| s.code());
        info!(path = %self.path.display(), ?status, "Native host exited");
        self.sink.log_text(&format!(
            "Real host exited with code {}",
            exit_code.map_or_else(|| "none".to_string(), |c| c.to_string())
        ));
        self.sink.log_event(
            "real_host_exit",
            &self.session,
            json!({ "exit_code": exit_code }),
        );
        exit_code
    }
}

/// Forward each stderr line to the text log and as a truncated event.
async fn forward_stderr(
    stderr: ChildStderr,
    session: Arc<RelaySession>,
    sink: Arc<dyn TelemetrySink>,
) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                sink.log_text(&format!("[Real Host stderr] {line}"));
                sink.log_event(
                    "real_host_stderr",
                    &session,
                    json!({ "data": truncate_chars(line, STDERR_EVENT_CHARS) }),
                );
            }
            Err(e) => {
                debug!(error = %e, "Native host stderr read failed");
                break;
            }
        }
    }
    debug!("Native host stderr closed");
}

fn truncate_chars(s: &str, max: usize) -> &str {
    s.char_indices().nth(max).map_or(s, |(idx, _)| &s[..idx])
}

/// Errors from host process operations.
#[derive(Debug, thiserror::Error)]
pub enum SubprocessError {
    #[error("Failed to spawn {}: {reason}", path.display())]
    SpawnFailed { path: PathBuf, reason: String },

    #[error("Native host {stream} is not available")]
    StdioUnavailable { stream: &'static str },
}
