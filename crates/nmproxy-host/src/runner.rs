//! Proxy session driver.
//!
//! Ensures the companion is up, spawns the native host, relays frames until
//! either side stops or a shutdown signal arrives, then tears everything
//! down and reports the session summary.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde_json::json;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{error, info, warn};

use nmproxy_core::{Config, RelaySession, TelemetrySink};

use crate::companion::{Companion, LaunchError};
use crate::relay::{DuplexRelay, ExitOutcome, RelayOptions, StreamPair};
use crate::subprocess::{HostProcess, HostSpawnConfig};

/// Process exit code after a relay session, clean or not.
pub const EXIT_OK: i32 = 0;
/// Process exit code when the companion or native host could not be started.
pub const EXIT_SETUP_FAILURE: i32 = 1;

/// Signal that asked the proxy to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl ShutdownSignal {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
        }
    }
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runs one proxy session end to end.
pub struct ProxyRunner {
    config: Config,
    session: Arc<RelaySession>,
    sink: Arc<dyn TelemetrySink>,
    companion: Option<Arc<dyn Companion>>,
    forwarded_args: Vec<String>,
}

impl ProxyRunner {
    pub fn new(config: Config, session: Arc<RelaySession>, sink: Arc<dyn TelemetrySink>) -> Self {
        Self {
            config,
            session,
            sink,
            companion: None,
            forwarded_args: Vec::new(),
        }
    }

    /// Check for (and if needed launch) `companion` before the host starts.
    #[must_use]
    pub fn with_companion(mut self, companion: Arc<dyn Companion>) -> Self {
        self.companion = Some(companion);
        self
    }

    /// Extra arguments appended to the configured host arguments.
    #[must_use]
    pub fn with_forwarded_args(mut self, args: Vec<String>) -> Self {
        self.forwarded_args = args;
        self
    }

    pub const fn session(&self) -> &Arc<RelaySession> {
        &self.session
    }

    /// Run the session with `upstream` as the extension side.
    ///
    /// Returns the process exit code.
    pub async fn run<R, W, S>(&self, upstream: StreamPair<R, W>, shutdown: S) -> i32
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
        S: Future<Output = ShutdownSignal>,
    {
        self.sink.log_text("=== Native Messaging Proxy Started ===");
        self.sink.log_event(
            "proxy_start",
            &self.session,
            json!({
                "real_native_host": self.config.host.path.display().to_string(),
                "plugin_dir": self.config.companion.plugin_dir.display().to_string(),
                "version": env!("CARGO_PKG_VERSION"),
            }),
        );

        if let Err(e) = self.ensure_companion().await {
            error!(error = %e, "Companion launch failed");
            self.sink.log_text(&format!("Error launching companion: {e}"));
            return self.finish(EXIT_SETUP_FAILURE);
        }

        let spawn_config = self.spawn_config();
        let spawned = HostProcess::spawn(&spawn_config, self.session.clone(), self.sink.clone());
        let mut host = match spawned {
            Ok(host) => host,
            Err(e) => {
                error!(error = %e, "Native host spawn failed");
                self.sink.log_text(&format!("Error starting real host: {e}"));
                return self.finish(EXIT_SETUP_FAILURE);
            }
        };
        self.sink.log_text(&format!(
            "Spawned real native host (PID: {})",
            host.pid().map_or_else(|| "unknown".to_string(), |p| p.to_string())
        ));

        let downstream = match host.take_stdio() {
            Ok(stdio) => stdio,
            Err(e) => {
                error!(error = %e, "Native host stdio unavailable");
                self.sink.log_text(&format!("Error starting real host: {e}"));
                host.terminate().await;
                return self.finish(EXIT_SETUP_FAILURE);
            }
        };

        let relay = DuplexRelay::new(
            self.session.clone(),
            self.sink.clone(),
            RelayOptions::from(&self.config.relay),
        );

        let mut shutdown = std::pin::pin!(shutdown);
        let outcome = tokio::select! {
            outcome = relay.run(upstream, downstream) => Some(outcome),
            signal = &mut shutdown => {
                info!(%signal, "Shutdown signal received");
                self.sink.log_text(&format!("Received {signal}, shutting down..."));
                self.sink.log_event(
                    "proxy_shutdown",
                    &self.session,
                    json!({ "signal": signal.as_str() }),
                );
                None
            }
        };

        match outcome {
            Some(outcome) => {
                self.report_outcome(&outcome);
                host.shutdown().await;
            }
            None => {
                host.terminate().await;
            }
        }

        self.finish(EXIT_OK)
    }

    async fn ensure_companion(&self) -> Result<(), LaunchError> {
        let Some(companion) = &self.companion else {
            info!("Companion check disabled");
            self.record_companion_status("disabled");
            return Ok(());
        };

        if companion.is_running() {
            self.sink.log_text("Companion already running");
            self.record_companion_status("already_running");
            return Ok(());
        }

        self.sink.log_text("Companion not running, launching...");
        self.record_companion_status("not_running");

        let launch = companion.launch()?;
        self.sink.log_event(
            "chrome_launched",
            &self.session,
            json!({
                "launch_script": launch.launch_script.display().to_string(),
                "chrome_pid": launch.pid,
            }),
        );

        tokio::time::sleep(companion.startup_grace()).await;
        self.sink.log_text("Companion started");
        self.record_companion_status("started");
        Ok(())
    }

    fn record_companion_status(&self, status: &str) {
        self.sink.log_event("chrome_check", &self.session, json!({ "status": status }));
    }

    fn spawn_config(&self) -> HostSpawnConfig {
        let mut args = self.config.host.args.clone();
        args.extend(self.forwarded_args.iter().cloned());
        HostSpawnConfig {
            path: self.config.host.path.clone(),
            args,
            terminate_timeout: self.config.host.terminate_timeout(),
        }
    }

    fn report_outcome(&self, outcome: &ExitOutcome) {
        let first = &outcome.first;
        if outcome.is_clean() {
            info!(direction = %first.direction, "Relay finished");
            self.sink.log_text(&format!("{} disconnected", first.direction.from()));
        } else {
            warn!(direction = %first.direction, reason = %first.reason, "Relay stopped on error");
        }
    }

    fn finish(&self, exit_code: i32) -> i32 {
        let summary = self.session.summary();
        info!(
            message_count = summary.message_count,
            duration_seconds = summary.duration_seconds,
            exit_code,
            "Proxy exiting"
        );
        self.sink.log_text(&format!("Proxy exiting after {} messages", summary.message_count));
        self.sink.log_event(
            "proxy_exit",
            &self.session,
            json!({
                "message_count": summary.message_count,
                "duration_seconds": summary.duration_seconds,
                "exit_code": exit_code,
            }),
        );
        exit_code
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use nmproxy_core::telemetry::MemorySink;

    use super::*;
    use crate::companion::LaunchInfo;

    struct FakeCompanion {
        running: bool,
        fail: bool,
        launches: AtomicUsize,
    }

    impl FakeCompanion {
        fn new(running: bool, fail: bool) -> Self {
            Self {
                running,
                fail,
                launches: AtomicUsize::new(0),
            }
        }
    }

    impl Companion for FakeCompanion {
        fn is_running(&self) -> bool {
            self.running
        }

        fn launch(&self) -> Result<LaunchInfo, LaunchError> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(LaunchError::ScriptNotFound {
                    path: PathBuf::from("/missing/launch.sh"),
                });
            }
            Ok(LaunchInfo {
                launch_script: PathBuf::from("/fake/launch.sh"),
                pid: Some(7),
            })
        }

        fn startup_grace(&self) -> Duration {
            Duration::ZERO
        }
    }

    fn runner(host: &str, sink: &Arc<MemorySink>) -> ProxyRunner {
        let mut config = Config::default();
        config.host.path = PathBuf::from(host);
        config.relay.drain_timeout_ms = 50;
        config.host.terminate_timeout_secs = 1;
        ProxyRunner::new(
            config,
            Arc::new(RelaySession::with_identity("proxy-1-1", 1)),
            sink.clone(),
        )
    }

    fn closed_upstream() -> StreamPair<&'static [u8], tokio::io::Sink> {
        StreamPair::new(&[][..], tokio::io::sink())
    }

    fn no_signal() -> std::future::Pending<ShutdownSignal> {
        std::future::pending()
    }

    #[test]
    fn signal_names() {
        assert_eq!(ShutdownSignal::Interrupt.to_string(), "SIGINT");
        assert_eq!(ShutdownSignal::Terminate.as_str(), "SIGTERM");
    }

    #[test]
    fn forwarded_args_follow_configured_args() {
        let sink = Arc::new(MemorySink::new());
        let args = vec!["chrome-extension://abc/".to_string()];
        let mut runner = runner("host", &sink).with_forwarded_args(args);
        runner.config.host.args = vec!["--flag".into()];
        assert_eq!(
            runner.spawn_config().args,
            vec!["--flag".to_string(), "chrome-extension://abc/".to_string()]
        );
    }

    #[tokio::test]
    async fn companion_launch_failure_exits_with_setup_failure() {
        let sink = Arc::new(MemorySink::new());
        let companion = Arc::new(FakeCompanion::new(false, true));
        let runner = runner("/nonexistent/host", &sink).with_companion(companion.clone());

        let code = runner.run(closed_upstream(), no_signal()).await;

        assert_eq!(code, EXIT_SETUP_FAILURE);
        assert_eq!(companion.launches.load(Ordering::SeqCst), 1);
        assert!(sink.events_of("real_host_spawn").is_empty());
        let exit = sink.events_of("proxy_exit");
        assert_eq!(exit[0].data["exit_code"], EXIT_SETUP_FAILURE);
    }

    #[tokio::test]
    async fn running_companion_is_not_relaunched() {
        let sink = Arc::new(MemorySink::new());
        let companion = Arc::new(FakeCompanion::new(true, false));
        let runner = runner("/nonexistent/host", &sink).with_companion(companion.clone());

        let code = runner.run(closed_upstream(), no_signal()).await;

        // Spawning the missing host is what fails here.
        assert_eq!(code, EXIT_SETUP_FAILURE);
        assert_eq!(companion.launches.load(Ordering::SeqCst), 0);
        assert_eq!(sink.events_of("chrome_check")[0].data["status"], "already_running");
    }

    #[tokio::test]
    async fn launched_companion_is_recorded() {
        let sink = Arc::new(MemorySink::new());
        let companion = Arc::new(FakeCompanion::new(false, false));
        let runner = runner("/nonexistent/host", &sink).with_companion(companion);

        runner.run(closed_upstream(), no_signal()).await;

        let launched = sink.events_of("chrome_launched");
        assert_eq!(launched.len(), 1);
        assert_eq!(launched[0].data["chrome_pid"], 7);
        let statuses: Vec<_> = sink
            .events_of("chrome_check")
            .into_iter()
            .map(|e| e.data["status"].clone())
            .collect();
        assert_eq!(statuses, vec!["not_running", "started"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn closed_extension_ends_session_with_zero() {
        let sink = Arc::new(MemorySink::new());
        let runner = runner("cat", &sink);

        let code = runner.run(closed_upstream(), no_signal()).await;

        assert_eq!(code, EXIT_OK);
        assert_eq!(sink.events_of("chrome_check")[0].data["status"], "disabled");
        assert_eq!(sink.events_of("real_host_exit")[0].data["exit_code"], 0);
        let exit = sink.events_of("proxy_exit");
        assert_eq!(exit[0].data["message_count"], 0);
        assert_eq!(exit[0].data["exit_code"], EXIT_OK);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shutdown_signal_terminates_host() {
        let sink = Arc::new(MemorySink::new());
        let runner = runner("cat", &sink);
        let (_ext_side, proxy_side) = tokio::io::duplex(64);
        let (reader, writer) = tokio::io::split(proxy_side);

        let signal = std::future::ready(ShutdownSignal::Terminate);
        let code = runner.run(StreamPair::new(reader, writer), signal).await;

        assert_eq!(code, EXIT_OK);
        assert_eq!(sink.events_of("proxy_shutdown")[0].data["signal"], "SIGTERM");
        assert_eq!(sink.events_of("real_host_exit").len(), 1);
    }
}
