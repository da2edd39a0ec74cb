//! nmproxy
//!
//! Registered with the browser in place of the real native messaging host.
//! Relays length-prefixed frames between the extension (our stdin/stdout)
//! and the real host subprocess, logging every message on the way.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use nmproxy_core::config::load_config;
use nmproxy_core::telemetry::FileSink;
use nmproxy_core::tracing_init::{default_filter, init_tracing};
use nmproxy_core::{Config, RelaySession, TelemetrySink};
use nmproxy_host::companion::PidFileCompanion;
use nmproxy_host::relay::StreamPair;
use nmproxy_host::runner::{ProxyRunner, ShutdownSignal};

#[derive(Parser, Debug)]
#[command(name = "nmproxy")]
#[command(version, about = "Transparent native messaging relay")]
struct Args {
    /// Settings file (JSON). Defaults to the per-user settings file if present.
    #[arg(long, env = "NMPROXY_CONFIG")]
    config: Option<PathBuf>,

    /// Path to the real native messaging host.
    #[arg(long)]
    host: Option<PathBuf>,

    /// Directory for the text log and the JSONL event log.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Log level filter (e.g. "info", "debug", "warn").
    #[arg(long)]
    log_level: Option<String>,

    /// Output diagnostics on stderr as JSON.
    #[arg(long)]
    log_json: bool,

    /// Skip the companion check and launch.
    #[arg(long)]
    no_companion: bool,

    /// Largest accepted frame payload in bytes.
    #[arg(long)]
    max_frame_bytes: Option<u32>,

    /// Arguments the browser passes to the host (extension origin, window handle).
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    host_arguments: Vec<String>,
}

impl Args {
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.host.path.clone_from(host);
        }
        if let Some(dir) = &self.log_dir {
            config.logging.log_dir.clone_from(dir);
        }
        if let Some(level) = &self.log_level {
            config.logging.log_level.clone_from(level);
        }
        if self.log_json {
            config.logging.log_json = true;
        }
        if self.no_companion {
            config.companion.enabled = false;
        }
        if let Some(max) = self.max_frame_bytes {
            config.relay.max_frame_bytes = max;
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref())?;
    args.apply_overrides(&mut config);
    config.validate()?;

    init_tracing(
        &default_filter(&config.logging.log_level),
        config.logging.log_json,
        Some(&config.logging.text_log_path()),
    )?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let exit_code = runtime.block_on(run_proxy(config, args.host_arguments))?;

    // tokio's stdin reader blocks a thread until the next read returns.
    runtime.shutdown_background();
    std::process::exit(exit_code)
}

async fn run_proxy(config: Config, host_arguments: Vec<String>) -> anyhow::Result<i32> {
    let session = Arc::new(RelaySession::new());
    let sink: Arc<dyn TelemetrySink> = Arc::new(FileSink::open(&config.logging.event_log_path()));

    info!(
        version = env!("CARGO_PKG_VERSION"),
        session_id = session.session_id(),
        host = %config.host.path.display(),
        companion = config.companion.enabled,
        "Starting nmproxy"
    );

    let mut runner = ProxyRunner::new(config.clone(), session, sink);
    runner = runner.with_forwarded_args(host_arguments);
    if config.companion.enabled {
        let companion = PidFileCompanion::from_config(&config.companion);
        runner = runner.with_companion(Arc::new(companion));
    }

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    #[cfg(unix)]
    let sigterm_future = sigterm.recv();
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<Option<()>>();

    let shutdown = async {
        let interrupt = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        };
        tokio::select! {
            () = interrupt => ShutdownSignal::Interrupt,
            _ = sigterm_future => ShutdownSignal::Terminate,
        }
    };

    let upstream = StreamPair::new(tokio::io::stdin(), tokio::io::stdout());
    Ok(runner.run(upstream, shutdown).await)
}
