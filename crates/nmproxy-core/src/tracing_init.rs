//! Shared tracing/logging initialization.
//!
//! stdout of the proxy carries native messaging frames, so every layer
//! installed here writes to stderr or to a file, never to stdout.

use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{Error, Result};
use crate::telemetry::TEXT_TARGET;
use crate::telemetry::file::open_append;

/// Build the default `RUST_LOG` filter for all proxy crates at `level`.
///
/// Relay text lines at [`TEXT_TARGET`] stay enabled at `info` whatever the
/// level, so the text log keeps its message trail.
pub fn default_filter(level: &str) -> String {
    format!("nmproxy={level},nmproxy_core={level},nmproxy_host={level},{TEXT_TARGET}=info")
}

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- default `RUST_LOG` value when the env-var is not set
///   (see [`default_filter`]).
/// * `log_json` -- when `true`, stderr gets structured JSON log lines instead
///   of the human-readable format.
/// * `text_log` -- optional append-mode text log file. If it cannot be opened
///   logging continues on stderr only.
pub fn init_tracing(default_filter: &str, log_json: bool, text_log: Option<&Path>) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    );

    let mut open_error = None;
    let file_layer = text_log.and_then(|path| match open_append(path) {
        Ok(file) => Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file))),
        Err(e) => {
            open_error = Some((path.to_path_buf(), e));
            None
        }
    });

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer);
    let result = if log_json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
    result.map_err(|e| Error::Logging(e.to_string()))?;

    if let Some((path, e)) = open_error {
        tracing::warn!(
            path = %path.display(),
            error = %e,
            "Cannot open text log, logging to stderr only"
        );
    }
    Ok(())
}
