//! File-backed telemetry: JSON Lines events plus text lines through `tracing`.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde_json::Value;
use tracing::{debug, warn};

use super::{EventRecord, TelemetrySink};
use crate::session::RelaySession;

/// `tracing` target used for human-readable relay log lines.
pub const TEXT_TARGET: &str = "nmproxy::text";

/// Appends events to a JSON Lines file.
///
/// Text lines go through `tracing` at [`TEXT_TARGET`]; the text log file
/// itself is a layer installed by [`crate::tracing_init::init_tracing`].
#[derive(Debug)]
pub struct FileSink {
    events: Option<Mutex<File>>,
    event_path: Option<PathBuf>,
}

impl FileSink {
    /// Open (or create) the events file in append mode.
    ///
    /// If the file cannot be opened the sink still logs text lines and
    /// drops events.
    pub fn open(event_path: &Path) -> Self {
        match open_append(event_path) {
            Ok(file) => Self {
                events: Some(Mutex::new(file)),
                event_path: Some(event_path.to_path_buf()),
            },
            Err(e) => {
                warn!(
                    path = %event_path.display(),
                    error = %e,
                    "Cannot open event log, structured events disabled"
                );
                Self::text_only()
            }
        }
    }

    /// A sink with no events file.
    pub const fn text_only() -> Self {
        Self {
            events: None,
            event_path: None,
        }
    }

    pub fn event_path(&self) -> Option<&Path> {
        self.event_path.as_deref()
    }
}

impl TelemetrySink for FileSink {
    fn log_text(&self, message: &str) {
        tracing::info!(target: TEXT_TARGET, "{message}");
    }

    fn log_event(&self, event_type: &str, session: &RelaySession, data: Value) {
        let Some(events) = &self.events else {
            return;
        };
        let record = EventRecord::new(event_type, session, data);
        let mut line = match serde_json::to_vec(&record) {
            Ok(line) => line,
            Err(e) => {
                debug!(event_type, error = %e, "Failed to serialize telemetry event");
                return;
            }
        };
        line.push(b'\n');

        let mut file = events.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = file.write_all(&line) {
            debug!(event_type, error = %e, "Failed to write telemetry event");
        }
    }
}

/// Open `path` for appending, creating parent directories as needed.
pub fn open_append(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}
