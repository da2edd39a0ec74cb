//! Telemetry sinks for relay observability.
//!
//! Telemetry is advisory. Sinks swallow their own failures so that message
//! forwarding never depends on a log write succeeding.

pub(crate) mod file;
mod memory;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::RelaySession;

pub use file::{FileSink, TEXT_TARGET};
pub use memory::MemorySink;

/// Destination for human-readable log lines and structured events.
pub trait TelemetrySink: Send + Sync {
    /// Record a human-readable line. Best effort.
    fn log_text(&self, message: &str);

    /// Record a structured event for `session`. Best effort.
    fn log_event(&self, event_type: &str, session: &RelaySession, data: Value);
}

/// One JSON Lines event record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp: String,
    pub event_type: String,
    #[serde(rename = "proxy_session_id")]
    pub session_id: String,
    #[serde(rename = "proxy_pid")]
    pub pid: u32,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl EventRecord {
    pub fn new(event_type: &str, session: &RelaySession, data: Value) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            event_type: event_type.to_string(),
            session_id: session.session_id().to_string(),
            pid: session.pid(),
            data,
        }
    }
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn log_text(&self, _message: &str) {}

    fn log_event(&self, _event_type: &str, _session: &RelaySession, _data: Value) {}
}
