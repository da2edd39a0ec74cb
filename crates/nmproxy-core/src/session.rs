//! Relay session identity and counters.
//!
//! One `RelaySession` exists per proxy process. Both relay directions hold
//! it through an `Arc` and bump the shared forwarded-message counter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// Lifetime of one proxy process.
#[derive(Debug)]
pub struct RelaySession {
    session_id: String,
    pid: u32,
    started_at: SystemTime,
    started: Instant,
    message_count: AtomicU64,
}

/// Final counters, emitted with the `proxy_exit` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub message_count: u64,
    pub duration_seconds: f64,
}

impl RelaySession {
    /// Create the session for the current process (`proxy-<unix secs>-<pid>`).
    pub fn new() -> Self {
        let pid = std::process::id();
        let started_at = SystemTime::now();
        let secs = started_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self::with_identity(format!("proxy-{secs}-{pid}"), pid)
    }

    /// Create a session with an explicit identity.
    pub fn with_identity(session_id: impl Into<String>, pid: u32) -> Self {
        Self {
            session_id: session_id.into(),
            pid,
            started_at: SystemTime::now(),
            started: Instant::now(),
            message_count: AtomicU64::new(0),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub const fn pid(&self) -> u32 {
        self.pid
    }

    pub const fn started_at(&self) -> SystemTime {
        self.started_at
    }

    /// Count one forwarded frame; returns the new total.
    ///
    /// Relaxed ordering: the counter only feeds telemetry and is not used to
    /// synchronise any other memory.
    pub fn record_forwarded(&self) -> u64 {
        self.message_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn message_count(&self) -> u64 {
        self.message_count.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            message_count: self.message_count(),
            duration_seconds: self.elapsed().as_secs_f64(),
        }
    }
}

impl Default for RelaySession {
    fn default() -> Self {
        Self::new()
    }
}
