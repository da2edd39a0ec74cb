//! In-memory telemetry recorder.

use std::sync::{Mutex, PoisonError};

use serde_json::Value;

use super::{EventRecord, TelemetrySink};
use crate::session::RelaySession;

/// Keeps every text line and event in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    texts: Mutex<Vec<String>>,
    events: Mutex<Vec<EventRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn events(&self) -> Vec<EventRecord> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Events with the given `event_type`, in recording order.
    pub fn events_of(&self, event_type: &str) -> Vec<EventRecord> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }
}

impl TelemetrySink for MemorySink {
    fn log_text(&self, message: &str) {
        self.texts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.to_string());
    }

    fn log_event(&self, event_type: &str, session: &RelaySession, data: Value) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(EventRecord::new(event_type, session, data));
    }
}
