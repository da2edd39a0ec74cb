//! Relay module types.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use nmproxy_core::config::RelayConfig;
use nmproxy_core::framing::{DecodeError, WriteError};
use nmproxy_core::{RelaySession, TelemetrySink};

/// Labels for the two ends of one relay direction.
///
/// Only used for telemetry; the protocol behaviour does not depend on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Direction {
    from: String,
    to: String,
}

impl Direction {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn from(&self) -> &str {
        &self.from
    }

    pub fn to(&self) -> &str {
        &self.to
    }

    /// Event emitted when a frame is decoded (`message_from_<from>`).
    pub fn received_event(&self) -> String {
        format!("message_from_{}", self.from)
    }

    /// Event emitted when a frame is written (`message_forwarded_to_<to>`).
    pub fn forwarded_event(&self) -> String {
        format!("message_forwarded_to_{}", self.to)
    }

    pub fn read_error_event(&self) -> String {
        format!("{}_read_error", self.from)
    }

    pub fn write_error_event(&self) -> String {
        format!("{}_write_error", self.to)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}→{}", self.from, self.to)
    }
}

/// Names of the upstream and downstream peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayLabels {
    pub upstream: String,
    pub downstream: String,
}

impl RelayLabels {
    pub fn upstream_to_downstream(&self) -> Direction {
        Direction::new(&self.upstream, &self.downstream)
    }

    pub fn downstream_to_upstream(&self) -> Direction {
        Direction::new(&self.downstream, &self.upstream)
    }
}

impl Default for RelayLabels {
    fn default() -> Self {
        Self {
            upstream: "extension".to_string(),
            downstream: "host".to_string(),
        }
    }
}

/// Tunables for a duplex relay.
#[derive(Debug, Clone)]
pub struct RelayOptions {
    pub labels: RelayLabels,
    pub max_frame_bytes: u32,
    pub drain_timeout: Duration,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self::from(&RelayConfig::default())
    }
}

impl From<&RelayConfig> for RelayOptions {
    fn from(config: &RelayConfig) -> Self {
        Self {
            labels: RelayLabels {
                upstream: config.upstream_label.clone(),
                downstream: config.downstream_label.clone(),
            },
            max_frame_bytes: config.max_frame_bytes,
            drain_timeout: config.drain_timeout(),
        }
    }
}

/// Shared state handed to each direction pump.
#[derive(Clone)]
pub struct RelayContext {
    pub session: Arc<RelaySession>,
    pub sink: Arc<dyn TelemetrySink>,
    pub max_frame_bytes: u32,
}

impl fmt::Debug for RelayContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayContext")
            .field("session", &self.session.session_id())
            .field("max_frame_bytes", &self.max_frame_bytes)
            .finish_non_exhaustive()
    }
}

/// A reader and a writer belonging to one peer.
#[derive(Debug)]
pub struct StreamPair<R, W> {
    pub reader: R,
    pub writer: W,
}

impl<R, W> StreamPair<R, W> {
    pub const fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }
}

/// Fatal codec failure inside one direction.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("{direction}: failed to read message {sequence}: {source}")]
    Decode {
        direction: Direction,
        sequence: u64,
        #[source]
        source: DecodeError,
    },

    #[error("{direction}: failed to forward message {sequence}: {source}")]
    Write {
        direction: Direction,
        sequence: u64,
        #[source]
        source: WriteError,
    },
}

impl RelayError {
    /// Short machine-readable label for telemetry.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Decode { source, .. } => source.kind(),
            Self::Write { source, .. } => source.kind(),
        }
    }

    pub const fn sequence(&self) -> u64 {
        match self {
            Self::Decode { sequence, .. } | Self::Write { sequence, .. } => *sequence,
        }
    }
}

/// Why a direction stopped.
#[derive(Debug)]
pub enum TerminationReason {
    /// The source reached end of stream between frames.
    Closed,
    /// A frame could not be read or written.
    ProtocolError(RelayError),
    /// The pump task panicked or was cancelled.
    Aborted(String),
}

impl TerminationReason {
    pub const fn is_clean(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("closed"),
            Self::ProtocolError(e) => write!(f, "protocol error: {e}"),
            Self::Aborted(reason) => write!(f, "aborted: {reason}"),
        }
    }
}

/// Result of one direction pump.
#[derive(Debug)]
pub struct DirectionReport {
    pub direction: Direction,
    pub reason: TerminationReason,
    /// Frames successfully written to the destination.
    pub forwarded: u64,
}

/// Result of a duplex relay session.
#[derive(Debug)]
pub struct ExitOutcome {
    /// The direction that stopped first; this decides the session outcome.
    pub first: DirectionReport,
    /// The other direction, if it stopped within the drain timeout.
    pub second: Option<DirectionReport>,
}

impl ExitOutcome {
    pub const fn is_clean(&self) -> bool {
        self.first.reason.is_clean()
    }

    pub fn total_forwarded(&self) -> u64 {
        self.first.forwarded + self.second.as_ref().map_or(0, |r| r.forwarded)
    }
}
