//! `nmproxy` Core Library
//!
//! Shared functionality for the native messaging proxy:
//! - Length-prefixed frame codec for the native messaging wire format
//! - Relay session identity and counters
//! - Telemetry sinks (text log + JSON Lines events)
//! - Configuration resolution and hierarchy
//! - Common error types

pub mod config;
pub mod error;
pub mod framing;
pub mod session;
pub mod telemetry;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
pub use framing::{
    DecodeError, Frame, WriteError, decode_frame, decode_frame_limited, encode_frame,
};
pub use session::{RelaySession, SessionSummary};
pub use telemetry::TelemetrySink;
