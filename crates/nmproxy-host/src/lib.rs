//! nmproxy Host Library
//!
//! Core functionality for the native messaging proxy binary:
//! - Bidirectional frame relay between the extension and the native host
//! - Companion process detection and launch
//! - Native host subprocess lifecycle
//! - Session runner tying them together

pub mod companion;
pub mod relay;
pub mod runner;
pub mod subprocess;
