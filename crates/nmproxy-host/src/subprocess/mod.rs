//! Native host process management.

pub mod host;

pub use host::{HostProcess, HostSpawnConfig, SubprocessError};
