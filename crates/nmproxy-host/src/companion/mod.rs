//! Companion application the native host depends on.
//!
//! Before the host is started the proxy makes sure a companion process is
//! running, launching it if no liveness marker is found.

mod pid_file;

use std::path::PathBuf;

pub use pid_file::PidFileCompanion;

/// Details of a companion launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchInfo {
    pub launch_script: PathBuf,
    /// PID of the launcher process, when the platform reports one.
    pub pid: Option<u32>,
}

/// Errors from launching a companion.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("Launch script not found: {}", path.display())]
    ScriptNotFound { path: PathBuf },

    #[error("Failed to launch {}: {source}", path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Liveness check and launcher for a companion process.
pub trait Companion: Send + Sync {
    /// Whether a running companion was detected.
    fn is_running(&self) -> bool;

    /// Start the companion detached from this process.
    fn launch(&self) -> Result<LaunchInfo, LaunchError>;

    /// How long to wait after a launch before relaying.
    fn startup_grace(&self) -> std::time::Duration;
}
