//! Companion detected through marker PID files.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use nmproxy_core::config::CompanionConfig;
use tokio::process::Command;
use tracing::{debug, info};

use super::{Companion, LaunchError, LaunchInfo};

/// Environment variable carrying the plugin root to the launch script.
pub const PLUGIN_ROOT_ENV: &str = "CLAUDE_PLUGIN_ROOT";

/// Treats any readable `<pid_dir>/<prefix>*<suffix>` file as a running
/// companion.
///
/// The PID inside the file is not checked against live processes, so a
/// stale marker left by a crash still counts as running.
#[derive(Debug, Clone)]
pub struct PidFileCompanion {
    pid_dir: PathBuf,
    pid_prefix: String,
    pid_suffix: String,
    plugin_dir: PathBuf,
    launch_script: PathBuf,
    startup_grace: Duration,
}

impl PidFileCompanion {
    pub fn from_config(config: &CompanionConfig) -> Self {
        Self {
            pid_dir: config.pid_dir.clone(),
            pid_prefix: config.pid_prefix.clone(),
            pid_suffix: config.pid_suffix.clone(),
            plugin_dir: config.plugin_dir.clone(),
            launch_script: config.launch_script_path(),
            startup_grace: config.startup_grace(),
        }
    }

    pub fn launch_script(&self) -> &Path {
        &self.launch_script
    }

    /// Marker files currently present, sorted by name.
    pub fn marker_files(&self) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(&self.pid_dir) else {
            return Vec::new();
        };
        let mut markers: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .filter(|entry| {
                entry.file_name().to_str().is_some_and(|name| {
                    name.starts_with(&self.pid_prefix) && name.ends_with(&self.pid_suffix)
                })
            })
            .map(|entry| entry.path())
            .collect();
        markers.sort();
        markers
    }
}

impl Companion for PidFileCompanion {
    fn is_running(&self) -> bool {
        let running = self
            .marker_files()
            .iter()
            .any(|path| fs::read(path).is_ok());
        debug!(pid_dir = %self.pid_dir.display(), running, "Companion marker check");
        running
    }

    fn launch(&self) -> Result<LaunchInfo, LaunchError> {
        if !self.launch_script.is_file() {
            return Err(LaunchError::ScriptNotFound {
                path: self.launch_script.clone(),
            });
        }

        let mut cmd = Command::new(&self.launch_script);
        cmd.env(PLUGIN_ROOT_ENV, &self.plugin_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        // Own process group so terminal signals aimed at the proxy skip it.
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|source| LaunchError::Spawn {
            path: self.launch_script.clone(),
            source,
        })?;
        let pid = child.id();
        info!(script = %self.launch_script.display(), ?pid, "Companion launch started");

        // Not awaited: the companion outlives the proxy.
        drop(child);

        Ok(LaunchInfo {
            launch_script: self.launch_script.clone(),
            pid,
        })
    }

    fn startup_grace(&self) -> Duration {
        self.startup_grace
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn companion(pid_dir: &Path, launch_script: Option<PathBuf>) -> PidFileCompanion {
        PidFileCompanion::from_config(&CompanionConfig {
            enabled: true,
            pid_dir: pid_dir.to_path_buf(),
            pid_prefix: "contextfort-".into(),
            pid_suffix: ".pid".into(),
            plugin_dir: pid_dir.join("plugin"),
            launch_script,
            startup_grace_ms: 0,
        })
    }

    #[test]
    fn no_marker_means_not_running() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("unrelated.pid"), "1").unwrap();
        fs::write(dir.path().join("contextfort-1.txt"), "1").unwrap();
        assert!(!companion(dir.path(), None).is_running());
    }

    #[test]
    fn readable_marker_means_running() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("contextfort-4242.pid"), "4242").unwrap();
        let companion = companion(dir.path(), None);
        assert!(companion.is_running());
        assert_eq!(
            companion.marker_files(),
            vec![dir.path().join("contextfort-4242.pid")]
        );
    }

    #[test]
    fn stale_marker_still_counts() {
        let dir = tempfile::tempdir().unwrap();
        // A PID that cannot belong to a live process.
        fs::write(dir.path().join("contextfort-0.pid"), "not a pid").unwrap();
        assert!(companion(dir.path(), None).is_running());
    }

    #[test]
    fn missing_pid_dir_is_not_running() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!companion(&dir.path().join("missing"), None).is_running());
    }

    #[test]
    fn default_launch_script_lives_under_plugin_dir() {
        let dir = tempfile::tempdir().unwrap();
        let companion = companion(dir.path(), None);
        assert_eq!(
            companion.launch_script(),
            dir.path().join("plugin").join("bin").join("launch-chrome.sh")
        );
    }

    #[tokio::test]
    async fn launch_without_script_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = companion(dir.path(), None).launch().unwrap_err();
        assert!(matches!(err, LaunchError::ScriptNotFound { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn launch_runs_script_detached() {
        let dir = tempfile::tempdir().unwrap();
        let script = ["/bin/true", "/usr/bin/true"]
            .into_iter()
            .map(PathBuf::from)
            .find(|p| p.is_file())
            .unwrap();
        let info = companion(dir.path(), Some(script.clone())).launch().unwrap();
        assert_eq!(info.launch_script, script);
        assert!(info.pid.is_some());
    }
}
