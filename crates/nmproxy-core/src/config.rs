//! Configuration resolution for nmproxy.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Settings file (explicit path, or the global `settings.json`)
//! 3. Environment variables
//! 4. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Default location of the real native messaging host.
pub const DEFAULT_HOST_PATH: &str = "/Applications/Claude.app/Contents/Helpers/chrome-native-host";

/// Complete nmproxy configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub companion: CompanionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub relay: RelayConfig,
}

/// The downstream native messaging host subprocess.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub path: PathBuf,
    pub args: Vec<String>,
    /// Seconds to wait for the host to exit at each shutdown step.
    pub terminate_timeout_secs: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_HOST_PATH),
            args: Vec::new(),
            terminate_timeout_secs: 5,
        }
    }
}

impl HostConfig {
    pub const fn terminate_timeout(&self) -> Duration {
        Duration::from_secs(self.terminate_timeout_secs)
    }
}

/// Companion process detection and launch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompanionConfig {
    pub enabled: bool,
    /// Directory scanned for marker PID files.
    pub pid_dir: PathBuf,
    pub pid_prefix: String,
    pub pid_suffix: String,
    /// Plugin root, exported to the launch script as `CLAUDE_PLUGIN_ROOT`.
    pub plugin_dir: PathBuf,
    /// Overrides `<plugin_dir>/bin/launch-chrome.sh`.
    pub launch_script: Option<PathBuf>,
    /// Delay after a launch before the relay starts.
    pub startup_grace_ms: u64,
}

impl Default for CompanionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pid_dir: PathBuf::from("/tmp"),
            pid_prefix: "contextfort-".to_string(),
            pid_suffix: ".pid".to_string(),
            plugin_dir: home_dir().join("agents-blocker").join("plugin"),
            launch_script: None,
            startup_grace_ms: 2000,
        }
    }
}

impl CompanionConfig {
    pub fn launch_script_path(&self) -> PathBuf {
        self.launch_script
            .clone()
            .unwrap_or_else(|| self.plugin_dir.join("bin").join("launch-chrome.sh"))
    }

    pub const fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }
}

/// Log destinations and verbosity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_dir: PathBuf,
    pub text_log_file: String,
    pub event_log_file: String,
    pub log_level: String,
    /// Emit JSON lines on stderr instead of human-readable output.
    pub log_json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: home_dir().join(".contextfort").join("logs"),
            text_log_file: "native-proxy.log".to_string(),
            event_log_file: "native-proxy-events.jsonl".to_string(),
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

impl LoggingConfig {
    pub fn text_log_path(&self) -> PathBuf {
        self.log_dir.join(&self.text_log_file)
    }

    pub fn event_log_path(&self) -> PathBuf {
        self.log_dir.join(&self.event_log_file)
    }
}

/// Relay policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Largest frame accepted from either peer.
    pub max_frame_bytes: u32,
    /// How long the surviving direction may keep running after the first
    /// direction stops.
    pub drain_timeout_ms: u64,
    pub upstream_label: String,
    pub downstream_label: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: 64 * 1024 * 1024, // 64 MiB
            drain_timeout_ms: 2000,
            upstream_label: "extension".to_string(),
            downstream_label: "host".to_string(),
        }
    }
}

impl RelayConfig {
    pub const fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl Config {
    /// Reject values the relay cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.relay.max_frame_bytes == 0 {
            return Err(Error::Config("relay.max_frame_bytes must be positive".into()));
        }
        if self.relay.upstream_label.is_empty() || self.relay.downstream_label.is_empty() {
            return Err(Error::Config("relay labels must not be empty".into()));
        }
        if self.relay.upstream_label == self.relay.downstream_label {
            return Err(Error::Config(format!(
                "relay labels must differ (both are '{}')",
                self.relay.upstream_label
            )));
        }
        if self.host.path.as_os_str().is_empty() {
            return Err(Error::Config("host.path must not be empty".into()));
        }
        Ok(())
    }
}

/// Load configuration with hierarchical resolution.
///
/// An explicit `config_path` must exist; the global settings file is only
/// read when present.
pub fn load_config(config_path: Option<&Path>) -> Result<Config> {
    let mut config = match config_path {
        Some(path) => load_config_file(path)?,
        None => match global_config_path() {
            Some(global_path) if global_path.exists() => load_config_file(&global_path)?,
            _ => Config::default(),
        },
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .ok()
            .map(|h| PathBuf::from(h).join(".nmproxy").join("settings.json"))
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library/Application Support/nmproxy/settings.json"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
            .map(|p| p.join("nmproxy").join("settings.json"))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(std::env::temp_dir)
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Apply environment overrides, reading variables through `lookup`.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup("NMPROXY_HOST_PATH") {
        config.host.path = PathBuf::from(val);
    }
    // CONTEXTFORT_PLUGIN_DIR is what existing launch setups export.
    let plugin_dir = lookup("NMPROXY_PLUGIN_DIR");
    if let Some(val) = plugin_dir.or_else(|| lookup("CONTEXTFORT_PLUGIN_DIR")) {
        config.companion.plugin_dir = PathBuf::from(val);
    }
    if let Some(val) = lookup("NMPROXY_LOG_DIR") {
        config.logging.log_dir = PathBuf::from(val);
    }
    if let Some(val) = lookup("NMPROXY_LOG_LEVEL") {
        config.logging.log_level = val;
    }
    if let Some(val) = lookup("NMPROXY_MAX_FRAME_BYTES")
        && let Ok(n) = val.parse()
    {
        config.relay.max_frame_bytes = n;
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults_match_reference_deployment() {
        let config = Config::default();
        assert_eq!(config.host.path, PathBuf::from(DEFAULT_HOST_PATH));
        assert_eq!(config.companion.startup_grace(), Duration::from_secs(2));
        assert_eq!(config.companion.pid_prefix, "contextfort-");
        assert_eq!(config.logging.text_log_file, "native-proxy.log");
        assert_eq!(config.logging.event_log_file, "native-proxy-events.jsonl");
        assert_eq!(config.relay.upstream_label, "extension");
        assert_eq!(config.relay.downstream_label, "host");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn launch_script_defaults_under_plugin_dir() {
        let mut companion = CompanionConfig {
            plugin_dir: PathBuf::from("/opt/plugin"),
            ..CompanionConfig::default()
        };
        assert_eq!(
            companion.launch_script_path(),
            PathBuf::from("/opt/plugin/bin/launch-chrome.sh")
        );
        companion.launch_script = Some(PathBuf::from("/usr/local/bin/start"));
        assert_eq!(companion.launch_script_path(), PathBuf::from("/usr/local/bin/start"));
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"host": {"path": "/usr/bin/real-host"}, "relay": {"drain_timeout_ms": 10}}"#,
        )
        .unwrap();

        let config = load_config_file(&path).unwrap();
        assert_eq!(config.host.path, PathBuf::from("/usr/bin/real-host"));
        assert_eq!(config.host.terminate_timeout_secs, 5);
        assert_eq!(config.relay.drain_timeout(), Duration::from_millis(10));
        assert_eq!(config.relay.max_frame_bytes, 64 * 1024 * 1024);
        assert!(config.companion.enabled);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(Some(&dir.path().join("nope.json"))).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("nope.json")));
    }

    #[test]
    fn malformed_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = load_config_file(&path).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("Failed to parse")));
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("NMPROXY_HOST_PATH", "/bin/cat"),
            ("CONTEXTFORT_PLUGIN_DIR", "/srv/plugin"),
            ("NMPROXY_LOG_LEVEL", "debug"),
            ("NMPROXY_MAX_FRAME_BYTES", "1024"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        apply_env_overrides(&mut config, |k| vars.get(k).map(ToString::to_string));

        assert_eq!(config.host.path, PathBuf::from("/bin/cat"));
        assert_eq!(config.companion.plugin_dir, PathBuf::from("/srv/plugin"));
        assert_eq!(config.logging.log_level, "debug");
        assert_eq!(config.relay.max_frame_bytes, 1024);
    }

    #[test]
    fn unparsable_numeric_override_is_ignored() {
        let mut config = Config::default();
        apply_env_overrides(&mut config, |k| {
            (k == "NMPROXY_MAX_FRAME_BYTES").then(|| "lots".to_string())
        });
        assert_eq!(config.relay.max_frame_bytes, 64 * 1024 * 1024);
    }

    #[test]
    fn validate_rejects_identical_labels() {
        let mut config = Config::default();
        config.relay.downstream_label = "extension".to_string();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
