//! Configuration management for the intellicat daemon.
//!
//! Configuration is loaded with precedence:
//! 1. Command-line flags (`run --role`, `--trigger-hour`, ...)
//! 2. Config file (`--config`, `$INTELLICAT_CONFIG`, or the platform config dir)
//! 3. Default values

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use intellicat_core::NodeConfig;

use crate::cli::RunArgs;
use crate::error::AppError;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Session orchestrator settings
    #[serde(default)]
    pub node: NodeConfig,

    /// Camera and detector endpoints
    #[serde(default)]
    pub vision: VisionConfig,

    /// Peer link device
    #[serde(default)]
    pub link: LinkConfig,

    /// Servo controller
    #[serde(default)]
    pub actuator: ActuatorConfig,

    /// Console behaviour
    #[serde(default)]
    pub display: DisplayConfig,

    /// Operator input sources
    #[serde(default)]
    pub input: InputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionConfig {
    /// Snapshot endpoint returning raw frame bytes
    #[serde(default = "default_source_url")]
    pub source_url: String,

    /// Detector endpoint accepting frame bytes and returning JSON detections
    #[serde(default = "default_detector_url")]
    pub detector_url: String,

    /// Camera name passed to the snapshot endpoint
    #[serde(default = "default_source")]
    pub source: String,

    /// Upper bound on one capture plus detection, in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Serial device bound to the peer (e.g. an RFCOMM channel)
    #[serde(default = "default_link_device")]
    pub device: PathBuf,

    /// Delay between attempts to open the device, in seconds
    #[serde(default = "default_reconnect_secs")]
    pub reconnect_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActuatorKind {
    /// Log every command, drive nothing
    DryRun,
    /// Lynxmotion SSC-32 compatible serial servo controller
    Ssc32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActuatorConfig {
    #[serde(default = "default_actuator_kind")]
    pub kind: ActuatorKind,

    /// Serial device of the servo controller
    #[serde(default = "default_actuator_device")]
    pub device: PathBuf,

    /// Pulse width at 0 degrees, in microseconds
    #[serde(default = "default_pulse_min_us")]
    pub pulse_min_us: u32,

    /// Pulse width at 180 degrees, in microseconds
    #[serde(default = "default_pulse_max_us")]
    pub pulse_max_us: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    Headless,
    Interactive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    #[serde(default = "default_display_mode")]
    pub mode: DisplayMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Read text commands from stdin
    #[serde(default = "default_true")]
    pub stdin: bool,

    /// Listen for A/B hotkeys on a USB keyboard
    #[serde(default = "default_true")]
    pub hotkeys: bool,

    /// Keyboard event device; discovered under /dev/input when unset
    #[serde(default)]
    pub keyboard_device: Option<PathBuf>,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_source_url() -> String {
    "http://127.0.0.1:8080/snapshot".to_string()
}

fn default_detector_url() -> String {
    "http://127.0.0.1:8081/detect".to_string()
}

fn default_source() -> String {
    "camera0".to_string()
}

fn default_request_timeout_ms() -> u64 {
    4000
}

fn default_link_device() -> PathBuf {
    PathBuf::from("/dev/rfcomm0")
}

fn default_reconnect_secs() -> u64 {
    2
}

fn default_actuator_kind() -> ActuatorKind {
    ActuatorKind::Ssc32
}

fn default_actuator_device() -> PathBuf {
    PathBuf::from("/dev/ttyUSB0")
}

fn default_pulse_min_us() -> u32 {
    500
}

fn default_pulse_max_us() -> u32 {
    2400
}

fn default_display_mode() -> DisplayMode {
    DisplayMode::Headless
}

fn default_config_dir() -> PathBuf {
    if let Some(proj_dirs) = ProjectDirs::from("org", "intellicat", "intellicat") {
        proj_dirs.config_dir().to_path_buf()
    } else {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".intellicat")
    }
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            source_url: default_source_url(),
            detector_url: default_detector_url(),
            source: default_source(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            device: default_link_device(),
            reconnect_secs: default_reconnect_secs(),
        }
    }
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            kind: default_actuator_kind(),
            device: default_actuator_device(),
            pulse_min_us: default_pulse_min_us(),
            pulse_max_us: default_pulse_max_us(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            mode: default_display_mode(),
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            stdin: true,
            hotkeys: true,
            keyboard_device: None,
        }
    }
}

impl VisionConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl LinkConfig {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_secs)
    }
}

impl AppConfig {
    /// Load configuration from `path`, or from the default location if `None`.
    ///
    /// An explicitly given file must exist; a missing default file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (Self::config_path(), false),
        };

        if !path.exists() {
            if explicit {
                return Err(AppError::ConfigNotFound(path).into());
            }
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: AppConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")?;

        Ok(())
    }

    /// Default config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("INTELLICAT_CONFIG") {
            return PathBuf::from(path);
        }
        default_config_dir().join("config.toml")
    }

    /// Apply `run` flags on top of the file values.
    pub fn apply_overrides(&mut self, args: &RunArgs) {
        if let Some(role) = args.role {
            self.node.role = Some(role);
        }
        if args.headless {
            self.display.mode = DisplayMode::Headless;
        }
        if args.interactive {
            self.display.mode = DisplayMode::Interactive;
        }
        if let Some(hour) = args.trigger_hour {
            self.node.schedule.trigger_hour = hour;
        }
        if let Some(cap) = args.max_cycles_per_hour {
            self.node.schedule.max_cycles_per_hour = cap;
        }
        if let Some(secs) = args.peer_timeout {
            self.node.timeouts.peer_secs = secs;
        }
        if let Some(device) = &args.link_device {
            self.link.device = device.clone();
        }
        if args.dry_run {
            self.actuator.kind = ActuatorKind::DryRun;
        }
    }

    /// Validate everything the control loop depends on.
    pub fn validate(&self) -> Result<(), AppError> {
        self.node.validate()?;

        if self.vision.request_timeout_ms == 0 {
            return Err(AppError::invalid("vision.request_timeout_ms", "must be greater than 0"));
        }
        for (field, url) in [
            ("vision.source_url", &self.vision.source_url),
            ("vision.detector_url", &self.vision.detector_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(AppError::invalid(field, format!("'{url}' is not an http(s) URL")));
            }
        }
        if self.link.reconnect_secs == 0 {
            return Err(AppError::invalid("link.reconnect_secs", "must be greater than 0"));
        }
        if self.actuator.pulse_min_us >= self.actuator.pulse_max_us {
            return Err(AppError::invalid(
                "actuator.pulse_max_us",
                "must be greater than pulse_min_us",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intellicat_core::NodeRole;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.link.device, PathBuf::from("/dev/rfcomm0"));
        assert_eq!(config.actuator.kind, ActuatorKind::Ssc32);
        assert_eq!(config.display.mode, DisplayMode::Headless);
        assert!(config.input.stdin);
        assert!(config.input.hotkeys);
        assert!(config.node.role.is_none());
    }

    #[test]
    fn test_dry_run_flag_disables_hardware() {
        let mut config = AppConfig::default();
        config.apply_overrides(&RunArgs::default());
        assert_eq!(config.actuator.kind, ActuatorKind::Ssc32);

        config.apply_overrides(&RunArgs {
            dry_run: true,
            ..Default::default()
        });
        assert_eq!(config.actuator.kind, ActuatorKind::DryRun);
    }

    #[test]
    fn test_config_save_load() {
        let dir = tempdir().expect("Failed to create temp dir");
        let config_path = dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.node.role = Some(NodeRole::Secondary);
        config.node.schedule.trigger_hour = 7;
        config.actuator.kind = ActuatorKind::DryRun;
        config.input.keyboard_device = Some(PathBuf::from("/dev/input/event3"));
        config.save(&config_path).expect("Failed to save config");

        let loaded = AppConfig::load(Some(&config_path)).expect("Failed to load config");
        assert_eq!(loaded.node.role, Some(NodeRole::Secondary));
        assert_eq!(loaded.node.schedule.trigger_hour, 7);
        assert_eq!(loaded.actuator.kind, ActuatorKind::DryRun);
        assert_eq!(loaded.input.keyboard_device, Some(PathBuf::from("/dev/input/event3")));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().expect("Failed to create temp dir");
        let config_path = dir.path().join("config.toml");
        std::fs::write(
            &config_path,
            "[node]\nrole = \"main\"\n\n[node.timeouts]\npeer_secs = 90\n\n[link]\ndevice = \"/dev/ttyS1\"\n",
        )
        .unwrap();

        let config = AppConfig::load(Some(&config_path)).unwrap();
        assert_eq!(config.node.role, Some(NodeRole::Main));
        assert_eq!(config.node.timeouts.peer_secs, 90);
        assert_eq!(config.node.timeouts.no_detection_secs, 30);
        assert_eq!(config.link.device, PathBuf::from("/dev/ttyS1"));
        assert_eq!(config.link.reconnect_secs, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let dir = tempdir().expect("Failed to create temp dir");
        let missing = dir.path().join("nope.toml");
        let err = AppConfig::load(Some(&missing)).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_unparseable_file_reports_path() {
        let dir = tempdir().expect("Failed to create temp dir");
        let config_path = dir.path().join("config.toml");
        std::fs::write(&config_path, "[node\nrole = ").unwrap();

        let err = AppConfig::load(Some(&config_path)).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_overrides_win_over_file() {
        let mut config = AppConfig::default();
        config.node.role = Some(NodeRole::Main);
        config.display.mode = DisplayMode::Interactive;

        let args = RunArgs {
            role: Some(NodeRole::Secondary),
            headless: true,
            trigger_hour: Some(10),
            max_cycles_per_hour: Some(2),
            peer_timeout: Some(45),
            link_device: Some(PathBuf::from("/dev/rfcomm1")),
            dry_run: true,
            ..Default::default()
        };
        config.actuator.kind = ActuatorKind::Ssc32;
        config.apply_overrides(&args);

        assert_eq!(config.node.role, Some(NodeRole::Secondary));
        assert_eq!(config.display.mode, DisplayMode::Headless);
        assert_eq!(config.node.schedule.trigger_hour, 10);
        assert_eq!(config.node.schedule.max_cycles_per_hour, 2);
        assert_eq!(config.node.timeouts.peer_secs, 45);
        assert_eq!(config.link.device, PathBuf::from("/dev/rfcomm1"));
        assert_eq!(config.actuator.kind, ActuatorKind::DryRun);
    }

    #[test]
    fn test_validate_requires_role() {
        let config = AppConfig::default();
        assert!(matches!(config.validate(), Err(AppError::Node(_))));
    }

    #[test]
    fn test_validate_adapter_settings() {
        let mut config = AppConfig::default();
        config.node.role = Some(NodeRole::Main);
        assert!(config.validate().is_ok());

        config.vision.detector_url = "tcp://detector".into();
        assert!(matches!(
            config.validate(),
            Err(AppError::InvalidSetting { field: "vision.detector_url", .. })
        ));

        config.vision.detector_url = default_detector_url();
        config.actuator.pulse_min_us = 2400;
        assert!(config.validate().is_err());
    }
}
