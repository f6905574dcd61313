//! Applet configuration
//!
//! Configuration is stored as YAML in the user's config directory.
//! Default location: ~/.config/panvol/config.yaml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use panvol_backends::{BackendKind, VOLUME_MAX, VOLUME_OVERSHOOT_MAX};

/// Default volume adjust step, percent
pub const DEFAULT_STEP: u16 = 3;

/// Default external mixer command
pub const DEFAULT_MIXER_COMMAND: &str = "pavucontrol-qt";

/// Engine configuration, read at startup and on change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeConfig {
    /// Backend to control the device through
    pub backend: BackendKind,
    /// Backend-specific device id (None = backend default)
    pub device: Option<String>,
    /// Volume adjust step for increase/decrease/scroll, percent
    pub step: u16,
    /// Allow volume beyond 100% (0dB)
    pub allow_overshoot: bool,
    /// Middle click on the indicator toggles mute
    pub mute_on_middle_click: bool,
    /// Clicking the indicator shows the volume popup
    pub show_on_click: bool,
    /// External mixer command line
    pub mixer_command: String,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::PulseAudio,
            device: None,
            step: DEFAULT_STEP,
            allow_overshoot: false,
            mute_on_middle_click: true,
            show_on_click: true,
            mixer_command: DEFAULT_MIXER_COMMAND.to_string(),
        }
    }
}

impl VolumeConfig {
    /// The volume ceiling this configuration permits
    pub fn max_volume(&self) -> u16 {
        if self.allow_overshoot {
            VOLUME_OVERSHOOT_MAX
        } else {
            VOLUME_MAX
        }
    }

    /// Step size, guarded against a zero in a hand-edited file
    pub fn effective_step(&self) -> u16 {
        self.step.max(1)
    }
}

/// Get the default config file path
///
/// Returns: ~/.config/panvol/config.yaml
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join("panvol")
        .join("config.yaml")
}

/// Load configuration from a YAML file
///
/// If the file doesn't exist, returns default config.
/// If the file exists but is invalid, logs a warning and returns default config.
pub fn load_config(path: &Path) -> VolumeConfig {
    if !path.exists() {
        log::info!("load_config: {:?} doesn't exist, using defaults", path);
        return VolumeConfig::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<VolumeConfig>(&contents) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("load_config: failed to parse config: {}, using defaults", e);
                VolumeConfig::default()
            }
        },
        Err(e) => {
            log::warn!("load_config: failed to read config file: {}, using defaults", e);
            VolumeConfig::default()
        }
    }
}

/// Save configuration to a YAML file, creating parent directories as needed
pub fn save_config(config: &VolumeConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }
    let yaml = serde_yaml::to_string(config).context("Failed to serialize config to YAML")?;
    std::fs::write(path, yaml).with_context(|| format!("Failed to write config file: {:?}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_nonexistent_returns_default() {
        let config = load_config(Path::new("/nonexistent/path/config.yaml"));
        assert_eq!(config, VolumeConfig::default());
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");

        let config = VolumeConfig {
            backend: BackendKind::Alsa,
            device: Some("hw:1".to_string()),
            step: 5,
            allow_overshoot: true,
            ..VolumeConfig::default()
        };

        save_config(&config, &path).unwrap();
        let loaded = load_config(&path);
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: VolumeConfig = serde_yaml::from_str("backend: oss\nstep: 10\n").unwrap();
        assert_eq!(config.backend, BackendKind::Oss);
        assert_eq!(config.step, 10);
        assert!(config.mute_on_middle_click);
        assert_eq!(config.mixer_command, DEFAULT_MIXER_COMMAND);
    }

    #[test]
    fn test_max_volume_follows_overshoot() {
        let mut config = VolumeConfig::default();
        assert_eq!(config.max_volume(), VOLUME_MAX);
        config.allow_overshoot = true;
        assert_eq!(config.max_volume(), VOLUME_OVERSHOOT_MAX);
    }

    #[test]
    fn test_zero_step_is_guarded() {
        let config = VolumeConfig {
            step: 0,
            ..VolumeConfig::default()
        };
        assert_eq!(config.effective_step(), 1);
    }
}
