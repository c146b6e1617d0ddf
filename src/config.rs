// src/config.rs
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use log::{info, warn};
use serde::Deserialize;

pub const CONFIG_ENV_VAR: &str = "FINGER_HOME_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "finger_home.toml";

/// Runtime settings, read from `finger_home.toml` (or the file named by
/// `FINGER_HOME_CONFIG`). Every field has a default.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub camera_index: u32,
    pub requested_width: u32,
    pub requested_height: u32,
    pub requested_fps: u32,
    /// ONNX hand landmark model.
    pub model_path: PathBuf,
    /// Minimum hand presence score for a detection to count.
    pub presence_threshold: f32,
    pub license_path: PathBuf,
    /// TTF/OTF font added in front of egui's defaults.
    pub font_path: Option<PathBuf>,
    /// Switch everything off after this many seconds without a hand.
    /// Unset keeps the last state indefinitely.
    pub no_hand_reset_secs: Option<u64>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            camera_index: 0,
            requested_width: 640,
            requested_height: 480,
            requested_fps: 30,
            model_path: PathBuf::from("models/hand_landmark.onnx"),
            presence_threshold: 0.5,
            license_path: PathBuf::from("license.json"),
            font_path: None,
            no_hand_reset_secs: None,
        }
    }
}

impl AppConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Loads the configured file, falling back to defaults when it is
    /// missing or broken.
    pub fn load() -> Self {
        let path = std::env::var_os(CONFIG_ENV_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        if !path.exists() {
            info!("No config file at {}, using defaults.", path.display());
            return Self::default();
        }
        match Self::from_file(&path) {
            Ok(config) => {
                info!("Loaded config from {}", path.display());
                config
            }
            Err(e) => {
                warn!("{:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    pub fn no_hand_timeout(&self) -> Option<Duration> {
        self.no_hand_reset_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("finger_home.toml");
        fs::write(
            &path,
            "camera_index = 2\nmodel_path = \"hand.onnx\"\nno_hand_reset_secs = 10\n",
        )
        .unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.camera_index, 2);
        assert_eq!(config.model_path, PathBuf::from("hand.onnx"));
        assert_eq!(config.no_hand_timeout(), Some(Duration::from_secs(10)));
        assert_eq!(config.requested_width, 640);
        assert_eq!(config.license_path, PathBuf::from("license.json"));
        assert_eq!(config.font_path, None);
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("finger_home.toml");
        fs::write(&path, "camera_index = \"front\"\n").unwrap();
        assert!(AppConfig::from_file(&path).is_err());
        assert!(AppConfig::from_file(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_default_holds_last_state() {
        assert_eq!(AppConfig::default().no_hand_timeout(), None);
    }
}
