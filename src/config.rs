//! Configuration management for the wakeline pipeline

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::Result;
use crate::session::SessionConfig;
use crate::vad::VadConfig;
use crate::wake::WakeConfig;

/// Top-level pipeline configuration
///
/// Loaded from a TOML file when present, otherwise defaults. Every section
/// is optional in the file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the model blobs
    pub model_dir: Option<PathBuf>,

    /// Wake word pipeline settings
    pub wake: WakeConfig,

    /// Voice activity detector settings
    pub vad: VadConfig,

    /// Session state machine settings
    pub session: SessionConfig,

    /// Execution planning and worker settings
    pub execution: ExecutionSettings,
}

/// Worker dispatch and planner settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    /// Wall-clock timeout per dispatch
    pub dispatch_timeout_ms: u64,

    /// Recreate failed workers automatically
    pub auto_restart: bool,

    /// Backoff before a failed worker is recreated
    pub restart_backoff_ms: u64,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            dispatch_timeout_ms: 30_000,
            auto_restart: true,
            restart_backoff_ms: 1000,
        }
    }
}

impl ExecutionSettings {
    /// Dispatch timeout as a [`Duration`]
    #[must_use]
    pub const fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }

    /// Restart backoff as a [`Duration`]
    #[must_use]
    pub const fn restart_backoff(&self) -> Duration {
        Duration::from_millis(self.restart_backoff_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Load from the default location, falling back to defaults
    ///
    /// Checks `WAKELINE_CONFIG`, then the XDG config directory
    /// (`~/.config/wakeline/config.toml` on Linux).
    ///
    /// # Errors
    ///
    /// Returns error only when a config file exists but cannot be parsed;
    /// a missing file yields defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(path) = std::env::var("WAKELINE_CONFIG") {
            return Self::load(Path::new(&path));
        }

        if let Some(dirs) = directories::ProjectDirs::from("dev", "wakeline", "wakeline") {
            let path = dirs.config_dir().join("config.toml");
            if path.exists() {
                return Self::load(&path);
            }
        }

        tracing::debug!("no configuration file found, using defaults");
        Ok(Self::default())
    }

    /// Model directory, defaulting to the XDG data directory
    #[must_use]
    pub fn model_dir(&self) -> PathBuf {
        self.model_dir.clone().unwrap_or_else(|| {
            directories::ProjectDirs::from("dev", "wakeline", "wakeline").map_or_else(
                || PathBuf::from("models"),
                |dirs| dirs.data_dir().join("models"),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert!((config.wake.threshold - 0.5).abs() < f32::EPSILON);
        assert_eq!(config.vad.min_speech_frames, 3);
        assert_eq!(config.session.cooldown_ms, 2000);
        assert_eq!(config.execution.dispatch_timeout_ms, 30_000);
    }

    #[test]
    fn partial_sections_override_only_named_fields() {
        let config: Config = toml::from_str(
            r#"
            model_dir = "/opt/models"

            [wake]
            threshold = 0.7

            [session]
            auto_end = false
            "#,
        )
        .unwrap();
        assert_eq!(config.model_dir(), PathBuf::from("/opt/models"));
        assert!((config.wake.threshold - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.wake.melspec_model, "melspectrogram.onnx");
        assert!(!config.session.auto_end);
        assert_eq!(config.session.silence_timeout_ms, 1800);
    }

    #[test]
    fn execution_durations_convert() {
        let settings = ExecutionSettings::default();
        assert_eq!(settings.dispatch_timeout(), Duration::from_secs(30));
        assert_eq!(settings.restart_backoff(), Duration::from_secs(1));
    }
}
