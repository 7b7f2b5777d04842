use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Feeder configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeederConfig {
    /// How long a real backend state query stays fresh
    pub state_refresh_interval_ms: u64,
    /// Delay between readiness probes
    pub ready_poll_interval_ms: u64,
    /// Readiness probes before the backend is given up on
    pub ready_max_attempts: u32,
    /// Native output device name; the default device is used when absent or missing
    pub preferred_device: Option<String>,
    /// Log level used when AUDIO_FEEDER_LOG_LEVEL is not set
    pub log_level: String,
}

impl Default for FeederConfig {
    fn default() -> Self {
        Self {
            state_refresh_interval_ms: 40,
            ready_poll_interval_ms: 20,
            ready_max_attempts: 100,
            preferred_device: None,
            log_level: "info".to_string(),
        }
    }
}

impl FeederConfig {
    pub fn state_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.state_refresh_interval_ms)
    }

    pub fn ready_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ready_poll_interval_ms)
    }
}

/// Configuration manager for loading and saving settings
pub struct ConfigManager {
    config: FeederConfig,
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self, ConfigError> {
        let config_path = Self::get_config_path()?;
        let config = Self::load_config(&config_path).unwrap_or_default();

        Ok(Self {
            config,
            config_path,
        })
    }

    /// Manager bound to an explicit file instead of the per-user location
    pub fn with_path(config_path: PathBuf) -> Result<Self, ConfigError> {
        let config = Self::load_config(&config_path)?;
        Ok(Self {
            config,
            config_path,
        })
    }

    pub fn get_config(&self) -> &FeederConfig {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn update_config<F>(&mut self, updater: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut FeederConfig),
    {
        updater(&mut self.config);
        self.save_config()
    }

    pub fn set_preferred_device(&mut self, device: Option<String>) -> Result<(), ConfigError> {
        self.config.preferred_device = device;
        self.save_config()
    }

    pub fn set_state_refresh_interval(&mut self, interval: Duration) -> Result<(), ConfigError> {
        self.config.state_refresh_interval_ms = interval.as_millis() as u64;
        self.save_config()
    }

    pub fn set_ready_polling(&mut self, interval: Duration, max_attempts: u32) -> Result<(), ConfigError> {
        self.config.ready_poll_interval_ms = (interval.as_millis() as u64).max(1);
        self.config.ready_max_attempts = max_attempts;
        self.save_config()
    }

    pub fn set_log_level(&mut self, level: &str) -> Result<(), ConfigError> {
        self.config.log_level = level.to_lowercase();
        self.save_config()
    }

    pub fn reset_to_defaults(&mut self) -> Result<(), ConfigError> {
        self.config = FeederConfig::default();
        self.save_config()
    }

    /// `<config dir>/audio-feeder/config.toml`, falling back to `~/.config`
    fn get_config_path() -> Result<PathBuf, ConfigError> {
        let base = dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
            .ok_or(ConfigError::ConfigDirNotFound)?;
        let config_dir = base.join("audio-feeder");

        std::fs::create_dir_all(&config_dir).map_err(ConfigError::IoError)?;

        Ok(config_dir.join("config.toml"))
    }

    fn load_config(path: &Path) -> Result<FeederConfig, ConfigError> {
        if !path.exists() {
            return Ok(FeederConfig::default());
        }

        let config_content = std::fs::read_to_string(path).map_err(ConfigError::IoError)?;

        let config: FeederConfig =
            toml::from_str(&config_content).map_err(ConfigError::DeserializationError)?;

        Ok(config)
    }

    fn save_config(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigError::IoError)?;
        }

        let config_content =
            toml::to_string_pretty(&self.config).map_err(ConfigError::SerializationError)?;

        std::fs::write(&self.config_path, config_content).map_err(ConfigError::IoError)?;

        Ok(())
    }
}
