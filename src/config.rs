use crate::defaults;
use crate::error::{Result, VocalisError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub connection: ConnectionConfig,
    pub audio: AudioConfig,
    pub session: SessionConfig,
}

/// Assistant backend connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectionConfig {
    pub url: String,
    pub first_timeout_ms: u64,
    pub retry_timeout_ms: u64,
    /// Seconds between keep-alive pings; 0 disables them.
    pub keepalive_secs: u64,
}

/// Audio capture configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub device: Option<String>,
    pub sample_rate: u32,
    pub vad_threshold: f32,
    pub silence_duration_ms: u32,
    pub auto_endpoint: bool,
    pub poll_interval_ms: u64,
}

/// Session behaviour
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub error_revert_ms: u64,
    pub cues: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: defaults::SERVER_URL.to_string(),
            first_timeout_ms: defaults::FIRST_CONNECT_TIMEOUT_MS,
            retry_timeout_ms: defaults::RETRY_CONNECT_TIMEOUT_MS,
            keepalive_secs: 0,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: defaults::SAMPLE_RATE,
            vad_threshold: defaults::VAD_THRESHOLD,
            silence_duration_ms: defaults::SILENCE_DURATION_MS,
            auto_endpoint: true,
            poll_interval_ms: defaults::CAPTURE_POLL_MS,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            error_revert_ms: defaults::ERROR_REVERT_MS,
            cues: true,
        }
    }
}

impl ConnectionConfig {
    pub fn first_timeout(&self) -> Duration {
        Duration::from_millis(self.first_timeout_ms)
    }

    pub fn retry_timeout(&self) -> Duration {
        Duration::from_millis(self.retry_timeout_ms)
    }

    pub fn keepalive(&self) -> Option<Duration> {
        (self.keepalive_secs > 0).then(|| Duration::from_secs(self.keepalive_secs))
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML or invalid values.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VocalisError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                VocalisError::Io(e)
            }
        })?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if the file doesn't exist
    ///
    /// Only a missing file falls back to defaults; invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(VocalisError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            other => other,
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - VOCALIS_URL → connection.url
    /// - VOCALIS_AUDIO_DEVICE → audio.device
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("VOCALIS_URL")
            && !url.is_empty()
        {
            self.connection.url = url;
        }

        if let Ok(device) = std::env::var("VOCALIS_AUDIO_DEVICE")
            && !device.is_empty()
        {
            self.audio.device = Some(device);
        }

        self
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        let url = &self.connection.url;
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(VocalisError::ConfigInvalidValue {
                key: "connection.url".to_string(),
                message: format!("'{}' must start with ws:// or wss://", url),
            });
        }
        if self.audio.sample_rate == 0 {
            return Err(VocalisError::ConfigInvalidValue {
                key: "audio.sample_rate".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.audio.vad_threshold) {
            return Err(VocalisError::ConfigInvalidValue {
                key: "audio.vad_threshold".to_string(),
                message: "must be between 0.0 and 1.0".to_string(),
            });
        }
        if self.audio.poll_interval_ms == 0 {
            return Err(VocalisError::ConfigInvalidValue {
                key: "audio.poll_interval_ms".to_string(),
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/vocalis/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vocalis")
            .join("config.toml")
    }

    /// Render the default configuration as commented TOML.
    pub fn dump_template() -> String {
        let body = toml::to_string_pretty(&Config::default()).unwrap_or_default();
        format!(
            "# vocalis configuration\n# Save as {}\n\n{}",
            Self::default_path().display(),
            body
        )
    }
}
