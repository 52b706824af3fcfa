//! Configuration management for Xhare.
//!
//! This module handles loading, saving, and validating the coordinator
//! configuration.
//!
//! ## Configuration File Locations
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/xhare/config.toml` |
//! | macOS | `~/Library/Application Support/com.xhare.Xhare/config.toml` |
//! | Windows | `%APPDATA%\Xhare\Xhare\config\config.toml` |
//!
//! ## Example
//!
//! ```rust,ignore
//! use xhare_core::config::Config;
//!
//! let config = Config::load()?;
//! println!("Saving to: {}", config.general.download_dir().display());
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main configuration struct for Xhare.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,
    /// Device discovery settings
    pub discovery: DiscoveryConfig,
    /// Transfer session settings
    pub transfer: TransferConfig,
    /// Notification settings
    pub notifications: NotificationConfig,
    /// History settings
    pub history: HistoryConfig,
}

/// General configuration options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory received files are saved to (None for the user's Downloads)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_dir: Option<PathBuf>,
}

impl GeneralConfig {
    /// Resolve the destination directory for received files.
    ///
    /// Falls back to the platform Downloads directory, then to the current
    /// directory when no user directories are known.
    #[must_use]
    pub fn download_dir(&self) -> PathBuf {
        self.download_dir.clone().unwrap_or_else(|| {
            directories::UserDirs::new()
                .and_then(|dirs| dirs.download_dir().map(Path::to_path_buf))
                .unwrap_or_else(|| PathBuf::from("."))
        })
    }
}

/// Device discovery configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// How often the device registry is refreshed
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(crate::DEFAULT_REFRESH_INTERVAL_SECS),
        }
    }
}

/// Transfer session configuration options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// What to do with an offer that arrives while another is pending
    pub offer_policy: OfferPolicy,
    /// Fail active sessions that report nothing for this long (None to wait forever)
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "humantime_serde::option"
    )]
    pub stall_timeout: Option<Duration>,
}

/// Policy for an incoming offer that arrives while another is unanswered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferPolicy {
    /// The new offer supersedes the pending one, which is declined
    #[default]
    Replace,
    /// The new offer is declined and the pending one is kept
    RejectNew,
}

/// Notification display configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// How long informational messages stay visible
    #[serde(with = "humantime_serde")]
    pub info_duration: Duration,
    /// How long success messages stay visible
    #[serde(with = "humantime_serde")]
    pub success_duration: Duration,
    /// How long warnings stay visible
    #[serde(with = "humantime_serde")]
    pub warning_duration: Duration,
    /// How long error messages stay visible
    #[serde(with = "humantime_serde")]
    pub error_duration: Duration,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            info_duration: Duration::from_secs(4),
            success_duration: Duration::from_secs(3),
            warning_duration: Duration::from_secs(4),
            error_duration: Duration::from_secs(5),
        }
    }
}

/// History configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Record finished transfers
    pub enabled: bool,
    /// Maximum history entries
    pub max_entries: usize,
    /// Persist history to the data directory
    pub persist: bool,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 100,
            persist: false,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// If the configuration file doesn't exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read,
    /// parsed, or fails validation.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read, parsed, or
    /// fails validation.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("Failed to read config: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to a specific file, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::ConfigError(format!("Failed to create config directory: {e}"))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| Error::ConfigError(format!("Failed to write config: {e}")))
    }

    /// Check values that would leave the coordinator unable to run.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        if self.discovery.refresh_interval.is_zero() {
            return Err(Error::InvalidConfig {
                key: "discovery.refresh_interval".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        if self.transfer.stall_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::InvalidConfig {
                key: "transfer.stall_timeout".to_string(),
                reason: "must be greater than zero when set".to_string(),
            });
        }

        if self.history.enabled && self.history.max_entries == 0 {
            return Err(Error::InvalidConfig {
                key: "history.max_entries".to_string(),
                reason: "must be at least 1 while history is enabled".to_string(),
            });
        }

        Ok(())
    }

    /// Get the default configuration directory path.
    #[must_use]
    pub fn config_dir() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the default data directory path (history lives here).
    #[must_use]
    pub fn data_dir() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.data_dir().to_path_buf())
    }

    /// Get the full path to the configuration file.
    #[must_use]
    pub fn config_path() -> PathBuf {
        Self::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "xhare", "Xhare")
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    fn format_duration(duration: Duration) -> String {
        let nanos = duration.subsec_nanos();
        if nanos == 0 {
            format!("{}s", duration.as_secs())
        } else if nanos % 1_000_000 == 0 {
            format!("{}ms", duration.as_millis())
        } else {
            format!("{}ns", duration.as_nanos())
        }
    }

    fn parse_duration(s: &str) -> Result<Duration, String> {
        let parse = |n: &str| n.trim().parse::<u64>().map_err(|e| e.to_string());

        if let Some(nanos) = s.strip_suffix("ns") {
            parse(nanos).map(Duration::from_nanos)
        } else if let Some(millis) = s.strip_suffix("ms") {
            parse(millis).map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            parse(secs).map(Duration::from_secs)
        } else if let Some(mins) = s.strip_suffix('m') {
            parse(mins)?
                .checked_mul(60)
                .map(Duration::from_secs)
                .ok_or_else(|| format!("duration out of range: '{s}'"))
        } else {
            Err(format!("invalid duration format: '{s}'"))
        }
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => serializer.serialize_some(&super::format_duration(*d)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<String>::deserialize(deserializer)?
                .map(|s| super::parse_duration(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}
