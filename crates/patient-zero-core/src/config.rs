//! Configuration loading and typed config structures for Patient Zero.
//!
//! The configuration lives in `patient-zero.yaml`. Every field has a
//! default, so an empty file (or no file at all) yields a working setup
//! that keeps its user records in memory.

use std::path::Path;
use std::time::Duration;

use patient_zero_types::{ChannelId, ParticipantId};
use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value is out of its allowed range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level configuration, mirroring `patient-zero.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PatientZeroConfig {
    /// Contagion tuning.
    #[serde(default)]
    pub contagion: ContagionConfig,

    /// Bot identity and channel names.
    #[serde(default)]
    pub bot: BotConfig,

    /// Infrastructure connection strings.
    #[serde(default)]
    pub infrastructure: InfrastructureConfig,
}

impl PatientZeroConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values:
    /// - `REDIS_URL` overrides `infrastructure.redis_url`
    /// - `PZ_GLOBAL_STATUS_CHANNEL` overrides `bot.global_status_channel_id`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Load `path` if it exists, falling back to defaults otherwise.
    ///
    /// # Errors
    ///
    /// Same as [`from_file`](Self::from_file) for an existing file.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            return Self::from_file(path);
        }
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes to unit, not a mapping.
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Override values with environment variables when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("REDIS_URL") {
            self.infrastructure.redis_url = Some(val);
        }
        if let Some(id) = std::env::var("PZ_GLOBAL_STATUS_CHANNEL")
            .ok()
            .and_then(|val| val.parse::<ChannelId>().ok())
        {
            self.bot.global_status_channel_id = Some(id);
        }
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.contagion.validate()?;
        if self.bot.log_channel_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "bot.log_channel_name must not be empty".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Contagion tuning.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ContagionConfig {
    /// Base infection chance in percent for the nearest neighbour.
    #[serde(default = "default_infection_chance")]
    pub infection_chance: u32,

    /// How many preceding messages are considered.
    #[serde(default = "default_nearby_messages")]
    pub nearby_messages: u32,

    /// Messages older than this, relative to the trigger, are ignored.
    #[serde(default = "default_max_time_difference_seconds")]
    pub max_time_difference_seconds: u64,

    /// Delay between infection and the marker being applied.
    #[serde(default = "default_incubation_time_seconds")]
    pub incubation_time_seconds: u64,

    /// Experience points per infection.
    #[serde(default = "default_infection_points")]
    pub infection_points: u32,
}

impl ContagionConfig {
    /// The history window as a duration.
    pub const fn max_time_difference(&self) -> Duration {
        Duration::from_secs(self.max_time_difference_seconds)
    }

    /// The incubation delay as a duration.
    pub const fn incubation_time(&self) -> Duration {
        Duration::from_secs(self.incubation_time_seconds)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.infection_chance > 100 {
            return Err(ConfigError::Invalid(format!(
                "contagion.infection_chance must be 0-100, got {}",
                self.infection_chance
            )));
        }
        if self.nearby_messages == 0 {
            return Err(ConfigError::Invalid(
                "contagion.nearby_messages must be at least 1".to_owned(),
            ));
        }
        // chrono::Duration tops out at i64::MAX milliseconds.
        if i64::try_from(self.max_time_difference_seconds)
            .ok()
            .and_then(|s| s.checked_mul(1000))
            .is_none()
        {
            return Err(ConfigError::Invalid(
                "contagion.max_time_difference_seconds is too large".to_owned(),
            ));
        }
        Ok(())
    }
}

impl Default for ContagionConfig {
    fn default() -> Self {
        Self {
            infection_chance: default_infection_chance(),
            nearby_messages: default_nearby_messages(),
            max_time_difference_seconds: default_max_time_difference_seconds(),
            incubation_time_seconds: default_incubation_time_seconds(),
            infection_points: default_infection_points(),
        }
    }
}

/// Bot identity and channel names.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BotConfig {
    /// The bot's own participant id; its messages never spread anything.
    #[serde(default)]
    pub bot_id: Option<ParticipantId>,

    /// Channel receiving every status line, across all guilds.
    #[serde(default)]
    pub global_status_channel_id: Option<ChannelId>,

    /// Name of the per-guild log channel.
    #[serde(default = "default_log_channel_name")]
    pub log_channel_name: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            bot_id: None,
            global_status_channel_id: None,
            log_channel_name: default_log_channel_name(),
        }
    }
}

/// Infrastructure connection strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct InfrastructureConfig {
    /// Redis URL for user records. Absent means an in-memory store.
    #[serde(default)]
    pub redis_url: Option<String>,
}

// ---------------------------------------------------------------------------
// Default value functions (serde default requires named functions)
// ---------------------------------------------------------------------------

const fn default_infection_chance() -> u32 {
    5
}

const fn default_nearby_messages() -> u32 {
    5
}

const fn default_max_time_difference_seconds() -> u64 {
    60
}

const fn default_incubation_time_seconds() -> u64 {
    60
}

const fn default_infection_points() -> u32 {
    5
}

fn default_log_channel_name() -> String {
    "pz-log".to_owned()
}
