//! TOML-based application configuration.
//!
//! Stores device preferences including:
//! - Default study/break durations and their accepted range
//! - Number of study/break rounds per session
//! - Poll durations and the default location / break-activity options
//! - The user this device acts as
//!
//! Configuration is stored at `<data dir>/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::data_dir;
use crate::error::ConfigError;
use crate::timer::{DurationBounds, TimerConfig};

/// Pomodoro defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerSettings {
    #[serde(default = "default_study_duration")]
    pub study_duration_secs: u64,
    #[serde(default = "default_break_duration")]
    pub break_duration_secs: u64,
    #[serde(default = "default_min_duration")]
    pub min_duration_secs: u64,
    #[serde(default = "default_max_duration")]
    pub max_duration_secs: u64,
    #[serde(default = "default_rounds")]
    pub rounds: u32,
    #[serde(default = "default_true")]
    pub auto_start_study: bool,
}

/// Poll durations and option sets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollsConfig {
    #[serde(default = "default_poll_duration")]
    pub location_duration_secs: u64,
    #[serde(default = "default_poll_duration")]
    pub break_duration_secs: u64,
    #[serde(default = "default_location_options")]
    pub location_options: Vec<String>,
    #[serde(default = "default_break_activities")]
    pub break_activities: Vec<String>,
}

/// Identity of the local user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(default)]
    pub default_user: Option<String>,
}

/// Application configuration.
///
/// Serialized to/from TOML at `<data dir>/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub timer: TimerSettings,
    #[serde(default)]
    pub polls: PollsConfig,
    #[serde(default)]
    pub user: UserConfig,
}

// Default functions
fn default_study_duration() -> u64 {
    25 * 60
}
fn default_break_duration() -> u64 {
    5 * 60
}
fn default_min_duration() -> u64 {
    60
}
fn default_max_duration() -> u64 {
    3600
}
fn default_rounds() -> u32 {
    1
}
fn default_true() -> bool {
    true
}
fn default_poll_duration() -> u64 {
    30
}
fn default_location_options() -> Vec<String> {
    vec!["Library".into(), "Cafe".into(), "Study Room".into()]
}
fn default_break_activities() -> Vec<String> {
    vec!["Take a walk".into(), "Phone break".into()]
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            study_duration_secs: default_study_duration(),
            break_duration_secs: default_break_duration(),
            min_duration_secs: default_min_duration(),
            max_duration_secs: default_max_duration(),
            rounds: default_rounds(),
            auto_start_study: true,
        }
    }
}

impl Default for PollsConfig {
    fn default() -> Self {
        Self {
            location_duration_secs: default_poll_duration(),
            break_duration_secs: default_poll_duration(),
            location_options: default_location_options(),
            break_activities: default_break_activities(),
        }
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if key.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                let obj = current.as_object_mut().ok_or_else(unknown)?;
                let existing = obj.get(part).ok_or_else(unknown)?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value.parse::<bool>().map_err(|e| invalid(e.to_string()))?,
                    ),
                    serde_json::Value::Number(_) => {
                        let n = value
                            .parse::<u64>()
                            .map_err(|_| invalid(format!("cannot parse '{value}' as number")))?;
                        serde_json::Value::Number(n.into())
                    }
                    // Lists accept JSON or a comma-separated string.
                    serde_json::Value::Array(_) => match serde_json::from_str(value) {
                        Ok(v @ serde_json::Value::Array(_)) => v,
                        _ => serde_json::Value::Array(
                            value
                                .split(',')
                                .map(str::trim)
                                .filter(|s| !s.is_empty())
                                .map(|s| serde_json::Value::String(s.to_string()))
                                .collect(),
                        ),
                    },
                    serde_json::Value::Object(_) => {
                        serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                    }
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current.get_mut(part).ok_or_else(unknown)?;
        }

        Err(unknown())
    }

    pub fn path() -> Result<PathBuf, ConfigError> {
        let dir = data_dir().map_err(|e| ConfigError::LoadFailed {
            path: PathBuf::from("config.toml"),
            message: e.to_string(),
        })?;
        Ok(dir.join("config.toml"))
    }

    /// Load from disk or write and return the default.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let cfg: Config =
                    toml::from_str(&content).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
                cfg.validate()?;
                Ok(cfg)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
            Err(e) => Err(ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
        }
    }

    /// Persist to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written to disk.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Change a value by dot-separated key without saving.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json =
            serde_json::to_value(&*self).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: Config =
            serde_json::from_value(json).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// Set a config value by key and save. Returns error if key is unknown.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.apply(key, value)?;
        self.save()
    }

    /// Reject settings the coordinator could not run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.timer;
        if t.min_duration_secs == 0 || t.min_duration_secs > t.max_duration_secs {
            return Err(ConfigError::InvalidValue {
                key: "timer.min_duration_secs".into(),
                message: format!(
                    "range {}..={} is empty",
                    t.min_duration_secs, t.max_duration_secs
                ),
            });
        }
        self.duration_bounds()
            .validate(&self.timer_config())
            .map_err(|e| ConfigError::InvalidValue {
                key: "timer".into(),
                message: e.to_string(),
            })?;
        for (key, secs) in [
            ("polls.location_duration_secs", self.polls.location_duration_secs),
            ("polls.break_duration_secs", self.polls.break_duration_secs),
        ] {
            if secs == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.into(),
                    message: "poll duration must be at least one second".into(),
                });
            }
        }
        for (key, options) in [
            ("polls.location_options", &self.polls.location_options),
            ("polls.break_activities", &self.polls.break_activities),
        ] {
            if options.is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: key.into(),
                    message: "at least one option is required".into(),
                });
            }
        }
        Ok(())
    }

    pub fn timer_config(&self) -> TimerConfig {
        TimerConfig {
            study_duration_secs: self.timer.study_duration_secs,
            break_duration_secs: self.timer.break_duration_secs,
        }
    }

    pub fn duration_bounds(&self) -> DurationBounds {
        DurationBounds {
            min_secs: self.timer.min_duration_secs,
            max_secs: self.timer.max_duration_secs,
        }
    }
}
