//! # Configuration
//!
//! Settings are layered, later layers winning:
//! 1. built-in defaults
//! 2. TOML file (`--config`, else `./stagekeep.toml` when present)
//! 3. environment (`STAGEKEEP_DATABASE`, `STAGEKEEP_ROOT`,
//!    `STAGEKEEP_STAGE_TIMEOUT_MINUTES`)
//! 4. command line flags
//!
//! ```toml
//! database = "C:/ProgramData/stagekeep/stages.redb"
//! root = 'SOFTWARE\Glazier\Stages'
//! stage_timeout_minutes = 240
//! ```

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use stagekeep_core::DEFAULT_STAGES_ROOT;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Config file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "stagekeep.toml";

/// Database used when nothing else is configured.
pub const DEFAULT_DATABASE: &str = "stagekeep.redb";

pub const ENV_DATABASE: &str = "STAGEKEEP_DATABASE";
pub const ENV_ROOT: &str = "STAGEKEEP_ROOT";
pub const ENV_STAGE_TIMEOUT: &str = "STAGEKEEP_STAGE_TIMEOUT_MINUTES";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("Cannot read config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML or has unknown keys.
    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// A setting has an unusable value.
    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Resolved settings for one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Path to the redb stage database.
    pub database: PathBuf,
    /// Root key of the stage tree.
    pub root: String,
    /// Minutes after which a running stage counts as expired. Unset: never.
    pub stage_timeout_minutes: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: PathBuf::from(DEFAULT_DATABASE),
            root: DEFAULT_STAGES_ROOT.to_string(),
            stage_timeout_minutes: None,
        }
    }
}

impl Config {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Build the configuration from file and environment.
    ///
    /// `env` looks up one environment variable; it is a parameter so callers
    /// (and tests) control the environment seen.
    pub fn resolve(
        explicit: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::load(path)?,
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_FILE);
                if fallback.is_file() {
                    Self::load(fallback)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(env)?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay environment variables.
    pub fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(database) = env(ENV_DATABASE) {
            self.database = PathBuf::from(database);
        }
        if let Some(root) = env(ENV_ROOT) {
            self.root = root;
        }
        if let Some(raw) = env(ENV_STAGE_TIMEOUT) {
            let minutes = raw.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
                key: ENV_STAGE_TIMEOUT,
                reason: format!("{raw:?}: {e}"),
            })?;
            self.stage_timeout_minutes = Some(minutes);
        }
        Ok(())
    }

    /// Overlay command line flags.
    #[must_use]
    pub fn with_overrides(mut self, database: Option<PathBuf>, root: Option<String>) -> Self {
        if let Some(database) = database {
            self.database = database;
        }
        if let Some(root) = root {
            self.root = root;
        }
        self
    }

    /// The stage timeout as a duration.
    pub fn stage_timeout(&self) -> Result<Option<TimeDelta>, ConfigError> {
        let Some(minutes) = self.stage_timeout_minutes else {
            return Ok(None);
        };
        i64::try_from(minutes)
            .ok()
            .and_then(TimeDelta::try_minutes)
            .map(Some)
            .ok_or_else(|| ConfigError::Invalid {
                key: "stage_timeout_minutes",
                reason: format!("{minutes} is out of range"),
            })
    }

    /// Check settings that would otherwise fail later with a vaguer error.
    pub fn validate(&self) -> Result<(), ConfigError> {
        stagekeep_core::store::segments(&self.root).map_err(|e| ConfigError::Invalid {
            key: "root",
            reason: e.to_string(),
        })?;
        if self.stage_timeout_minutes == Some(0) {
            return Err(ConfigError::Invalid {
                key: "stage_timeout_minutes",
                reason: "must be at least 1".to_string(),
            });
        }
        self.stage_timeout()?;
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
