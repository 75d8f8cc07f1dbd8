//! Configuration
//!
//! Database location, pool sizing, catalog name, upload directory root and
//! the ambient environment exposed to rules as `env`.
//!
//! Environment variables read by [`Config::from_env`]:
//! - `RECORDBASE_DATABASE_PATH` (unset: private temporary database)
//! - `RECORDBASE_POOL_SIZE` (default 4)
//! - `RECORDBASE_CHECKOUT_TIMEOUT_MS` (default 5000)
//! - `RECORDBASE_CATALOG_TABLE` (default `_tables`)
//! - `RECORDBASE_FILES_DIR`
//! - `RECORDBASE_LOG` (default `recordbase=info`)
//! - `RECORDBASE_ENV_<NAME>`: adds `<name>` (lowercased) to the rule environment

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::schema::validate_identifier;

const ENV_PREFIX: &str = "RECORDBASE_";
const RULE_ENV_PREFIX: &str = "RECORDBASE_ENV_";

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A setting is out of range or malformed
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// An environment variable could not be parsed
    #[error("invalid value '{value}' for {var}")]
    Env { var: String, value: String },

    /// JSON document could not be parsed
    #[error("configuration parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::Invalid(_) => "INVALID_CONFIG",
            ConfigError::Env { .. } => "INVALID_ENV_VAR",
            ConfigError::Parse(_) => "CONFIG_PARSE_ERROR",
        }
    }
}

/// Backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// SQLite database file; `None` uses a private temporary database
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Maximum concurrently checked-out sessions (default: 4)
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// How long a checkout waits for a free session (default: 5000 ms)
    #[serde(default = "default_checkout_timeout_ms")]
    pub checkout_timeout_ms: u64,

    /// System table holding table definitions (default: "_tables")
    #[serde(default = "default_catalog_table")]
    pub catalog_table: String,

    /// Root of per-table upload directories
    #[serde(default)]
    pub files_dir: Option<PathBuf>,

    /// Exposed to rule expressions as the `env` document
    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    /// tracing filter directive (default: "recordbase=info")
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_pool_size() -> usize {
    4
}

fn default_checkout_timeout_ms() -> u64 {
    5000
}

fn default_catalog_table() -> String {
    "_tables".to_string()
}

fn default_log_filter() -> String {
    "recordbase=info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            pool_size: default_pool_size(),
            checkout_timeout_ms: default_checkout_timeout_ms(),
            catalog_table: default_catalog_table(),
            files_dir: None,
            environment: BTreeMap::new(),
            log_filter: default_log_filter(),
        }
    }
}

impl Config {
    /// File database with defaults
    pub fn with_database(path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: Some(path.into()),
            ..Default::default()
        }
    }

    /// Load from `RECORDBASE_*` process environment variables
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Load from an explicit set of variables
    pub fn from_vars<I>(vars: I) -> ConfigResult<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut config = Self::default();
        for (var, value) in vars {
            if let Some(name) = var.strip_prefix(RULE_ENV_PREFIX) {
                config.environment.insert(name.to_lowercase(), value);
                continue;
            }
            let Some(setting) = var.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match setting {
                "DATABASE_PATH" => config.database_path = Some(PathBuf::from(value)),
                "POOL_SIZE" => config.pool_size = parse_var(&var, &value)?,
                "CHECKOUT_TIMEOUT_MS" => config.checkout_timeout_ms = parse_var(&var, &value)?,
                "CATALOG_TABLE" => config.catalog_table = value,
                "FILES_DIR" => config.files_dir = Some(PathBuf::from(value)),
                "LOG" => config.log_filter = value,
                _ => {}
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON configuration document
    pub fn from_json_str(json: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject unusable settings
    pub fn validate(&self) -> ConfigResult<()> {
        if self.pool_size == 0 {
            return Err(ConfigError::Invalid("pool_size must be at least 1".into()));
        }
        validate_identifier("catalog table", &self.catalog_table)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }

    pub fn checkout_timeout(&self) -> Duration {
        Duration::from_millis(self.checkout_timeout_ms)
    }
}

fn parse_var<T: std::str::FromStr>(var: &str, value: &str) -> ConfigResult<T> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        var: var.to_string(),
        value: value.to_string(),
    })
}
