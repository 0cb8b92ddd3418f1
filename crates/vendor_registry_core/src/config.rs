//! Registry runtime configuration.
//!
//! # Responsibility
//! - Describe where the registry database lives and how connections behave.
//! - Layer defaults, an optional JSON file, then environment overrides.
//!
//! # Invariants
//! - `busy_timeout_ms` is never zero; a zero timeout would turn ordinary
//!   write contention into storage errors.
//! - `log_level`, when set, is one of `trace|debug|info|warn|error`.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_DB_PATH: &str = "VENDOR_REGISTRY_DB_PATH";
pub const ENV_BUSY_TIMEOUT_MS: &str = "VENDOR_REGISTRY_BUSY_TIMEOUT_MS";
pub const ENV_LOG_LEVEL: &str = "VENDOR_REGISTRY_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "VENDOR_REGISTRY_LOG_DIR";

const DEFAULT_DB_FILE: &str = "vendor_registry.db";
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: Option<PathBuf>,
        source: serde_json::Error,
    },
    InvalidValue {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse {
                path: Some(path),
                source,
            } => write!(f, "invalid config `{}`: {source}", path.display()),
            Self::Parse { path: None, source } => write!(f, "invalid config: {source}"),
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid value `{value}` for {key}: {reason}")
            }
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
            Self::InvalidValue { .. } => None,
        }
    }
}

/// Settings consumed by `db::open_configured` and the operator CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryConfig {
    pub db_path: PathBuf,
    pub busy_timeout_ms: u64,
    /// Unset means each sink picks its own default.
    pub log_level: Option<String>,
    /// File logging is disabled when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_FILE),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            log_level: None,
            log_dir: None,
        }
    }
}

impl RegistryConfig {
    /// Loads defaults, then `path` when given, then process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(path) => Self::from_json_file(path)?,
            None => Self::default(),
        };
        base.with_overrides(|key| std::env::var(key).ok())
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: Some(path.to_path_buf()),
            source,
        })?;
        config.validated()
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(text).map_err(|source| ConfigError::Parse { path: None, source })?;
        config.validated()
    }

    /// Applies `VENDOR_REGISTRY_*` overrides resolved through `lookup`.
    ///
    /// Empty values are ignored so an exported-but-blank variable does not
    /// wipe a file setting.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(value) = get(ENV_DB_PATH) {
            self.db_path = PathBuf::from(value.trim());
        }
        if let Some(value) = get(ENV_BUSY_TIMEOUT_MS) {
            self.busy_timeout_ms =
                value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue {
                        key: ENV_BUSY_TIMEOUT_MS,
                        value: value.clone(),
                        reason: "expected milliseconds as an unsigned integer",
                    })?;
        }
        if let Some(value) = get(ENV_LOG_LEVEL) {
            self.log_level = Some(value.trim().to_ascii_lowercase());
        }
        if let Some(value) = get(ENV_LOG_DIR) {
            self.log_dir = Some(PathBuf::from(value.trim()));
        }

        self.validated()
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Configured log level, or `fallback` when neither file nor env set one.
    pub fn log_level_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.log_level.as_deref().unwrap_or(fallback)
    }

    fn validated(self) -> Result<Self, ConfigError> {
        if self.busy_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "busy_timeout_ms",
                value: "0".to_string(),
                reason: "must be greater than zero",
            });
        }
        if let Some(level) = &self.log_level {
            if !LOG_LEVELS.contains(&level.as_str()) {
                return Err(ConfigError::InvalidValue {
                    key: "log_level",
                    value: level.clone(),
                    reason: "expected trace|debug|info|warn|error",
                });
            }
        }
        if self.db_path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "db_path",
                value: String::new(),
                reason: "must not be empty",
            });
        }
        Ok(self)
    }
}
