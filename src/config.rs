//! Gateway configuration: environment inputs and the trusted-sources file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Default evidence / mode database path.
const DEFAULT_DB_PATH: &str = "data/portcullis.db";

/// Default global rate-limit ceiling (requests per minute).
const DEFAULT_GLOBAL_RATE_LIMIT: u32 = 100;

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Trusted-sources file unreadable.
    #[error("Cannot read trusted sources file {path}: {message}")]
    Unreadable {
        /// Configured path.
        path: PathBuf,
        /// I/O error message.
        message: String,
    },

    /// Trusted-sources file failed to parse.
    #[error("Cannot parse trusted sources file {path}: {message}")]
    Unparseable {
        /// Configured path.
        path: PathBuf,
        /// Parser error message.
        message: String,
    },

    /// Environment variable carried an invalid value.
    #[error("Invalid value for {variable}: {message}")]
    InvalidEnv {
        /// Variable name.
        variable: String,
        /// Why the value was rejected.
        message: String,
    },
}

/// Domain allow-lists feeding the priority scorer's source-type sub-score.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedSources {
    /// Domains publishing official policy (legislatures, ministries).
    #[serde(default)]
    pub official_policy: Vec<String>,
    /// Recognized non-government organizations.
    #[serde(default)]
    pub recognized_ngo: Vec<String>,
}

impl TrustedSources {
    /// Loads trusted sources from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let sources: Self = toml::from_str(&raw).map_err(|e| ConfigError::Unparseable {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        info!(
            path = %path.display(),
            official = sources.official_policy.len(),
            ngo = sources.recognized_ngo.len(),
            "Loaded trusted sources"
        );
        Ok(sources)
    }
}

/// Process-level gateway configuration, all optional with documented
/// defaults.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Evidence / network-mode database path (`PORTCULLIS_DB`).
    pub db_path: PathBuf,
    /// Global rate-limit ceiling per minute (`PORTCULLIS_GLOBAL_RATE_LIMIT`).
    pub global_rate_limit: u32,
    /// Trusted-sources file path (`PORTCULLIS_TRUSTED_SOURCES`).
    pub trusted_sources_path: Option<PathBuf>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            global_rate_limit: DEFAULT_GLOBAL_RATE_LIMIT,
            trusted_sources_path: None,
        }
    }
}

impl GatewayConfig {
    /// Builds configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if `PORTCULLIS_GLOBAL_RATE_LIMIT` is set but not a
    /// positive integer.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("PORTCULLIS_DB") {
            if !path.is_empty() {
                config.db_path = PathBuf::from(path);
            }
        }

        if let Ok(raw) = std::env::var("PORTCULLIS_GLOBAL_RATE_LIMIT") {
            let parsed: u32 = raw.parse().map_err(|_| ConfigError::InvalidEnv {
                variable: "PORTCULLIS_GLOBAL_RATE_LIMIT".to_string(),
                message: format!("expected a positive integer, got '{raw}'"),
            })?;
            if parsed == 0 {
                return Err(ConfigError::InvalidEnv {
                    variable: "PORTCULLIS_GLOBAL_RATE_LIMIT".to_string(),
                    message: "must be greater than zero".to_string(),
                });
            }
            config.global_rate_limit = parsed;
        }

        if let Ok(path) = std::env::var("PORTCULLIS_TRUSTED_SOURCES") {
            if !path.is_empty() {
                config.trusted_sources_path = Some(PathBuf::from(path));
            }
        }

        Ok(config)
    }

    /// Loads the configured trusted sources, or empty sets when no file is
    /// configured or the file is unusable (logged, not fatal).
    #[must_use]
    pub fn trusted_sources(&self) -> TrustedSources {
        match &self.trusted_sources_path {
            Some(path) => TrustedSources::load(path).unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to empty trusted sources");
                TrustedSources::default()
            }),
            None => TrustedSources::default(),
        }
    }
}
