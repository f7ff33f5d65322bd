//! Sidecar Configuration
//!
//! Configuration is resolved in layers: built-in defaults, then an optional
//! TOML file, then command line flags and environment variables.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

const APP_DIR_NAME: &str = "utility-sidecar";

/// Longest accepted license check interval (one year)
pub const MAX_LICENSE_CHECK_INTERVAL_SECS: u64 = 365 * 24 * 60 * 60;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid cloud URL {0}: {1}")]
    InvalidCloudUrl(String, url::ParseError),

    #[error("License check interval must be greater than zero")]
    ZeroInterval,

    #[error("License check interval of {0}s exceeds the one year maximum")]
    IntervalTooLarge(u64),

    #[error("Request timeout must be greater than zero")]
    ZeroTimeout,

    #[error("Could not determine a data directory for the app database")]
    NoDataDir,
}

/// Effective sidecar configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SidecarConfig {
    /// Path of the SQLite app database holding license records
    pub app_db_path: PathBuf,
    /// Base URL of the licensing authority
    pub cloud_url: String,
    /// Seconds between background license revalidation runs
    pub license_check_interval_secs: u64,
    /// Timeout for a single licensing authority request
    pub request_timeout_secs: u64,
    /// Registers the development handler group
    pub development: bool,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            app_db_path: default_data_dir()
                .map(|dir| dir.join("app.db"))
                .unwrap_or_else(|| PathBuf::from("app.db")),
            cloud_url: "http://127.0.0.1:3000".to_string(),
            license_check_interval_secs: 60 * 60,
            request_timeout_secs: 30,
            development: false,
        }
    }
}

impl SidecarConfig {
    /// Load configuration from a TOML file, falling back to defaults for
    /// missing keys. A missing file is not an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::debug!("No config file at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Resolve the full configuration from command line arguments
    pub fn resolve(args: &CliArgs) -> Result<Self, ConfigError> {
        let path = match &args.config {
            Some(path) => path.clone(),
            None => default_data_dir()
                .ok_or(ConfigError::NoDataDir)?
                .join("config.toml"),
        };

        let mut config = Self::load(&path)?;
        config.apply_overrides(args);
        config.validate()?;
        Ok(config)
    }

    /// Apply command line / environment overrides on top of file values
    pub fn apply_overrides(&mut self, args: &CliArgs) {
        if let Some(ref path) = args.app_db_path {
            self.app_db_path = path.clone();
        }
        if let Some(ref url) = args.cloud_url {
            self.cloud_url = url.clone();
        }
        if let Some(secs) = args.license_check_interval_secs {
            self.license_check_interval_secs = secs;
        }
        if let Some(secs) = args.request_timeout_secs {
            self.request_timeout_secs = secs;
        }
        if args.development {
            self.development = true;
        }
    }

    /// Check invariants that the rest of the sidecar relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.license_check_interval_secs == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        if self.license_check_interval_secs > MAX_LICENSE_CHECK_INTERVAL_SECS {
            return Err(ConfigError::IntervalTooLarge(self.license_check_interval_secs));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        self.cloud_base_url()?;
        Ok(())
    }

    /// Parsed licensing authority base URL
    pub fn cloud_base_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.cloud_url)
            .map_err(|e| ConfigError::InvalidCloudUrl(self.cloud_url.clone(), e))
    }

    pub fn license_check_interval(&self) -> Duration {
        Duration::from_secs(self.license_check_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join(APP_DIR_NAME))
}

/// Command line arguments for the sidecar binary
#[derive(Debug, Default, Parser)]
#[command(name = "utility-sidecar", version, about = "RPC sidecar with background license revalidation")]
pub struct CliArgs {
    /// Path to a TOML config file
    #[arg(long, env = "UTILITY_SIDECAR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Path of the SQLite app database
    #[arg(long, env = "UTILITY_SIDECAR_DB")]
    pub app_db_path: Option<PathBuf>,

    /// Base URL of the licensing authority
    #[arg(long, env = "UTILITY_SIDECAR_CLOUD_URL")]
    pub cloud_url: Option<String>,

    /// Seconds between license revalidation runs
    #[arg(long)]
    pub license_check_interval_secs: Option<u64>,

    /// Timeout in seconds for licensing authority requests
    #[arg(long)]
    pub request_timeout_secs: Option<u64>,

    /// Enable development handlers
    #[arg(long, env = "UTILITY_SIDECAR_DEVELOPMENT")]
    pub development: bool,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    pub log_level: String,
}
