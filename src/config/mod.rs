//! Configuration loading and validation.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::fetch::FetcherConfig;
use crate::models::{default_categories, PlayerCategory, SportRegistry};
use crate::sources::ProviderConfig;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Provider request settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchSettings {
    /// Timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Responses kept in the request cache
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(flatten)]
    pub providers: ProviderConfig,
}

fn default_timeout() -> u64 {
    5
}

fn default_cache_capacity() -> usize {
    128
}

fn default_user_agent() -> String {
    concat!("sports-pool/", env!("CARGO_PKG_VERSION")).to_string()
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout(),
            cache_capacity: default_cache_capacity(),
            user_agent: default_user_agent(),
            providers: ProviderConfig::default(),
        }
    }
}

impl FetchSettings {
    pub fn fetcher_config(&self) -> FetcherConfig {
        FetcherConfig {
            timeout: Duration::from_secs(self.timeout_seconds),
            user_agent: self.user_agent.clone(),
            cache_capacity: self.cache_capacity,
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub fetch: FetchSettings,

    #[serde(default)]
    pub server: ServerConfig,

    /// Replaces the built-in categories when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<PlayerCategory>>,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./data/pool.db")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            log_level: default_log_level(),
            fetch: FetchSettings::default(),
            server: ServerConfig::default(),
            categories: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch.timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "Fetch timeout must be greater than 0".to_string(),
            ));
        }

        if self.fetch.cache_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "Request cache capacity must be greater than 0".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigError::ValidationError(
                "Server port must be greater than 0".to_string(),
            ));
        }

        self.registry()?;
        Ok(())
    }

    /// The category registry, from config or the built-in defaults.
    pub fn registry(&self) -> Result<SportRegistry, ConfigError> {
        let categories = self.categories.clone().unwrap_or_else(default_categories);
        SportRegistry::new(categories).map_err(ConfigError::ValidationError)
    }
}
