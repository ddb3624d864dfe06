// ABOUTME: Configuration loading and validation for the ticker CLI.
// ABOUTME: TOML config file with environment variable expansion.

use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Top-level configuration structure for ticker-cli.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
}

/// Backend connection configuration.
#[derive(Clone, Deserialize)]
pub struct ServerConfig {
    /// Base URL of the dashboard backend (e.g., "https://api.example.com").
    pub base_url: String,
    /// Bearer token for API calls.
    pub token: String,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("base_url", &self.base_url)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl Config {
    /// Load configuration from the specified path or default location.
    ///
    /// Default location: `~/.config/ticker/config.toml`
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let path = path
            .or_else(|| dirs::config_dir().map(|d| d.join("ticker").join("config.toml")))
            .ok_or_else(|| ConfigError::Config("Could not determine config path".into()))?;

        let contents = std::fs::read_to_string(&path).map_err(|e| {
            ConfigError::Config(format!("Failed to read config from {:?}: {}", path, e))
        })?;

        // Expand environment variables, warning on undefined vars.
        let contents = shellexpand::env_with_context_no_errors(&contents, |var: &str| {
            match std::env::var(var) {
                Ok(val) => Some(val),
                Err(_) => {
                    warn!(
                        variable = %var,
                        "Environment variable not defined, using empty string"
                    );
                    Some(String::new())
                }
            }
        });

        let config: Config = toml::from_str(&contents)
            .map_err(|e| ConfigError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate that required fields are present and properly formatted.
    fn validate(&self) -> Result<()> {
        if self.server.base_url.is_empty() {
            return Err(ConfigError::Config("server.base_url is required".into()));
        }
        if !self.server.base_url.starts_with("http://")
            && !self.server.base_url.starts_with("https://")
        {
            return Err(ConfigError::Config(
                "server.base_url must start with http:// or https://".into(),
            ));
        }
        if self.server.token.is_empty() {
            return Err(ConfigError::Config("server.token is required".into()));
        }
        Ok(())
    }
}
