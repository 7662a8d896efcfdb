//! Configuration management for Conductor
//!
//! This module loads the set of MCP server descriptors from a YAML file,
//! applies environment overrides, and validates the result before it is
//! handed to the connection manager.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConductorError, Result};
use crate::mcp::config::{RetryConfig, ServerDescriptor};

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/conductor.yaml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Servers the manager may connect to
    #[serde(default)]
    pub servers: Vec<ServerDescriptor>,

    /// Connection retry behavior
    #[serde(default)]
    pub retry: RetryConfig,

    /// Identity sent during the MCP handshake
    #[serde(default)]
    pub client: ClientInfoConfig,
}

/// Client identity advertised to servers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfoConfig {
    /// Client name
    #[serde(default = "default_client_name")]
    pub name: String,

    /// Client version
    #[serde(default = "default_client_version")]
    pub version: String,
}

fn default_client_name() -> String {
    env!("CARGO_PKG_NAME").to_string()
}

fn default_client_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

impl Default for ClientInfoConfig {
    fn default() -> Self {
        Self {
            name: default_client_name(),
            version: default_client_version(),
        }
    }
}

impl Config {
    /// Load configuration from file with environment overrides
    ///
    /// A missing file is not an error: the result has no servers and a
    /// warning is logged.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();

        Ok(config)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents)
            .map_err(|e| ConductorError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConductorError::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&contents)
    }

    fn apply_env_vars(&mut self) {
        if let Ok(delay) = std::env::var("CONDUCTOR_RETRY_BASE_DELAY_MS") {
            if let Ok(v) = delay.parse::<u64>() {
                tracing::debug!(base_delay_ms = v, "Env override: CONDUCTOR_RETRY_BASE_DELAY_MS");
                self.retry.base_delay_ms = v;
            } else {
                tracing::warn!("Invalid CONDUCTOR_RETRY_BASE_DELAY_MS: {}", delay);
            }
        }

        if let Ok(timeout) = std::env::var("CONDUCTOR_CONNECT_TIMEOUT_SECONDS") {
            if let Ok(v) = timeout.parse::<u64>() {
                tracing::debug!(
                    timeout_seconds = v,
                    "Env override: CONDUCTOR_CONNECT_TIMEOUT_SECONDS"
                );
                for server in &mut self.servers {
                    server.timeout_seconds = v;
                }
            } else {
                tracing::warn!("Invalid CONDUCTOR_CONNECT_TIMEOUT_SECONDS: {}", timeout);
            }
        }

        if let Ok(retries) = std::env::var("CONDUCTOR_MAX_RETRIES") {
            if let Ok(v) = retries.parse::<u32>() {
                tracing::debug!(max_retries = v, "Env override: CONDUCTOR_MAX_RETRIES");
                for server in &mut self.servers {
                    server.max_retries = v;
                }
            } else {
                tracing::warn!("Invalid CONDUCTOR_MAX_RETRIES: {}", retries);
            }
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`ConductorError::Config`] for duplicate ids and
    /// [`ConductorError::InvalidDescriptor`] for malformed descriptors
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for server in &self.servers {
            server.validate()?;
            if !seen.insert(server.id.as_str()) {
                return Err(ConductorError::Config(format!(
                    "Duplicate server id: {}",
                    server.id
                ))
                .into());
            }
        }

        if self.client.name.trim().is_empty() {
            return Err(ConductorError::Config("client.name cannot be empty".to_string()).into());
        }

        Ok(())
    }

    /// Look up a descriptor by id
    pub fn server(&self, id: &str) -> Option<&ServerDescriptor> {
        self.servers.iter().find(|s| s.id == id)
    }
}
