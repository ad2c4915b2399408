//! Signal relay configuration.
//!
//! Configuration is loaded from environment variables with sensible
//! defaults. `PORT` overrides only the port half of the bind address,
//! so platform-assigned ports work without losing the host setting.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use thiserror::Error;

/// Default listen address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3000";

/// Default static asset root served at `/`.
pub const DEFAULT_STATIC_ROOT: &str = "public";

/// Signal relay configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address (default: "0.0.0.0:3000").
    pub bind_address: String,

    /// Directory of client assets served at `/`.
    pub static_root: PathBuf,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("RELAY_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        // PORT overrides the port portion only.
        let bind_address = match vars.get("PORT") {
            Some(port) => {
                let port: u16 = port.parse().map_err(|_| {
                    ConfigError::InvalidValue(format!("PORT must be a port number, got {port:?}"))
                })?;
                let host = bind_address
                    .rsplit_once(':')
                    .map_or(bind_address.as_str(), |(host, _)| host);
                format!("{host}:{port}")
            }
            None => bind_address,
        };

        let static_root = vars
            .get("RELAY_STATIC_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATIC_ROOT));

        Ok(Config {
            bind_address,
            static_root,
        })
    }
}
