//! Configuration for labrange.
//!
//! Settings are loaded with priority: env var > `.env` file > default.
//! The `.env` file is read via dotenvy before resolution and never
//! overrides variables that are already set.

mod compose;
mod gateway;
pub(crate) mod helpers;
mod lab;

use std::path::Path;

use crate::error::ConfigError;

pub use self::compose::ComposeConfig;
pub use self::gateway::GatewayConfig;
pub use self::helpers::EnvLookup;
pub use self::lab::{DEFAULT_IP_RESOLVER_URL, LabConfig};

/// Main configuration for the lab server.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub compose: ComposeConfig,
    pub lab: LabConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Loads `./.env` first when present, or `env_file` when given
    /// (a missing explicit file is an error).
    pub fn from_env(env_file: Option<&Path>) -> Result<Self, ConfigError> {
        match env_file {
            Some(path) => {
                dotenvy::from_path(path).map_err(|e| {
                    ConfigError::ParseError(format!(
                        "Failed to load env file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                tracing::debug!("Loaded env file {}", path.display());
            }
            None => {
                let _ = dotenvy::dotenv();
            }
        }

        Self::resolve(&helpers::process_env)
    }

    /// Build config from an arbitrary lookup (shared by `from_env` and tests).
    pub fn resolve(env: EnvLookup<'_>) -> Result<Self, ConfigError> {
        Ok(Self {
            gateway: GatewayConfig::resolve(env)?,
            compose: ComposeConfig::resolve(env)?,
            lab: LabConfig::resolve(env)?,
        })
    }
}
