use std::path::PathBuf;
use std::time::Duration;

use crate::config::helpers::{EnvLookup, parse_optional_env, parse_string_env};
use crate::error::ConfigError;

/// How lab environments are brought up through Docker Compose.
#[derive(Debug, Clone)]
pub struct ComposeConfig {
    /// `docker` binary to invoke (`docker compose ...`).
    pub docker_bin: String,
    /// Compose file describing one lab environment.
    pub compose_file: PathBuf,
    /// Service whose port users connect to.
    pub service: String,
    /// Container-side port of `service` that is published on the host.
    pub service_port: u16,
    /// Upper bound for any single compose command.
    pub command_timeout: Duration,
}

impl Default for ComposeConfig {
    fn default() -> Self {
        Self {
            docker_bin: "docker".to_string(),
            compose_file: PathBuf::from("../ctf/docker-compose.yml"),
            service: "kali".to_string(),
            service_port: 22,
            command_timeout: Duration::from_secs(120),
        }
    }
}

impl ComposeConfig {
    pub(crate) fn resolve(env: EnvLookup<'_>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let timeout_secs: u64 = parse_optional_env(env, "LAB_COMMAND_TIMEOUT_SECS", 120)?;
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "LAB_COMMAND_TIMEOUT_SECS".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            docker_bin: parse_string_env(env, "LAB_DOCKER_BIN", &defaults.docker_bin)?,
            compose_file: PathBuf::from(parse_string_env(
                env,
                "LAB_COMPOSE_FILE",
                &defaults.compose_file.display().to_string(),
            )?),
            service: parse_string_env(env, "LAB_SERVICE", &defaults.service)?,
            service_port: parse_optional_env(env, "LAB_SERVICE_PORT", defaults.service_port)?,
            command_timeout: Duration::from_secs(timeout_secs),
        })
    }
}
