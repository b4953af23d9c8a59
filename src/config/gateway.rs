use crate::config::helpers::{EnvLookup, parse_optional_env, parse_string_env};
use crate::error::ConfigError;

/// HTTP listener settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

impl GatewayConfig {
    pub(crate) fn resolve(env: EnvLookup<'_>) -> Result<Self, ConfigError> {
        Ok(Self {
            host: parse_string_env(env, "GATEWAY_HOST", "0.0.0.0")?,
            port: parse_optional_env(env, "GATEWAY_PORT", 5000)?,
        })
    }

    pub fn bind_addr(&self) -> Result<std::net::SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::InvalidValue {
                key: "GATEWAY_HOST".to_string(),
                message: e.to_string(),
            })
    }
}
