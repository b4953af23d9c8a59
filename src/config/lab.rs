use std::time::Duration;

use secrecy::SecretString;

use crate::config::helpers::{EnvLookup, optional_env, parse_bool_env, parse_optional_env, parse_string_env};
use crate::error::ConfigError;

/// Default public-address resolver (plain-text response).
pub const DEFAULT_IP_RESOLVER_URL: &str = "https://api.ipify.org/?format=text";

/// Session lifetime, provisioning, and challenge settings.
#[derive(Debug, Clone)]
pub struct LabConfig {
    /// Lifetime of a freshly activated environment.
    pub session_ttl: Duration,
    /// Time added by each extension.
    pub extend_by: Duration,
    /// Login issued for every environment.
    pub ssh_username: String,
    pub ssh_password: SecretString,
    /// Secret that flag submissions are compared against.
    pub flag: SecretString,
    /// Plain-text public IP lookup endpoint.
    pub ip_resolver_url: String,
    pub ip_lookup_timeout: Duration,
    /// Run `ufw allow <port>` after launch.
    pub firewall_enabled: bool,
    /// Destroy a launched environment when a later fatal step fails.
    pub rollback_on_failure: bool,
    /// Interval of the background expiry sweep. `None` disables it.
    pub reap_interval: Option<Duration>,
}

impl Default for LabConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(60 * 60),
            extend_by: Duration::from_secs(30 * 60),
            ssh_username: "root".to_string(),
            ssh_password: SecretString::from("root".to_string()),
            flag: SecretString::from("flag{this_is_a_secure_flag}".to_string()),
            ip_resolver_url: DEFAULT_IP_RESOLVER_URL.to_string(),
            ip_lookup_timeout: Duration::from_secs(5),
            firewall_enabled: true,
            rollback_on_failure: true,
            reap_interval: Some(Duration::from_secs(60)),
        }
    }
}

impl LabConfig {
    pub(crate) fn resolve(env: EnvLookup<'_>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let ttl_secs: u64 = parse_optional_env(env, "LAB_SESSION_TTL_SECS", 3600)?;
        if ttl_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "LAB_SESSION_TTL_SECS".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        let reap_secs: u64 = parse_optional_env(env, "LAB_REAP_INTERVAL_SECS", 60)?;

        let ssh_password = optional_env(env, "LAB_SSH_PASSWORD")?
            .map(SecretString::from)
            .unwrap_or(defaults.ssh_password);
        let flag = optional_env(env, "LAB_FLAG")?
            .map(SecretString::from)
            .unwrap_or(defaults.flag);

        Ok(Self {
            session_ttl: Duration::from_secs(ttl_secs),
            extend_by: Duration::from_secs(parse_optional_env(env, "LAB_EXTEND_SECS", 1800)?),
            ssh_username: parse_string_env(env, "LAB_SSH_USERNAME", &defaults.ssh_username)?,
            ssh_password,
            flag,
            ip_resolver_url: parse_string_env(env, "LAB_IP_RESOLVER_URL", DEFAULT_IP_RESOLVER_URL)?,
            ip_lookup_timeout: Duration::from_secs(parse_optional_env(
                env,
                "LAB_IP_TIMEOUT_SECS",
                5,
            )?),
            firewall_enabled: parse_bool_env(env, "LAB_FIREWALL_ENABLED", true)?,
            rollback_on_failure: parse_bool_env(env, "LAB_ROLLBACK_ON_FAILURE", true)?,
            reap_interval: (reap_secs > 0).then(|| Duration::from_secs(reap_secs)),
        })
    }
}
