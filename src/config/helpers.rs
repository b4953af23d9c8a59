//! Env-var parsing helpers shared by the config sections.
//!
//! Every helper takes the lookup function explicitly so that sections can be
//! resolved against a fixed map in tests instead of the process environment.

use std::str::FromStr;

use crate::error::ConfigError;

/// Source of configuration values, keyed by env-var name.
pub type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Read from the process environment.
pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Return the trimmed value for `key`, or `None` when unset or blank.
pub(crate) fn optional_env(env: EnvLookup<'_>, key: &str) -> Result<Option<String>, ConfigError> {
    Ok(env(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty()))
}

pub(crate) fn parse_string_env(
    env: EnvLookup<'_>,
    key: &str,
    default: &str,
) -> Result<String, ConfigError> {
    Ok(optional_env(env, key)?.unwrap_or_else(|| default.to_string()))
}

pub(crate) fn parse_optional_env<T>(
    env: EnvLookup<'_>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional_env(env, key)? {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

pub(crate) fn parse_bool_env(
    env: EnvLookup<'_>,
    key: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    match optional_env(env, key)? {
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected a boolean, got '{}'", other),
            }),
        },
        None => Ok(default),
    }
}

#[cfg(test)]
pub(crate) fn env_from<'a>(
    entries: &'a [(&'a str, &'a str)],
) -> impl Fn(&str) -> Option<String> + 'a {
    let map: std::collections::HashMap<&str, &str> = entries.iter().copied().collect();
    move |key: &str| map.get(key).map(|v| v.to_string())
}
