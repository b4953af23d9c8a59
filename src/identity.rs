//! Registrant identities.

use serde::{Deserialize, Serialize};

use crate::error::LifecycleError;

/// Longest identity accepted. Compose project names end up in container
/// names, which Docker caps at 63 characters for the hostname part.
pub const MAX_IDENTITY_LEN: usize = 63;

/// A validated, user-chosen name scoping one environment.
///
/// Identities double as Docker Compose project names, so they are lowercased
/// and restricted to ASCII alphanumerics, `-` and `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    pub fn parse(raw: &str) -> Result<Self, LifecycleError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(LifecycleError::InvalidIdentity(
                "identity must not be empty".to_string(),
            ));
        }
        if trimmed.len() > MAX_IDENTITY_LEN {
            return Err(LifecycleError::InvalidIdentity(format!(
                "identity must be at most {} characters",
                MAX_IDENTITY_LEN
            )));
        }
        if let Some(bad) = trimmed
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(LifecycleError::InvalidIdentity(format!(
                "unsupported character {:?}",
                bad
            )));
        }
        // Compose rejects project names that do not start with a letter or digit.
        if trimmed.starts_with(['-', '_']) {
            return Err(LifecycleError::InvalidIdentity(
                "identity must start with a letter or digit".to_string(),
            ));
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Identity {
    type Error = LifecycleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_normalizes() {
        let id = Identity::parse("  Alice_01 ").unwrap();
        assert_eq!(id.as_str(), "alice_01");
        assert_eq!(id.to_string(), "alice_01");
    }

    #[test]
    fn rejects_empty() {
        assert!(matches!(
            Identity::parse("   "),
            Err(LifecycleError::InvalidIdentity(_))
        ));
    }

    #[test]
    fn rejects_shell_and_path_characters() {
        for raw in ["a b", "a;rm", "../x", "name$", "-lead", "_lead"] {
            assert!(Identity::parse(raw).is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn rejects_overlong() {
        let raw = "a".repeat(MAX_IDENTITY_LEN + 1);
        assert!(Identity::parse(&raw).is_err());
        assert!(Identity::parse(&raw[..MAX_IDENTITY_LEN]).is_ok());
    }

    #[test]
    fn deserializes_through_validation() {
        let id: Identity = serde_json::from_str("\"Bob\"").unwrap();
        assert_eq!(id.as_str(), "bob");
        assert!(serde_json::from_str::<Identity>("\"\"").is_err());
    }
}
