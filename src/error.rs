//! Error types for labrange.

use crate::identity::Identity;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),
}

/// Errors from the container orchestration layer.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Failed to launch environment for {identity}: {reason}")]
    LaunchFailed { identity: Identity, reason: String },

    #[error("Failed to resolve host port for {identity}: {reason}")]
    PortResolutionFailed { identity: Identity, reason: String },

    #[error("No host port bound to container port {container_port} for {identity}")]
    PortNotBound {
        identity: Identity,
        container_port: u16,
    },

    #[error("Failed to destroy environment for {identity}: {reason}")]
    DestroyFailed { identity: Identity, reason: String },

    #[error("{operation} failed: {reason}")]
    CommandFailed { operation: String, reason: String },

    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl OrchestratorError {
    /// Text shown to the registrant when provisioning fails: the underlying
    /// reason where there is one, without the identity prefix.
    pub fn user_message(&self) -> String {
        match self {
            Self::LaunchFailed { reason, .. }
            | Self::PortResolutionFailed { reason, .. }
            | Self::DestroyFailed { reason, .. }
            | Self::CommandFailed { reason, .. } => reason.clone(),
            other => other.to_string(),
        }
    }
}

/// Best-effort lookups that degrade instead of failing provisioning.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("Public address lookup failed: {0}")]
    Address(String),

    #[error("Firewall update for port {port} failed: {reason}")]
    Firewall { port: u16, reason: String },
}

/// Errors from session lifecycle operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("Identity already taken: {0}. Please choose another one.")]
    DuplicateIdentity(Identity),

    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    /// The caller has no session in the state the operation needs.
    #[error("No session in the required state")]
    NoSession,
}
